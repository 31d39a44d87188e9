//! One-call execution façade.
//!
//! [`SandboxExecutor`] combines provider selection, execution and result
//! annotation so callers can always tell which provider (and which isolation
//! level) serviced a request.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{SandboxConfig, Validate};
use crate::error::Result;
use crate::sandbox::{
    ExecRequest, ExecResult, FallbackSelector, IsolationLevel, ProviderRegistry,
    ProviderSelection, SandboxProvider, ScriptOptions,
};

/// Identifies the provider that serviced a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTag {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub name: String,
    pub isolation: IsolationLevel,
}

/// Execution result annotated with the provider that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedResult {
    /// Unique id of this execution, also attached to log events.
    pub execution_id: Uuid,
    #[serde(flatten)]
    pub result: ExecResult,
    pub provider: ProviderTag,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
}

impl std::ops::Deref for AnnotatedResult {
    type Target = ExecResult;

    fn deref(&self) -> &ExecResult {
        &self.result
    }
}

/// Summary of which provider would service calls right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub available: bool,
    pub provider: Option<String>,
    pub provider_name: Option<String>,
    pub isolation: Option<IsolationLevel>,
    pub message: String,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
}

/// Runs commands and scripts on the best available provider.
pub struct SandboxExecutor {
    registry: Arc<ProviderRegistry>,
    selector: FallbackSelector,
    preferred: Option<String>,
}

impl SandboxExecutor {
    /// Creates an executor over `registry` with default provider configs.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            selector: FallbackSelector::new(registry.clone()),
            registry,
            preferred: None,
        }
    }

    /// Creates an executor with the built-in providers, configured by `config`.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let registry = Arc::new(
            ProviderRegistry::with_builtin_providers().with_priority(config.priority.clone()),
        );
        Self {
            selector: FallbackSelector::new(registry.clone())
                .with_configs(config.provider_configs()),
            registry,
            preferred: config.preferred_provider.clone(),
        }
    }

    /// Sets the provider type tried before the priority list.
    pub fn with_preferred(mut self, provider_type: Option<String>) -> Self {
        self.preferred = provider_type;
        self
    }

    /// The registry backing this executor.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Registered types that are available with this executor's provider configs.
    pub async fn available_providers(&self) -> Vec<String> {
        self.registry.available_with(self.selector.configs()).await
    }

    /// Selects the provider that would service the next call.
    pub async fn best_provider_with_info(&self) -> Result<ProviderSelection> {
        self.selector.select(self.preferred.as_deref()).await
    }

    /// Selects the provider that would service the next call.
    pub async fn best_provider(&self) -> Result<Arc<dyn SandboxProvider>> {
        Ok(self.best_provider_with_info().await?.provider)
    }

    /// Runs a command on the best available provider.
    pub async fn exec(&self, request: ExecRequest) -> Result<AnnotatedResult> {
        for warning in request.validate().into_result()? {
            tracing::warn!(warning = %warning, "exec request");
        }

        let selection = self.best_provider_with_info().await?;
        let execution_id = Uuid::new_v4();
        tracing::info!(
            execution_id = %execution_id,
            provider = %selection.provider_type,
            command = %request.command,
            "executing command"
        );

        let result = selection.provider.exec(request).await?;
        Ok(self.annotate(execution_id, selection, result))
    }

    /// Runs a script file on the best available provider.
    pub async fn run_script(
        &self,
        file_path: impl AsRef<Path>,
        work_dir: impl AsRef<Path>,
        options: ScriptOptions,
    ) -> Result<AnnotatedResult> {
        for warning in options.validate().into_result()? {
            tracing::warn!(warning = %warning, "script options");
        }

        let file_path = file_path.as_ref();
        let selection = self.best_provider_with_info().await?;
        let execution_id = Uuid::new_v4();
        tracing::info!(
            execution_id = %execution_id,
            provider = %selection.provider_type,
            script = ?file_path,
            "running script"
        );

        let result = selection
            .provider
            .run_script(file_path, work_dir.as_ref(), options)
            .await?;
        Ok(self.annotate(execution_id, selection, result))
    }

    /// Describes the provider that would service calls.
    ///
    /// Never fails; when no provider can be initialized `available` is false.
    pub async fn info(&self) -> SandboxInfo {
        match self.best_provider_with_info().await {
            Ok(selection) => {
                let tag = self.tag(&selection);
                let message = match &selection.fallback_reason {
                    None => format!(
                        "Commands run in {} ({} isolation)",
                        tag.name, tag.isolation
                    ),
                    Some(reason) => format!(
                        "Commands run in {} ({} isolation) because {}",
                        tag.name, tag.isolation, reason
                    ),
                };
                SandboxInfo {
                    available: true,
                    provider: Some(tag.provider_type),
                    provider_name: Some(tag.name),
                    isolation: Some(tag.isolation),
                    message,
                    used_fallback: selection.used_fallback,
                    fallback_reason: selection.fallback_reason,
                }
            }
            Err(e) => SandboxInfo {
                available: false,
                provider: None,
                provider_name: None,
                isolation: None,
                message: e.to_string(),
                used_fallback: false,
                fallback_reason: None,
            },
        }
    }

    /// Stops every cached provider instance.
    pub async fn stop_all(&self) {
        self.registry.stop_all().await;
    }

    fn tag(&self, selection: &ProviderSelection) -> ProviderTag {
        match self.registry.metadata(&selection.provider_type) {
            Some(metadata) => ProviderTag {
                provider_type: metadata.provider_type,
                name: metadata.name,
                isolation: metadata.isolation,
            },
            None => ProviderTag {
                provider_type: selection.provider_type.clone(),
                name: selection.provider_type.clone(),
                isolation: selection.provider.capabilities().isolation,
            },
        }
    }

    fn annotate(
        &self,
        execution_id: Uuid,
        selection: ProviderSelection,
        result: ExecResult,
    ) -> AnnotatedResult {
        tracing::info!(
            execution_id = %execution_id,
            provider = %selection.provider_type,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            timed_out = result.timed_out,
            "execution finished"
        );

        AnnotatedResult {
            execution_id,
            provider: self.tag(&selection),
            used_fallback: selection.used_fallback,
            fallback_reason: selection.fallback_reason,
            result,
        }
    }
}
