//! Native provider: direct subprocess execution without isolation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use crate::error::Result;

use super::process::{self, ExecSettings, ProcessSpec};
use super::provider::{
    ExecRequest, ExecResult, IsolationLevel, ProviderCapabilities, ProviderConfig,
    ProviderMetadata, SandboxProvider, ScriptOptions,
};
use super::registry::ProviderPlugin;
use super::runtime::{self, ScriptRuntime};

/// Registry key of the native provider.
pub const NATIVE_PROVIDER: &str = "native";

/// Runs commands directly on the host.
///
/// Always available; used as the last resort when no isolating provider is.
pub struct NativeProvider {
    settings: RwLock<ExecSettings>,
}

impl Default for NativeProvider {
    fn default() -> Self {
        Self::new(ExecSettings::default())
    }
}

impl NativeProvider {
    /// Creates a native provider with the given settings.
    pub fn new(settings: ExecSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Static metadata for registration.
    pub fn metadata() -> ProviderMetadata {
        ProviderMetadata {
            provider_type: NATIVE_PROVIDER.to_string(),
            name: "Native".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Runs commands directly on the host without isolation".to_string(),
            isolation: IsolationLevel::None,
            runtimes: ScriptRuntime::ALL.to_vec(),
            supports_volume_mounts: false,
            supports_networking: true,
            supports_pooling: false,
            config_schema: exec_settings_schema(),
        }
    }

    /// Registry plugin for this provider.
    pub fn plugin() -> ProviderPlugin {
        ProviderPlugin::new(Self::metadata(), |config| {
            let settings: ExecSettings = config.parse()?;
            Ok(Arc::new(NativeProvider::new(settings)))
        })
    }

    fn settings(&self) -> ExecSettings {
        self.settings.read().clone()
    }
}

/// JSON schema fragment for [`ExecSettings`].
pub(crate) fn exec_settings_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "exec_timeout_secs": { "type": "integer", "minimum": 1 },
            "script_timeout_secs": { "type": "integer", "minimum": 1 },
            "install_timeout_secs": { "type": "integer", "minimum": 1 },
            "search_path": { "type": "string" }
        }
    })
}

#[async_trait]
impl SandboxProvider for NativeProvider {
    fn provider_type(&self) -> &str {
        NATIVE_PROVIDER
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn init(&self, config: &ProviderConfig) -> Result<()> {
        let settings: ExecSettings = config.parse()?;
        *self.settings.write() = settings;
        tracing::debug!("native provider initialized");
        Ok(())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecResult> {
        let settings = self.settings();
        let timeout = request.timeout.unwrap_or_else(|| settings.exec_timeout());
        let (program, args) =
            process::shell_invocation(process::command_line(&request.command, &request.args));

        tracing::debug!(command = %request.command, cwd = ?request.cwd, "native exec");

        let spec = ProcessSpec::new(program, timeout)
            .with_args(args)
            .with_cwd(request.cwd)
            .with_env(request.env);
        Ok(process::run_captured(spec).await)
    }

    async fn run_script(
        &self,
        file_path: &Path,
        work_dir: &Path,
        options: ScriptOptions,
    ) -> Result<ExecResult> {
        let settings = self.settings();
        let runtime = options
            .runtime
            .unwrap_or_else(|| ScriptRuntime::from_path(file_path));

        let Some(interpreter) = runtime.locate(settings.search_path.as_deref()) else {
            tracing::warn!(runtime = %runtime, script = ?file_path, "interpreter not found");
            return Ok(ExecResult::failure(runtime.missing_message(), Duration::ZERO));
        };

        runtime::install_packages(runtime, &interpreter, &options.packages, work_dir, &settings)
            .await?;

        let timeout = options.timeout.unwrap_or_else(|| settings.script_timeout());
        let spec = ProcessSpec::new(interpreter.program.clone(), timeout)
            .with_args(interpreter.script_args(file_path, &options.args))
            .with_cwd(Some(work_dir.to_path_buf()))
            .with_env(options.env);

        tracing::debug!(runtime = %runtime, script = ?file_path, "native run_script");
        Ok(process::run_captured(spec).await)
    }

    /// Nothing to release: each call owns its child process, and running
    /// calls are left to finish.
    async fn shutdown(&self) -> Result<()> {
        tracing::debug!("native provider stopped");
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        Self::metadata().capabilities()
    }
}
