//! Priority-ordered provider selection with fallback to native execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::native::NATIVE_PROVIDER;
use super::provider::{ProviderConfig, SandboxProvider};
use super::registry::{probe_available, ProviderRegistry};

/// Outcome of provider selection.
#[derive(Clone)]
pub struct ProviderSelection {
    pub provider: Arc<dyn SandboxProvider>,
    pub provider_type: String,
    /// True when a lower-isolation provider was substituted.
    pub used_fallback: bool,
    /// Why the substitution happened.
    pub fallback_reason: Option<String>,
}

impl fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("provider_type", &self.provider_type)
            .field("used_fallback", &self.used_fallback)
            .field("fallback_reason", &self.fallback_reason)
            .finish()
    }
}

/// Chooses the best available provider, degrading to `native`.
///
/// Candidates are probed strictly one after another in the registry's
/// priority order. Probing may shell out, so it is never done in parallel.
pub struct FallbackSelector {
    registry: Arc<ProviderRegistry>,
    configs: HashMap<String, ProviderConfig>,
}

impl FallbackSelector {
    /// Creates a selector over `registry` using default provider configs.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            configs: HashMap::new(),
        }
    }

    /// Sets per-type configs used for probing and initialization.
    pub fn with_configs(mut self, configs: HashMap<String, ProviderConfig>) -> Self {
        self.configs = configs;
        self
    }

    /// Per-type configs set with [`with_configs`](Self::with_configs).
    pub fn configs(&self) -> &HashMap<String, ProviderConfig> {
        &self.configs
    }

    /// Config used for `provider_type`.
    pub fn config_for(&self, provider_type: &str) -> ProviderConfig {
        self.configs
            .get(provider_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Selects a provider, honoring `preferred` when it is available.
    ///
    /// Fails only when the native provider itself cannot be initialized.
    pub async fn select(&self, preferred: Option<&str>) -> Result<ProviderSelection> {
        let reason = match preferred {
            Some(NATIVE_PROVIDER) => {
                return self
                    .native()
                    .await
                    .map(|provider| selection(NATIVE_PROVIDER, provider, None));
            }
            Some(provider_type) => match self.try_provider(provider_type).await {
                Ok(provider) => return Ok(selection(provider_type, provider, None)),
                Err(reason) => reason,
            },
            None => {
                let mut reasons = Vec::new();
                let candidates = self
                    .registry
                    .priority()
                    .iter()
                    .filter(|t| t.as_str() != NATIVE_PROVIDER && self.registry.is_registered(t));
                for provider_type in candidates {
                    match self.try_provider(provider_type).await {
                        Ok(provider) => return Ok(selection(provider_type, provider, None)),
                        Err(reason) => reasons.push(reason),
                    }
                }
                if reasons.is_empty() {
                    "no isolating sandbox provider is registered".to_string()
                } else {
                    reasons.join("; ")
                }
            }
        };

        tracing::warn!(reason = %reason, "falling back to native execution");
        let provider = self.native().await?;
        Ok(selection(NATIVE_PROVIDER, provider, Some(reason)))
    }

    /// Probes and initializes one candidate. The error is a readable reason.
    async fn try_provider(
        &self,
        provider_type: &str,
    ) -> std::result::Result<Arc<dyn SandboxProvider>, String> {
        let config = self.config_for(provider_type);

        let probe = self
            .registry
            .create(provider_type, &config)
            .map_err(|e| e.to_string())?;
        if !probe_available(probe.as_ref()).await {
            return Err(format!("{} sandbox is not available on this host", provider_type));
        }

        let provider = self
            .registry
            .get_instance(provider_type, &config)
            .await
            .map_err(|e| e.to_string())?;

        tracing::debug!(provider = %provider_type, "selected sandbox provider");
        Ok(provider)
    }

    async fn native(&self) -> Result<Arc<dyn SandboxProvider>> {
        self.registry
            .get_instance(NATIVE_PROVIDER, &self.config_for(NATIVE_PROVIDER))
            .await
            .map_err(|e| Error::NoProviderAvailable(e.to_string()))
    }
}

fn selection(
    provider_type: &str,
    provider: Arc<dyn SandboxProvider>,
    fallback_reason: Option<String>,
) -> ProviderSelection {
    ProviderSelection {
        provider,
        provider_type: provider_type.to_string(),
        used_fallback: fallback_reason.is_some(),
        fallback_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::native::NativeProvider;
    use crate::sandbox::provider::{
        ExecRequest, ExecResult, IsolationLevel, ProviderCapabilities, ProviderMetadata,
        ScriptOptions,
    };
    use crate::sandbox::registry::ProviderPlugin;
    use crate::sandbox::runtime::ScriptRuntime;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    struct StubProvider {
        kind: &'static str,
        available: bool,
        init_ok: bool,
    }

    #[async_trait]
    impl SandboxProvider for StubProvider {
        fn provider_type(&self) -> &str {
            self.kind
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn init(&self, _config: &ProviderConfig) -> Result<()> {
            if self.init_ok {
                Ok(())
            } else {
                Err(Error::Config("stub refuses to start".to_string()))
            }
        }

        async fn exec(&self, _request: ExecRequest) -> Result<ExecResult> {
            Ok(ExecResult::failure("stub", Duration::ZERO))
        }

        async fn run_script(
            &self,
            _file_path: &Path,
            _work_dir: &Path,
            _options: ScriptOptions,
        ) -> Result<ExecResult> {
            Ok(ExecResult::failure("stub", Duration::ZERO))
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }

        fn capabilities(&self) -> ProviderCapabilities {
            stub_metadata(self.kind).capabilities()
        }
    }

    fn stub_metadata(kind: &str) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: kind.to_string(),
            name: kind.to_string(),
            version: "0.0.0".to_string(),
            description: String::new(),
            isolation: IsolationLevel::Process,
            runtimes: vec![ScriptRuntime::Python],
            supports_volume_mounts: false,
            supports_networking: false,
            supports_pooling: false,
            config_schema: json!({}),
        }
    }

    fn stub(kind: &'static str, available: bool, init_ok: bool) -> ProviderPlugin {
        ProviderPlugin::new(stub_metadata(kind), move |_| {
            Ok(Arc::new(StubProvider {
                kind,
                available,
                init_ok,
            }))
        })
    }

    fn registry(plugins: Vec<ProviderPlugin>) -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new().with_priority(["iso", "backup", "native"]);
        for plugin in plugins {
            registry.register(plugin);
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn unavailable_preferred_provider_falls_back_to_native() {
        let registry = registry(vec![stub("iso", false, true), NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(None).await.unwrap();

        assert_eq!(selection.provider_type, "native");
        assert!(selection.used_fallback);
        assert!(selection
            .fallback_reason
            .unwrap()
            .contains("iso sandbox is not available"));
    }

    #[tokio::test]
    async fn available_provider_is_not_a_fallback() {
        let registry = registry(vec![stub("iso", true, true), NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry.clone());

        let selection = selector.select(None).await.unwrap();

        assert_eq!(selection.provider_type, "iso");
        assert!(!selection.used_fallback);
        assert!(selection.fallback_reason.is_none());
        assert!(registry.instance_info("iso").is_some());
    }

    #[tokio::test]
    async fn priority_order_is_respected() {
        let registry = registry(vec![
            stub("iso", false, true),
            stub("backup", true, true),
            NativeProvider::plugin(),
        ]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(None).await.unwrap();
        assert_eq!(selection.provider_type, "backup");
        assert!(!selection.used_fallback);
    }

    #[tokio::test]
    async fn init_failure_falls_back_to_native() {
        let registry = registry(vec![stub("iso", true, false), NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(None).await.unwrap();

        assert_eq!(selection.provider_type, "native");
        assert!(selection
            .fallback_reason
            .unwrap()
            .contains("stub refuses to start"));
    }

    #[tokio::test]
    async fn explicit_preference_is_honored() {
        let registry = registry(vec![
            stub("iso", true, true),
            stub("backup", true, true),
            NativeProvider::plugin(),
        ]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(Some("backup")).await.unwrap();
        assert_eq!(selection.provider_type, "backup");
        assert!(!selection.used_fallback);
    }

    #[tokio::test]
    async fn unknown_preference_falls_back_to_native() {
        let registry = registry(vec![NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(Some("firecracker")).await.unwrap();

        assert_eq!(selection.provider_type, "native");
        assert!(selection.used_fallback);
        assert!(selection.fallback_reason.unwrap().contains("firecracker"));
    }

    #[tokio::test]
    async fn preferring_native_is_not_a_fallback() {
        let registry = registry(vec![stub("iso", true, true), NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry);

        let selection = selector.select(Some("native")).await.unwrap();
        assert_eq!(selection.provider_type, "native");
        assert!(!selection.used_fallback);
    }

    #[tokio::test]
    async fn missing_native_is_terminal() {
        let registry = registry(vec![stub("iso", false, true)]);
        let selector = FallbackSelector::new(registry);

        let err = selector.select(None).await.unwrap_err();
        assert!(matches!(err, Error::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn selection_is_deterministic() {
        let registry = registry(vec![stub("iso", false, true), NativeProvider::plugin()]);
        let selector = FallbackSelector::new(registry);

        for _ in 0..5 {
            let selection = selector.select(None).await.unwrap();
            assert_eq!(selection.provider_type, "native");
            assert!(selection.used_fallback);
        }
    }
}
