//! Provider plugin registry with per-type singleton instances.
//!
//! The registry owns two things: the registered plugins (metadata plus a
//! factory) and a cache holding at most one live instance per provider type.
//! Cached instances move through [`InstanceState`]; an instance whose `init`
//! failed stays cached in the `Error` state and is replaced on the next
//! request for its type.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::codex::{CodexProvider, CODEX_PROVIDER};
use super::native::{NativeProvider, NATIVE_PROVIDER};
use super::provider::{IsolationLevel, ProviderConfig, ProviderMetadata, SandboxProvider};
use super::runtime::ScriptRuntime;

/// Provider types in the order they are preferred.
pub const DEFAULT_PRIORITY: &[&str] = &[CODEX_PROVIDER, NATIVE_PROVIDER];

/// Builds a provider object from a config.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn SandboxProvider>> + Send + Sync>;

/// A registrable provider: immutable metadata plus its factory.
#[derive(Clone)]
pub struct ProviderPlugin {
    pub metadata: ProviderMetadata,
    factory: ProviderFactory,
}

impl ProviderPlugin {
    /// Creates a plugin from metadata and a factory closure.
    pub fn new<F>(metadata: ProviderMetadata, factory: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn SandboxProvider>> + Send + Sync + 'static,
    {
        Self {
            metadata,
            factory: Arc::new(factory),
        }
    }

    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn SandboxProvider>> {
        (self.factory)(config)
    }
}

impl std::fmt::Debug for ProviderPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPlugin")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a cached provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
    /// Terminal; reached through explicit shutdown.
    Stopped,
}

/// Snapshot of a cached instance for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub state: InstanceState,
    pub config: ProviderConfig,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub error: Option<String>,
}

struct InstanceEntry {
    provider: Arc<dyn SandboxProvider>,
    state: InstanceState,
    config: ProviderConfig,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    error: Option<String>,
}

impl InstanceEntry {
    fn new(provider: Arc<dyn SandboxProvider>, config: ProviderConfig) -> Self {
        let now = Utc::now();
        Self {
            provider,
            state: InstanceState::Uninitialized,
            config,
            created_at: now,
            last_used_at: now,
            error: None,
        }
    }

    fn info(&self, provider_type: &str) -> InstanceInfo {
        InstanceInfo {
            provider_type: provider_type.to_string(),
            state: self.state,
            config: self.config.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            error: self.error.clone(),
        }
    }
}

/// Registry of sandbox providers.
///
/// Construct one per application (or per test) and share it by `Arc`.
pub struct ProviderRegistry {
    plugins: RwLock<HashMap<String, ProviderPlugin>>,
    instances: Mutex<HashMap<String, InstanceEntry>>,
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    priority: Vec<String>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry with the default priority list.
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
            priority: DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Creates a registry with the built-in `codex` and `native` providers.
    pub fn with_builtin_providers() -> Self {
        let registry = Self::new();
        registry.register(CodexProvider::plugin());
        registry.register(NativeProvider::plugin());
        registry
    }

    /// Replaces the priority list used by [`best_available`](Self::best_available)
    /// and the fallback selector.
    pub fn with_priority<I, S>(mut self, priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority = priority.into_iter().map(Into::into).collect();
        self
    }

    /// Provider types in preference order.
    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Registers a plugin. A duplicate type replaces the earlier registration.
    pub fn register(&self, plugin: ProviderPlugin) {
        let provider_type = plugin.metadata.provider_type.clone();
        let replaced = self
            .plugins
            .write()
            .insert(provider_type.clone(), plugin)
            .is_some();

        if replaced {
            tracing::warn!(provider = %provider_type, "sandbox provider registered twice, overwriting");
        } else {
            tracing::debug!(provider = %provider_type, "registered sandbox provider");
        }
    }

    /// Returns true if a plugin is registered for `provider_type`.
    pub fn is_registered(&self, provider_type: &str) -> bool {
        self.plugins.read().contains_key(provider_type)
    }

    /// Registered types: priority order first, then the rest alphabetically.
    pub fn registered_types(&self) -> Vec<String> {
        let plugins = self.plugins.read();
        let mut types: Vec<String> = self
            .priority
            .iter()
            .filter(|t| plugins.contains_key(t.as_str()))
            .cloned()
            .collect();
        let mut rest: Vec<String> = plugins
            .keys()
            .filter(|t| !self.priority.contains(t))
            .cloned()
            .collect();
        rest.sort();
        types.extend(rest);
        types
    }

    /// Returns the metadata registered for `provider_type`.
    pub fn metadata(&self, provider_type: &str) -> Option<ProviderMetadata> {
        self.plugins
            .read()
            .get(provider_type)
            .map(|p| p.metadata.clone())
    }

    /// Metadata of every provider offering `isolation`.
    pub fn by_isolation(&self, isolation: IsolationLevel) -> Vec<ProviderMetadata> {
        self.filter_metadata(|m| m.isolation == isolation)
    }

    /// Metadata of every provider supporting `runtime`.
    pub fn by_runtime(&self, runtime: ScriptRuntime) -> Vec<ProviderMetadata> {
        self.filter_metadata(|m| m.supports_runtime(runtime))
    }

    fn filter_metadata(&self, keep: impl Fn(&ProviderMetadata) -> bool) -> Vec<ProviderMetadata> {
        self.registered_types()
            .iter()
            .filter_map(|t| self.metadata(t))
            .filter(|m| keep(m))
            .collect()
    }

    fn plugin(&self, provider_type: &str) -> Result<ProviderPlugin> {
        self.plugins
            .read()
            .get(provider_type)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider {
                provider_type: provider_type.to_string(),
                registered: self.registered_types(),
            })
    }

    /// Creates a new, uncached provider object.
    pub fn create(
        &self,
        provider_type: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn SandboxProvider>> {
        self.plugin(provider_type)?.build(config)
    }

    fn init_lock(&self, provider_type: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.init_locks
            .lock()
            .entry(provider_type.to_string())
            .or_default()
            .clone()
    }

    /// Returns the cached instance for `provider_type`, creating and
    /// initializing it if needed.
    ///
    /// Calls for the same type are serialized; different types proceed
    /// concurrently.
    pub async fn get_instance(
        &self,
        provider_type: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn SandboxProvider>> {
        let plugin = self.plugin(provider_type)?;
        let lock = self.init_lock(provider_type);
        let _guard = lock.lock().await;

        let stale = {
            let mut instances = self.instances.lock();
            match instances.get_mut(provider_type) {
                Some(entry) if entry.state == InstanceState::Ready && entry.config == *config => {
                    entry.last_used_at = Utc::now();
                    return Ok(entry.provider.clone());
                }
                Some(_) => instances.remove(provider_type),
                None => None,
            }
        };

        if let Some(old) = stale {
            match old.state {
                InstanceState::Error => {
                    tracing::debug!(provider = %provider_type, "discarding failed provider instance");
                }
                InstanceState::Stopped => {}
                _ => {
                    tracing::info!(provider = %provider_type, "provider config changed, recreating instance");
                    if let Err(e) = old.provider.shutdown().await {
                        tracing::warn!(provider = %provider_type, error = %e, "failed to shut down replaced provider");
                    }
                }
            }
        }

        let provider = plugin.build(config).map_err(|e| Error::Initialization {
            provider_type: provider_type.to_string(),
            reason: e.to_string(),
        })?;

        {
            let mut entry = InstanceEntry::new(provider.clone(), config.clone());
            entry.state = InstanceState::Initializing;
            self.instances.lock().insert(provider_type.to_string(), entry);
        }

        let outcome = provider.init(config).await;

        let mut instances = self.instances.lock();
        let entry = instances
            .get_mut(provider_type)
            .filter(|e| Arc::ptr_eq(&e.provider, &provider));

        match outcome {
            Ok(()) => {
                if let Some(entry) = entry {
                    entry.state = InstanceState::Ready;
                }
                tracing::info!(provider = %provider_type, "sandbox provider ready");
                Ok(provider)
            }
            Err(e) => {
                let reason = e.to_string();
                if let Some(entry) = entry {
                    entry.state = InstanceState::Error;
                    entry.error = Some(reason.clone());
                }
                tracing::warn!(provider = %provider_type, error = %reason, "sandbox provider failed to initialize");
                Err(Error::Initialization {
                    provider_type: provider_type.to_string(),
                    reason,
                })
            }
        }
    }

    /// Returns a snapshot of the cached instance for `provider_type`.
    pub fn instance_info(&self, provider_type: &str) -> Option<InstanceInfo> {
        self.instances
            .lock()
            .get(provider_type)
            .map(|e| e.info(provider_type))
    }

    /// Probes a fresh instance of `provider_type` with `config`.
    pub async fn probe(&self, provider_type: &str, config: &ProviderConfig) -> bool {
        match self.create(provider_type, config) {
            Ok(provider) => probe_available(provider.as_ref()).await,
            Err(e) => {
                tracing::debug!(provider = %provider_type, error = %e, "provider probe failed");
                false
            }
        }
    }

    /// Types whose fresh instance reports itself available with the default config.
    pub async fn available(&self) -> Vec<String> {
        self.available_with(&HashMap::new()).await
    }

    /// Like [`available`](Self::available), probing each type with its entry
    /// in `configs` when there is one.
    pub async fn available_with(&self, configs: &HashMap<String, ProviderConfig>) -> Vec<String> {
        let default = ProviderConfig::default();
        let mut available = Vec::new();
        for provider_type in self.registered_types() {
            let config = configs.get(&provider_type).unwrap_or(&default);
            if self.probe(&provider_type, config).await {
                available.push(provider_type);
            }
        }
        available
    }

    /// First available type in the priority list.
    pub async fn best_available(&self) -> Option<String> {
        for provider_type in &self.priority {
            if !self.is_registered(provider_type) {
                continue;
            }
            if self.probe(provider_type, &ProviderConfig::default()).await {
                return Some(provider_type.clone());
            }
        }
        None
    }

    /// Shuts down the cached instance of `provider_type`, leaving it `Stopped`.
    pub async fn shutdown_instance(&self, provider_type: &str) -> Result<()> {
        let lock = self.init_lock(provider_type);
        let _guard = lock.lock().await;

        let provider = {
            let mut instances = self.instances.lock();
            let Some(entry) = instances.get_mut(provider_type) else {
                return Ok(());
            };
            if entry.state == InstanceState::Stopped {
                return Ok(());
            }
            entry.state = InstanceState::Stopped;
            entry.provider.clone()
        };

        provider.shutdown().await
    }

    /// Stops every cached instance and clears the cache.
    ///
    /// Each type is stopped under its init lock, so an initialization in
    /// progress finishes first and its instance is shut down rather than
    /// leaked. Entries leave the cache before shutdown starts; in-flight
    /// executions are not cancelled.
    pub async fn stop_all(&self) {
        let provider_types: Vec<String> = self.instances.lock().keys().cloned().collect();

        let shutdowns = provider_types.into_iter().map(|provider_type| async move {
            let lock = self.init_lock(&provider_type);
            let _guard = lock.lock().await;

            let entry = self.instances.lock().remove(&provider_type)?;
            if !matches!(entry.state, InstanceState::Ready | InstanceState::Error) {
                return None;
            }
            if let Err(e) = entry.provider.shutdown().await {
                tracing::warn!(provider = %provider_type, error = %e, "failed to stop provider");
            }
            Some(provider_type)
        });

        let stopped: Vec<String> = join_all(shutdowns).await.into_iter().flatten().collect();
        tracing::info!(stopped = ?stopped, "stopped sandbox providers");
    }
}

/// Calls `is_available`, treating a panic as "not available".
pub(crate) async fn probe_available(provider: &dyn SandboxProvider) -> bool {
    match AssertUnwindSafe(provider.is_available()).catch_unwind().await {
        Ok(available) => available,
        Err(_) => {
            tracing::warn!(provider = %provider.provider_type(), "availability probe panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::provider::{
        ExecRequest, ExecResult, ProviderCapabilities, ScriptOptions,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct MockProvider {
        kind: String,
        available: bool,
        fail_inits: usize,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SandboxProvider for MockProvider {
        fn provider_type(&self) -> &str {
            &self.kind
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn init(&self, _config: &ProviderConfig) -> Result<()> {
            let attempt = self.counters.inits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if attempt < self.fail_inits {
                return Err(Error::Config("mock init failure".to_string()));
            }
            Ok(())
        }

        async fn exec(&self, _request: ExecRequest) -> Result<ExecResult> {
            Ok(ExecResult::failure("mock", Duration::ZERO))
        }

        async fn run_script(
            &self,
            _file_path: &Path,
            _work_dir: &Path,
            _options: ScriptOptions,
        ) -> Result<ExecResult> {
            Ok(ExecResult::failure("mock", Duration::ZERO))
        }

        async fn shutdown(&self) -> Result<()> {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn capabilities(&self) -> ProviderCapabilities {
            mock_metadata(&self.kind, IsolationLevel::Process).capabilities()
        }
    }

    fn mock_metadata(kind: &str, isolation: IsolationLevel) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: kind.to_string(),
            name: format!("Mock {}", kind),
            version: "0.0.0".to_string(),
            description: "test provider".to_string(),
            isolation,
            runtimes: vec![ScriptRuntime::Python],
            supports_volume_mounts: false,
            supports_networking: false,
            supports_pooling: false,
            config_schema: json!({}),
        }
    }

    fn mock_plugin(
        kind: &str,
        available: bool,
        fail_inits: usize,
        counters: Arc<Counters>,
    ) -> ProviderPlugin {
        let kind_owned = kind.to_string();
        ProviderPlugin::new(mock_metadata(kind, IsolationLevel::Process), move |_config| {
            counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockProvider {
                kind: kind_owned.clone(),
                available,
                fail_inits,
                counters: counters.clone(),
            }))
        })
    }

    #[tokio::test]
    async fn same_config_returns_same_instance() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, counters.clone()));
        let config = ProviderConfig::new(json!({"a": 1}));

        let first = registry.get_instance("iso", &config).await.unwrap();
        let second = registry
            .get_instance("iso", &ProviderConfig::new(json!({"a": 1})))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.instance_info("iso").unwrap().state,
            InstanceState::Ready
        );
    }

    #[tokio::test]
    async fn config_change_shuts_down_previous_instance() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, counters.clone()));

        let first = registry
            .get_instance("iso", &ProviderConfig::new(json!({"a": 1})))
            .await
            .unwrap();
        let second = registry
            .get_instance("iso", &ProviderConfig::new(json!({"a": 2})))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(
            registry.instance_info("iso").unwrap().config,
            ProviderConfig::new(json!({"a": 2}))
        );
    }

    #[tokio::test]
    async fn failed_init_is_retried_on_next_request() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 1, counters.clone()));
        let config = ProviderConfig::default();

        let err = registry.get_instance("iso", &config).await.err().unwrap();
        assert!(matches!(err, Error::Initialization { .. }));

        let info = registry.instance_info("iso").unwrap();
        assert_eq!(info.state, InstanceState::Error);
        assert!(info.error.unwrap().contains("mock init failure"));

        registry.get_instance("iso", &config).await.unwrap();
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(counters.inits.load(Ordering::SeqCst), 2);
        assert_eq!(
            registry.instance_info("iso").unwrap().state,
            InstanceState::Ready
        );
    }

    #[tokio::test]
    async fn concurrent_requests_create_one_instance() {
        let counters = Arc::new(Counters::default());
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(mock_plugin("iso", true, 0, counters.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .get_instance("iso", &ProviderConfig::default())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[tokio::test]
    async fn unknown_type_lists_registered_types() {
        let registry = ProviderRegistry::with_builtin_providers();
        let err = registry
            .get_instance("docker", &ProviderConfig::default())
            .await
            .err()
            .unwrap();

        match err {
            Error::UnknownProvider { registered, .. } => {
                assert_eq!(registered, vec!["codex".to_string(), "native".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, Arc::default()));

        let mut replacement = mock_plugin("iso", true, 0, Arc::default());
        replacement.metadata.name = "Replacement".to_string();
        registry.register(replacement);

        assert_eq!(registry.registered_types(), vec!["iso".to_string()]);
        assert_eq!(registry.metadata("iso").unwrap().name, "Replacement");
    }

    #[test]
    fn create_is_uncached() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, counters.clone()));

        let a = registry.create("iso", &ProviderConfig::default()).unwrap();
        let b = registry.create("iso", &ProviderConfig::default()).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.instance_info("iso").is_none());
    }

    #[tokio::test]
    async fn available_skips_unavailable_and_failing_factories() {
        let registry = ProviderRegistry::new().with_priority(["iso", "native"]);
        registry.register(mock_plugin("iso", false, 0, Arc::default()));
        registry.register(NativeProvider::plugin());
        registry.register(ProviderPlugin::new(
            mock_metadata("broken", IsolationLevel::Container),
            |_| Err(Error::Config("cannot build".to_string())),
        ));

        assert_eq!(registry.available().await, vec!["native".to_string()]);
        assert_eq!(registry.best_available().await, Some("native".to_string()));
    }

    #[test]
    fn queries_filter_by_isolation_and_runtime() {
        let registry = ProviderRegistry::with_builtin_providers();
        registry.register(ProviderPlugin::new(
            mock_metadata("vm", IsolationLevel::Vm),
            |_| Err(Error::Config("unused".to_string())),
        ));

        let process: Vec<_> = registry
            .by_isolation(IsolationLevel::Process)
            .into_iter()
            .map(|m| m.provider_type)
            .collect();
        assert_eq!(process, vec!["codex".to_string()]);

        let node: Vec<_> = registry
            .by_runtime(ScriptRuntime::Node)
            .into_iter()
            .map(|m| m.provider_type)
            .collect();
        assert_eq!(node, vec!["codex".to_string(), "native".to_string()]);
    }

    #[tokio::test]
    async fn stop_all_shuts_down_and_clears_cache() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, counters.clone()));
        registry.register(mock_plugin("other", true, 0, counters.clone()));

        registry
            .get_instance("iso", &ProviderConfig::default())
            .await
            .unwrap();
        registry
            .get_instance("other", &ProviderConfig::default())
            .await
            .unwrap();

        registry.stop_all().await;

        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 2);
        assert!(registry.instance_info("iso").is_none());
        assert!(registry.instance_info("other").is_none());
    }

    #[tokio::test]
    async fn stop_all_waits_for_initialization_and_shuts_the_instance_down() {
        let counters = Arc::new(Counters::default());
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(mock_plugin("iso", true, 0, counters.clone()));

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .get_instance("iso", &ProviderConfig::default())
                    .await
            })
        };
        while registry.instance_info("iso").map(|i| i.state) != Some(InstanceState::Initializing) {
            tokio::task::yield_now().await;
        }

        registry.stop_all().await;

        assert!(pending.await.unwrap().is_ok());
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(registry.instance_info("iso").is_none());
    }

    #[tokio::test]
    async fn shutdown_instance_marks_stopped_and_next_request_recreates() {
        let counters = Arc::new(Counters::default());
        let registry = ProviderRegistry::new();
        registry.register(mock_plugin("iso", true, 0, counters.clone()));
        let config = ProviderConfig::default();

        let first = registry.get_instance("iso", &config).await.unwrap();
        registry.shutdown_instance("iso").await.unwrap();
        registry.shutdown_instance("iso").await.unwrap();

        assert_eq!(
            registry.instance_info("iso").unwrap().state,
            InstanceState::Stopped
        );
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);

        let second = registry.get_instance("iso", &config).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn registry_is_usable_from_sync_code() {
        let registry = ProviderRegistry::with_builtin_providers();
        let native = tokio_test::block_on(
            registry.get_instance(NATIVE_PROVIDER, &ProviderConfig::default()),
        )
        .unwrap();

        assert_eq!(native.provider_type(), NATIVE_PROVIDER);
    }
}
