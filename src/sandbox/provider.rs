//! Sandbox provider trait and types.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::runtime::ScriptRuntime;

/// Strength of confinement a provider offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Full virtual machine.
    Vm,
    /// Container runtime.
    Container,
    /// OS-level process sandbox.
    Process,
    /// No isolation at all.
    None,
}

impl IsolationLevel {
    /// Returns the lowercase identifier used in metadata and results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vm => "vm",
            Self::Container => "container",
            Self::Process => "process",
            Self::None => "none",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Configuration handed to a provider on creation and `init`.
///
/// Always a JSON object. Two configs are equal when they are structurally
/// equal, independent of key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(Value);

impl Default for ProviderConfig {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl ProviderConfig {
    /// Wraps a JSON value. `null` becomes the empty config.
    pub fn new(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            other => Self(other),
        }
    }

    /// Sets a single key, returning the updated config.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Deserializes the config into a provider's typed settings.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| Error::Config(format!("invalid provider config: {}", e)))
    }
}

impl From<Value> for ProviderConfig {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Host directory exposed inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Path as seen from inside the sandbox.
    pub guest_path: PathBuf,
    /// Whether the sandbox may only read the mount.
    #[serde(default)]
    pub read_only: bool,
}

/// Static capability flags of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub isolation: IsolationLevel,
    pub runtimes: Vec<ScriptRuntime>,
    pub supports_volume_mounts: bool,
    pub supports_networking: bool,
    pub supports_pooling: bool,
}

/// Immutable description of a provider type, registered once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Unique registry key (e.g. "codex", "native").
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Human-readable name.
    pub name: String,
    pub version: String,
    pub description: String,
    pub isolation: IsolationLevel,
    /// Script runtimes the provider can execute.
    pub runtimes: Vec<ScriptRuntime>,
    pub supports_volume_mounts: bool,
    pub supports_networking: bool,
    pub supports_pooling: bool,
    /// JSON-schema-like description of the accepted configuration.
    pub config_schema: Value,
}

impl ProviderMetadata {
    /// Returns the capability flags described by this metadata.
    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            isolation: self.isolation,
            runtimes: self.runtimes.clone(),
            supports_volume_mounts: self.supports_volume_mounts,
            supports_networking: self.supports_networking,
            supports_pooling: self.supports_pooling,
        }
    }

    /// Returns true if the provider can run scripts for `runtime`.
    pub fn supports_runtime(&self, runtime: ScriptRuntime) -> bool {
        self.runtimes.contains(&runtime)
    }
}

/// A single command to execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Shell fragment to run, taken verbatim.
    pub command: String,
    /// Arguments appended to the command, each shell-quoted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory. Defaults to the current directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Image or runtime hint for container/VM providers.
    #[serde(default)]
    pub image: Option<String>,
    /// Per-call timeout. Falls back to the provider default.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    /// Creates a request for the given command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Sets the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the image hint.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for running a script file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptOptions {
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Third-party packages installed before the script runs.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout. Falls back to the provider's script default.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Forces a runtime instead of inferring it from the extension.
    #[serde(default)]
    pub runtime: Option<ScriptRuntime>,
}

impl ScriptOptions {
    /// Sets the script arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the packages to install before running.
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Forces the runtime.
    pub fn with_runtime(mut self, runtime: ScriptRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Captured outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Full standard output.
    pub stdout: String,
    /// Full standard error, including any timeout or spawn-failure note.
    pub stderr: String,
    /// Process exit code. Killed processes report 128 + signal.
    pub exit_code: i32,
    /// Wall-clock duration.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Whether the process was killed for exceeding its timeout.
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecResult {
    /// Builds a failed result without a process having run.
    pub fn failure(stderr: impl Into<String>, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: 1,
            duration,
            timed_out: false,
        }
    }

    /// Returns true if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Capability contract implemented by every execution backend.
///
/// Providers are shared as `Arc<dyn SandboxProvider>` and keep whatever
/// state they need behind interior mutability.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Registry key of this provider.
    fn provider_type(&self) -> &str;

    /// Probes whether the backend can run on this host. Never fails.
    async fn is_available(&self) -> bool;

    /// Prepares the provider for use.
    async fn init(&self, config: &ProviderConfig) -> Result<()>;

    /// Runs a single command.
    ///
    /// A non-zero exit is reported in the result. `Err` is reserved for
    /// provider-level failures.
    async fn exec(&self, request: ExecRequest) -> Result<ExecResult>;

    /// Runs a script file, inferring its runtime and installing packages first.
    async fn run_script(
        &self,
        file_path: &Path,
        work_dir: &Path,
        options: ScriptOptions,
    ) -> Result<ExecResult>;

    /// Releases resources. Safe to call more than once.
    async fn shutdown(&self) -> Result<()>;

    /// Returns the static capability flags.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Configures volume mounts for subsequent executions.
    fn set_volumes(&self, mounts: Vec<VolumeMount>) -> Result<()> {
        let _ = mounts;
        Err(Error::Unsupported {
            provider_type: self.provider_type().to_string(),
            operation: "volume mounts".to_string(),
        })
    }
}
