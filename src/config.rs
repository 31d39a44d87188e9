//! Sandbox configuration and request validation.
//!
//! Configuration is read from a TOML or YAML file and may be overridden by
//! environment variables. Requests are validated before they reach a
//! provider to catch errors early.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sandbox::{
    CodexSettings, ExecRequest, ExecSettings, ProviderConfig, ScriptOptions, CODEX_PROVIDER,
    DEFAULT_PRIORITY, NATIVE_PROVIDER,
};

/// Environment variable naming the preferred provider type.
pub const ENV_PROVIDER: &str = "SANDBOX_PROVIDER";

/// Environment variable overriding the codex executable path.
pub const ENV_CODEX_PATH: &str = "SANDBOX_CODEX_PATH";

/// Environment variable pointing at a config file.
pub const ENV_CONFIG_PATH: &str = "SANDBOX_EXEC_CONFIG";

/// Built-in provider identifiers.
pub const KNOWN_PROVIDERS: &[&str] = &[CODEX_PROVIDER, NATIVE_PROVIDER];

/// Top-level sandbox configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Provider to try before the priority list.
    #[serde(default)]
    pub preferred_provider: Option<String>,

    /// Provider types in preference order.
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,

    /// Explicit path to the codex executable.
    #[serde(default)]
    pub codex_path: Option<PathBuf>,

    /// Default timeout for commands, in seconds.
    #[serde(default)]
    pub exec_timeout_secs: Option<u64>,

    /// Default timeout for scripts, in seconds.
    #[serde(default)]
    pub script_timeout_secs: Option<u64>,

    /// Per-provider settings, keyed by provider type.
    #[serde(default)]
    pub providers: HashMap<String, Value>,
}

fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            priority: default_priority(),
            codex_path: None,
            exec_timeout_secs: None,
            script_timeout_secs: None,
            providers: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Loads a config file. `.yaml`/`.yml` files are parsed as YAML, anything
    /// else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Parses a TOML config.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse sandbox config: {}", e)))
    }

    /// Parses a YAML config.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse sandbox config: {}", e)))
    }

    /// Loads the file named by `SANDBOX_EXEC_CONFIG` if set, then applies
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => Self::load(path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies overrides from `lookup` (normally the process environment).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(provider) = lookup(ENV_PROVIDER).filter(|v| !v.is_empty()) {
            self.preferred_provider = Some(provider);
        }
        if let Some(path) = lookup(ENV_CODEX_PATH).filter(|v| !v.is_empty()) {
            self.codex_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Builds the provider config for `provider_type`.
    ///
    /// Global timeouts apply to every provider, `codex_path` to codex only;
    /// the provider's own table wins on conflicts.
    pub fn provider_config(&self, provider_type: &str) -> ProviderConfig {
        let mut config = ProviderConfig::default();
        if let Some(secs) = self.exec_timeout_secs {
            config = config.with("exec_timeout_secs", secs);
        }
        if let Some(secs) = self.script_timeout_secs {
            config = config.with("script_timeout_secs", secs);
        }
        if provider_type == CODEX_PROVIDER {
            if let Some(path) = &self.codex_path {
                config = config.with("codex_path", path.to_string_lossy().into_owned());
            }
        }
        if let Some(Value::Object(table)) = self.providers.get(provider_type) {
            for (key, value) in table {
                config = config.with(key.clone(), value.clone());
            }
        }
        config
    }

    /// Provider configs for every type this config knows about.
    pub fn provider_configs(&self) -> HashMap<String, ProviderConfig> {
        let mut types: Vec<&str> = KNOWN_PROVIDERS.to_vec();
        types.extend(self.priority.iter().map(String::as_str));
        types.extend(self.providers.keys().map(String::as_str));
        types
            .into_iter()
            .map(|t| (t.to_string(), self.provider_config(t)))
            .collect()
    }
}

/// Problems found while checking a config or request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Problems that make the value unusable.
    pub errors: Vec<String>,
    /// Suspicious but usable settings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Folds in the findings for a nested section, prefixing each with `section`.
    pub fn absorb(&mut self, section: &str, other: ValidationResult) {
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("{}: {}", section, e)));
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("{}: {}", section, w)));
    }

    /// Fails with every error joined, or returns the warnings.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

fn check_timeout(result: &mut ValidationResult, name: &str, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return;
    };
    if timeout.is_zero() {
        result.add_error(format!("{} must be greater than zero", name));
    } else if timeout > Duration::from_secs(3600) {
        result.add_warning(format!("{} over 1 hour may indicate a misconfiguration", name));
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.priority.is_empty() {
            result.add_error("priority cannot be empty");
        } else if !self.priority.iter().any(|p| p == NATIVE_PROVIDER) {
            result.add_warning("priority does not include 'native'; fallback still uses it");
        }

        for provider in self.priority.iter().chain(self.preferred_provider.iter()) {
            if !KNOWN_PROVIDERS.contains(&provider.as_str())
                && !self.providers.contains_key(provider)
            {
                result.add_warning(format!("unknown provider '{}'", provider));
            }
        }

        for (provider, value) in &self.providers {
            result.absorb(
                &format!("providers.{}", provider),
                validate_provider_table(provider, value),
            );
        }

        check_timeout(
            &mut result,
            "exec_timeout_secs",
            self.exec_timeout_secs.map(Duration::from_secs),
        );
        check_timeout(
            &mut result,
            "script_timeout_secs",
            self.script_timeout_secs.map(Duration::from_secs),
        );

        if let Some(path) = &self.codex_path {
            if !path.exists() {
                result.add_warning(format!("codex_path '{}' does not exist", path.display()));
            }
        }

        result
    }
}

/// Checks a `[providers.<type>]` table against the settings the built-in
/// providers accept. Tables for other types only need to be tables.
fn validate_provider_table(provider: &str, value: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();
    if !value.is_object() {
        result.add_error("settings must be a table");
        return result;
    }

    let config = ProviderConfig::new(value.clone());
    let exec = match provider {
        CODEX_PROVIDER => config.parse::<CodexSettings>().map(|s| s.exec),
        NATIVE_PROVIDER => config.parse::<ExecSettings>(),
        _ => return result,
    };
    match exec {
        Ok(exec) => {
            let timeouts = [
                ("exec_timeout_secs", exec.exec_timeout_secs),
                ("script_timeout_secs", exec.script_timeout_secs),
                ("install_timeout_secs", exec.install_timeout_secs),
            ];
            for (name, secs) in timeouts {
                check_timeout(&mut result, name, secs.map(Duration::from_secs));
            }
        }
        Err(e) => result.add_error(e.to_string()),
    }
    result
}

impl Validate for ExecRequest {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.command.trim().is_empty() {
            result.add_error("command cannot be empty");
        }

        // Spawn reports a missing directory as a failed result.
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                result.add_warning(format!("working directory '{}' does not exist", cwd.display()));
            }
        }

        check_timeout(&mut result, "timeout", self.timeout);

        result
    }
}

impl Validate for ScriptOptions {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for package in &self.packages {
            if package.trim().is_empty() {
                result.add_error("package names cannot be empty");
            } else if package.starts_with('-') {
                result.add_error(format!("package '{}' looks like a command-line flag", package));
            }
        }

        check_timeout(&mut result, "timeout", self.timeout);

        result
    }
}
