//! Process-isolated provider backed by the Codex CLI `sandbox` front-end.
//!
//! Commands are wrapped as `codex sandbox <os> --full-auto -- <command>`.
//! The front-end confines the child to the working directory and blocks
//! outbound network access, so script dependencies are installed before the
//! sandbox is entered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

use super::native::exec_settings_schema;
use super::process::{self, ExecSettings, ProcessSpec};
use super::provider::{
    ExecRequest, ExecResult, IsolationLevel, ProviderCapabilities, ProviderConfig,
    ProviderMetadata, SandboxProvider, ScriptOptions,
};
use super::registry::ProviderPlugin;
use super::runtime::{self, ScriptRuntime};

/// Registry key of the Codex provider.
pub const CODEX_PROVIDER: &str = "codex";

const CODEX_BINARY: &str = "codex";

/// Settings accepted by the Codex provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexSettings {
    /// Explicit path to the codex executable.
    pub codex_path: Option<PathBuf>,
    /// Directory holding bundled `codex-<target>` binaries.
    pub bundled_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub exec: ExecSettings,
}

/// Where the codex executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Explicit configuration override.
    Configured,
    /// PATH lookup.
    Path,
    /// One of the common install locations.
    CommonLocation,
    /// Bundled copy shipped with the application.
    Bundled,
}

/// Resolves the codex executable, checking each tier in order.
#[derive(Debug, Clone)]
pub struct CodexLocator {
    configured: Option<PathBuf>,
    search_path: Option<String>,
    common_dirs: Vec<PathBuf>,
    bundled_dir: Option<PathBuf>,
}

impl CodexLocator {
    /// Builds a locator from provider settings and the host's defaults.
    pub fn from_settings(settings: &CodexSettings) -> Self {
        Self {
            configured: settings.codex_path.clone(),
            search_path: settings.exec.search_path.clone(),
            common_dirs: common_install_dirs(),
            bundled_dir: settings.bundled_dir.clone().or_else(default_bundled_dir),
        }
    }

    /// Replaces the list of common install directories.
    pub fn with_common_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.common_dirs = dirs;
        self
    }

    /// Returns the first executable found, or `None` if codex is not installed.
    pub fn locate(&self) -> Option<(PathBuf, DiscoverySource)> {
        if let Some(path) = &self.configured {
            if path.is_file() {
                return Some((path.clone(), DiscoverySource::Configured));
            }
            tracing::warn!(path = ?path, "configured codex path does not exist, searching");
        }

        if let Some(path) = runtime::find_program(CODEX_BINARY, self.search_path.as_deref()) {
            return Some((path, DiscoverySource::Path));
        }

        let name = executable_name(CODEX_BINARY);
        if let Some(path) = self
            .common_dirs
            .iter()
            .map(|dir| dir.join(&name))
            .find(|p| p.is_file())
        {
            return Some((path, DiscoverySource::CommonLocation));
        }

        let bundled = bundled_binary_name(std::env::consts::OS, std::env::consts::ARCH)?;
        self.bundled_dir
            .as_ref()
            .map(|dir| dir.join(bundled))
            .filter(|p| p.is_file())
            .map(|p| (p, DiscoverySource::Bundled))
    }
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

fn common_install_dirs() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local").join("bin"));
        candidates.push(home.join(".npm-global").join("bin"));
        candidates.push(home.join(".cargo").join("bin"));
        candidates.push(home.join(".bun").join("bin"));
    }
    candidates
}

fn default_bundled_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("vendor")))
}

/// Name of the bundled codex binary for an OS and CPU architecture.
pub fn bundled_binary_name(os: &str, arch: &str) -> Option<String> {
    let arch = match arch {
        "x86_64" | "aarch64" => arch,
        _ => return None,
    };
    let name = match os {
        "linux" => format!("codex-{}-unknown-linux-musl", arch),
        "macos" => format!("codex-{}-apple-darwin", arch),
        "windows" => format!("codex-{}-pc-windows-msvc.exe", arch),
        _ => return None,
    };
    Some(name)
}

/// `codex sandbox` subcommand for the current OS family.
pub fn sandbox_subcommand() -> Option<&'static str> {
    match std::env::consts::OS {
        "linux" => Some("linux"),
        "macos" => Some("macos"),
        "windows" => Some("windows"),
        _ => None,
    }
}

/// Builds the wrapped argument list passed to the codex executable.
fn sandbox_args(os: &str, program: &Path, args: &[String]) -> Vec<String> {
    let mut out = vec![
        "sandbox".to_string(),
        os.to_string(),
        // Write access scoped to the working directory; outputs land there.
        "--full-auto".to_string(),
        "--".to_string(),
        program.to_string_lossy().into_owned(),
    ];
    out.extend(args.iter().cloned());
    out
}

/// Executes work through `codex sandbox`.
pub struct CodexProvider {
    settings: RwLock<CodexSettings>,
    binary: RwLock<Option<PathBuf>>,
}

impl Default for CodexProvider {
    fn default() -> Self {
        Self::new(CodexSettings::default())
    }
}

impl CodexProvider {
    /// Creates a Codex provider with the given settings.
    pub fn new(settings: CodexSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            binary: RwLock::new(None),
        }
    }

    /// Static metadata for registration.
    pub fn metadata() -> ProviderMetadata {
        let mut schema = exec_settings_schema();
        if let Some(props) = schema
            .get_mut("properties")
            .and_then(|p| p.as_object_mut())
        {
            props.insert("codex_path".to_string(), json!({ "type": "string" }));
            props.insert("bundled_dir".to_string(), json!({ "type": "string" }));
        }

        ProviderMetadata {
            provider_type: CODEX_PROVIDER.to_string(),
            name: "Codex Sandbox".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "OS-level process sandbox via the Codex CLI (Seatbelt on macOS, Landlock/seccomp on Linux)".to_string(),
            isolation: IsolationLevel::Process,
            runtimes: ScriptRuntime::ALL.to_vec(),
            supports_volume_mounts: false,
            supports_networking: false,
            supports_pooling: false,
            config_schema: schema,
        }
    }

    /// Registry plugin for this provider.
    pub fn plugin() -> ProviderPlugin {
        ProviderPlugin::new(Self::metadata(), |config| {
            let settings: CodexSettings = config.parse()?;
            Ok(Arc::new(CodexProvider::new(settings)))
        })
    }

    fn locator(&self) -> CodexLocator {
        CodexLocator::from_settings(&self.settings.read())
    }

    /// Returns the initialized binary, or resolves it on demand.
    fn binary(&self) -> Option<PathBuf> {
        if let Some(path) = self.binary.read().clone() {
            return Some(path);
        }
        self.locator().locate().map(|(path, _)| path)
    }

    async fn run_wrapped(
        &self,
        program: &Path,
        args: &[String],
        cwd: Option<PathBuf>,
        env: std::collections::HashMap<String, String>,
        timeout: Duration,
    ) -> ExecResult {
        let Some(os) = sandbox_subcommand() else {
            return ExecResult::failure(
                format!("codex sandbox is not supported on {}", std::env::consts::OS),
                Duration::ZERO,
            );
        };
        let Some(codex) = self.binary() else {
            return ExecResult::failure(
                "Codex CLI is not installed. Install it with `npm install -g @openai/codex` or set codex_path.",
                Duration::ZERO,
            );
        };

        let spec = ProcessSpec::new(codex, timeout)
            .with_args(sandbox_args(os, program, args))
            .with_cwd(cwd)
            .with_env(env);
        process::run_captured(spec).await
    }
}

#[async_trait]
impl SandboxProvider for CodexProvider {
    fn provider_type(&self) -> &str {
        CODEX_PROVIDER
    }

    async fn is_available(&self) -> bool {
        if sandbox_subcommand().is_none() {
            return false;
        }
        match self.locator().locate() {
            Some((path, source)) => {
                tracing::debug!(path = ?path, source = ?source, "codex sandbox available");
                true
            }
            None => {
                tracing::debug!("codex sandbox not installed");
                false
            }
        }
    }

    async fn init(&self, config: &ProviderConfig) -> Result<()> {
        let settings: CodexSettings = config.parse()?;
        if sandbox_subcommand().is_none() {
            return Err(Error::Config(format!(
                "codex sandbox is not supported on {}",
                std::env::consts::OS
            )));
        }

        let (path, source) = CodexLocator::from_settings(&settings)
            .locate()
            .ok_or_else(|| Error::NotInstalled("Codex CLI".to_string()))?;

        tracing::info!(path = ?path, source = ?source, "codex sandbox initialized");

        *self.settings.write() = settings;
        *self.binary.write() = Some(path);
        Ok(())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecResult> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.settings.read().exec.exec_timeout());
        let (shell, shell_args) =
            process::shell_invocation(process::command_line(&request.command, &request.args));

        tracing::debug!(command = %request.command, cwd = ?request.cwd, "codex exec");

        Ok(self
            .run_wrapped(&shell, &shell_args, request.cwd, request.env, timeout)
            .await)
    }

    async fn run_script(
        &self,
        file_path: &Path,
        work_dir: &Path,
        options: ScriptOptions,
    ) -> Result<ExecResult> {
        let settings = self.settings.read().exec.clone();
        let runtime = options
            .runtime
            .unwrap_or_else(|| ScriptRuntime::from_path(file_path));

        let Some(interpreter) = runtime.locate(settings.search_path.as_deref()) else {
            tracing::warn!(runtime = %runtime, script = ?file_path, "interpreter not found");
            return Ok(ExecResult::failure(runtime.missing_message(), Duration::ZERO));
        };

        // Outside the sandbox: the sandbox has no network.
        runtime::install_packages(runtime, &interpreter, &options.packages, work_dir, &settings)
            .await?;

        let timeout = options.timeout.unwrap_or_else(|| settings.script_timeout());
        let args = interpreter.script_args(file_path, &options.args);

        tracing::debug!(runtime = %runtime, script = ?file_path, "codex run_script");

        Ok(self
            .run_wrapped(
                &interpreter.program,
                &args,
                Some(work_dir.to_path_buf()),
                options.env,
                timeout,
            )
            .await)
    }

    async fn shutdown(&self) -> Result<()> {
        if self.binary.write().take().is_some() {
            tracing::debug!("codex provider stopped");
        }
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        Self::metadata().capabilities()
    }
}
