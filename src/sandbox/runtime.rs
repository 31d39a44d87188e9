//! Script runtime detection, interpreter lookup and package installation.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::process::{self, ExecSettings, ProcessSpec};

/// Runtime used to execute a script file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptRuntime {
    /// JavaScript via Node.js.
    Node,
    /// TypeScript via the tsx transpiling runner.
    Tsx,
    /// Python 3.
    Python,
}

impl ScriptRuntime {
    /// All runtimes, in the order they are advertised.
    pub const ALL: [ScriptRuntime; 3] = [Self::Node, Self::Tsx, Self::Python];

    /// Infers the runtime from a file extension. Unknown extensions run as Python.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("js") | Some("mjs") | Some("cjs") => Self::Node,
            Some("ts") | Some("mts") | Some("cts") => Self::Tsx,
            _ => Self::Python,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Tsx => "tsx",
            Self::Python => "python",
        }
    }

    /// Human-readable runtime name used in messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Node => "Node.js",
            Self::Tsx => "tsx",
            Self::Python => "Python",
        }
    }

    /// Message returned to the caller when no interpreter could be found.
    pub fn missing_message(&self) -> String {
        let hint = match self {
            Self::Node => "Install Node.js (https://nodejs.org) and make sure `node` is on PATH.",
            Self::Tsx => "Install tsx with `npm install -g tsx`, or install Node.js so `npx tsx` can be used.",
            Self::Python => "Install Python 3 and make sure `python3` or `python` is on PATH.",
        };
        format!("{} is not installed. {}", self.display_name(), hint)
    }

    /// Locates an interpreter for this runtime.
    pub fn locate(&self, search_path: Option<&str>) -> Option<Interpreter> {
        match self {
            Self::Node => find_program("node", search_path).map(Interpreter::new),
            Self::Tsx => find_program("tsx", search_path)
                .map(Interpreter::new)
                .or_else(|| {
                    find_program("npx", search_path).map(|npx| Interpreter {
                        program: npx,
                        prefix_args: vec!["--yes".to_string(), "tsx".to_string()],
                    })
                }),
            Self::Python => find_program("python3", search_path)
                .or_else(|| find_program("python", search_path))
                .map(Interpreter::new),
        }
    }
}

impl fmt::Display for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A resolved interpreter: program plus arguments placed before the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl Interpreter {
    fn new(program: PathBuf) -> Self {
        Self {
            program,
            prefix_args: Vec::new(),
        }
    }

    /// Full argument list for running `script` with `args`.
    pub fn script_args(&self, script: &Path, args: &[String]) -> Vec<String> {
        let mut out = self.prefix_args.clone();
        out.push(script.to_string_lossy().into_owned());
        out.extend(args.iter().cloned());
        out
    }
}

/// Looks up `name` on `search_path`, or on the process PATH when unset.
pub fn find_program(name: &str, search_path: Option<&str>) -> Option<PathBuf> {
    match search_path {
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in(name, Some(paths), cwd).ok()
        }
        None => which::which(name).ok(),
    }
}

/// Builds the install command for `packages`.
///
/// Python packages go through `<python> -m pip`; JavaScript and TypeScript
/// packages through `npm install --no-save` in the working directory.
pub fn install_command(
    runtime: ScriptRuntime,
    interpreter: &Interpreter,
    packages: &[String],
    search_path: Option<&str>,
) -> Result<(PathBuf, Vec<String>)> {
    if let Some(bad) = packages.iter().find(|p| p.trim().is_empty() || p.starts_with('-')) {
        return Err(Error::PackageInstall {
            runtime: runtime.to_string(),
            reason: format!("invalid package name '{}'", bad),
        });
    }

    match runtime {
        ScriptRuntime::Python => {
            let mut args = vec![
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "--quiet".to_string(),
            ];
            args.extend(packages.iter().cloned());
            Ok((interpreter.program.clone(), args))
        }
        ScriptRuntime::Node | ScriptRuntime::Tsx => {
            let npm = find_program("npm", search_path).ok_or_else(|| Error::PackageInstall {
                runtime: runtime.to_string(),
                reason: "npm is not installed".to_string(),
            })?;
            let mut args = vec![
                "install".to_string(),
                "--no-save".to_string(),
                "--silent".to_string(),
            ];
            args.extend(packages.iter().cloned());
            Ok((npm, args))
        }
    }
}

/// Installs `packages` in `work_dir`, outside any sandbox.
///
/// Sandboxed execution usually has no network access, so dependencies must be
/// resolved before the sandbox is entered.
pub async fn install_packages(
    runtime: ScriptRuntime,
    interpreter: &Interpreter,
    packages: &[String],
    work_dir: &Path,
    settings: &ExecSettings,
) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }

    let (program, args) =
        install_command(runtime, interpreter, packages, settings.search_path.as_deref())?;

    tracing::info!(
        runtime = %runtime,
        packages = ?packages,
        work_dir = ?work_dir,
        "installing script packages"
    );

    let spec = ProcessSpec::new(program, settings.install_timeout())
        .with_args(args)
        .with_cwd(Some(work_dir.to_path_buf()));
    let result = process::run_captured(spec).await;

    if !result.success() {
        let detail = if result.stderr.trim().is_empty() {
            result.stdout.trim().to_string()
        } else {
            result.stderr.trim().to_string()
        };
        return Err(Error::PackageInstall {
            runtime: runtime.to_string(),
            reason: format!("installer exited with code {}: {}", result.exit_code, detail),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_runtime_from_extension() {
        assert_eq!(ScriptRuntime::from_path(Path::new("a.js")), ScriptRuntime::Node);
        assert_eq!(ScriptRuntime::from_path(Path::new("a.mjs")), ScriptRuntime::Node);
        assert_eq!(ScriptRuntime::from_path(Path::new("a.ts")), ScriptRuntime::Tsx);
        assert_eq!(ScriptRuntime::from_path(Path::new("a.MTS")), ScriptRuntime::Tsx);
        assert_eq!(ScriptRuntime::from_path(Path::new("a.py")), ScriptRuntime::Python);
        assert_eq!(ScriptRuntime::from_path(Path::new("script")), ScriptRuntime::Python);
    }

    #[test]
    fn runtime_serializes_to_lowercase() {
        assert_eq!(serde_json::to_string(&ScriptRuntime::Tsx).unwrap(), "\"tsx\"");
        assert_eq!(ScriptRuntime::Python.to_string(), "python");
    }

    #[test]
    fn missing_python_message_is_actionable() {
        let msg = ScriptRuntime::Python.missing_message();
        assert!(msg.starts_with("Python is not installed"));
        assert!(msg.contains("python3"));
    }

    #[test]
    fn locate_returns_none_on_empty_search_path() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = dir.path().to_str().unwrap();

        for runtime in ScriptRuntime::ALL {
            assert!(runtime.locate(Some(path)).is_none(), "{} found", runtime);
        }
    }

    #[test]
    fn script_args_prepend_interpreter_prefix() {
        let interpreter = Interpreter {
            program: PathBuf::from("/usr/bin/npx"),
            prefix_args: vec!["--yes".to_string(), "tsx".to_string()],
        };

        let args = interpreter.script_args(Path::new("main.ts"), &["--flag".to_string()]);
        assert_eq!(args, vec!["--yes", "tsx", "main.ts", "--flag"]);
    }

    #[test]
    fn python_install_uses_pip_module() {
        let interpreter = Interpreter::new(PathBuf::from("/usr/bin/python3"));
        let (program, args) = install_command(
            ScriptRuntime::Python,
            &interpreter,
            &["requests".to_string()],
            None,
        )
        .unwrap();

        assert_eq!(program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(args, vec!["-m", "pip", "install", "--quiet", "requests"]);
    }

    #[test]
    fn install_rejects_option_like_package_names() {
        let interpreter = Interpreter::new(PathBuf::from("python3"));
        let err = install_command(
            ScriptRuntime::Python,
            &interpreter,
            &["--index-url=http://evil".to_string()],
            None,
        )
        .unwrap_err();

        assert!(matches!(err, Error::PackageInstall { .. }));
    }

    #[test]
    fn node_install_without_npm_fails() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let interpreter = Interpreter::new(PathBuf::from("node"));

        let err = install_command(
            ScriptRuntime::Node,
            &interpreter,
            &["lodash".to_string()],
            dir.path().to_str(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("npm is not installed"));
    }

    #[tokio::test]
    async fn install_with_no_packages_is_a_no_op() {
        let interpreter = Interpreter::new(PathBuf::from("/definitely/missing"));
        let result = install_packages(
            ScriptRuntime::Python,
            &interpreter,
            &[],
            Path::new("."),
            &ExecSettings::default(),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failed_install_is_a_distinct_error() {
        let interpreter = Interpreter::new(PathBuf::from("/definitely/missing/python"));
        let err = install_packages(
            ScriptRuntime::Python,
            &interpreter,
            &["requests".to_string()],
            Path::new("."),
            &ExecSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PackageInstall { .. }));
    }
}
