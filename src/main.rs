//! Sandbox Exec CLI
//!
//! CLI tool for running commands and scripts through the best available sandbox.

use std::path::PathBuf;

use sandbox_exec::{
    AnnotatedResult, ExecRequest, SandboxConfig, SandboxExecutor, ScriptOptions, Validate,
};

fn usage(program: &str) {
    eprintln!("Usage: {} <command> [arguments]", program);
    eprintln!("\nCommands:");
    eprintln!("  info                                  Show which provider would run commands");
    eprintln!("  providers                             List registered providers and availability");
    eprintln!("  exec <command> [args...]              Run a command in the sandbox");
    eprintln!("  script <file> [--package <pkg>]... [-- args...]");
    eprintln!("                                        Run a script file in the sandbox");
    eprintln!("\nEnvironment variables:");
    eprintln!("  SANDBOX_PROVIDER=codex|native         Preferred provider");
    eprintln!("  SANDBOX_CODEX_PATH=<path>             Path to the codex executable");
    eprintln!("  SANDBOX_EXEC_CONFIG=<file>            TOML or YAML config file");
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("sandbox-exec");

    if args.len() < 2 {
        usage(program);
        std::process::exit(1);
    }

    let config = match SandboxConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!(warning = %warning, "sandbox config");
    }
    if let Err(e) = validation.into_result() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let executor = SandboxExecutor::from_config(&config);

    let code = match args[1].as_str() {
        "info" => {
            let info = executor.info().await;
            print_json(&info);
            if info.available {
                0
            } else {
                1
            }
        }
        "providers" => {
            let available = executor.available_providers().await;
            for provider_type in executor.registry().registered_types() {
                let Some(metadata) = executor.registry().metadata(&provider_type) else {
                    continue;
                };
                let status = if available.contains(&provider_type) {
                    "available"
                } else {
                    "unavailable"
                };
                println!(
                    "{:<10} {:<16} {:<10} {}",
                    provider_type, metadata.name, metadata.isolation, status
                );
            }
            0
        }
        "exec" if args.len() >= 3 => {
            let request = ExecRequest::new(&args[2]).with_args(args[3..].iter().cloned());
            report(executor.exec(request).await)
        }
        "script" if args.len() >= 3 => {
            let file = PathBuf::from(&args[2]);
            let options = match parse_script_options(&args[3..]) {
                Ok(options) => options,
                Err(msg) => {
                    eprintln!("{}", msg);
                    usage(program);
                    std::process::exit(1);
                }
            };
            let work_dir = match std::env::current_dir() {
                Ok(dir) => dir,
                Err(e) => {
                    eprintln!("Failed to get current directory: {}", e);
                    std::process::exit(1);
                }
            };
            report(executor.run_script(&file, &work_dir, options).await)
        }
        _ => {
            usage(program);
            1
        }
    };

    executor.stop_all().await;
    std::process::exit(code);
}

fn parse_script_options(args: &[String]) -> Result<ScriptOptions, String> {
    let mut options = ScriptOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--package" | "-p" => match iter.next() {
                Some(package) => options.packages.push(package.clone()),
                None => return Err(format!("{} requires a package name", arg)),
            },
            "--" => {
                options.args.extend(iter.by_ref().cloned());
            }
            other => options.args.push(other.to_string()),
        }
    }
    Ok(options)
}

fn report(result: sandbox_exec::Result<AnnotatedResult>) -> i32 {
    match result {
        Ok(result) => {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            eprintln!("\n{}", "=".repeat(60));
            eprintln!(
                "Provider: {} ({} isolation)",
                result.provider.name, result.provider.isolation
            );
            if let Some(reason) = &result.fallback_reason {
                eprintln!("Fallback: {}", reason);
            }
            eprintln!("Exit code: {}", result.exit_code);
            eprintln!("Duration: {:?}", result.duration);
            result.exit_code
        }
        Err(e) => {
            eprintln!("Execution failed: {}", e);
            1
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}
