//! Sandbox Exec - run commands and scripts through the best available sandbox
//!
//! This library selects among the isolation mechanisms installed on the host
//! (an OS-level process sandbox via the Codex CLI, or direct native execution)
//! and runs work through a uniform contract: command in, captured output and
//! exit status out, annotated with the provider that serviced it.

pub mod config;
pub mod error;
pub mod executor;
pub mod sandbox;

pub use error::{Error, Result};
pub use executor::{AnnotatedResult, ProviderTag, SandboxExecutor, SandboxInfo};
pub use sandbox::{
    CodexProvider, ExecRequest, ExecResult, FallbackSelector, InstanceInfo, InstanceState,
    IsolationLevel, NativeProvider, ProviderCapabilities, ProviderConfig, ProviderMetadata,
    ProviderPlugin, ProviderRegistry, ProviderSelection, SandboxProvider, ScriptOptions,
    ScriptRuntime, VolumeMount, CODEX_PROVIDER, NATIVE_PROVIDER,
};

pub use config::{SandboxConfig, Validate, ValidationResult, KNOWN_PROVIDERS};
