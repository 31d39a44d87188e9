//! Sandbox module for isolated command execution.
//!
//! This module provides the [`SandboxProvider`] capability contract, the
//! [`ProviderRegistry`] that caches one instance per provider type, the
//! [`FallbackSelector`] and the built-in [`CodexProvider`] and
//! [`NativeProvider`] implementations.

mod codex;
mod native;
mod process;
mod provider;
mod registry;
mod runtime;
mod selector;

pub use codex::{
    bundled_binary_name, sandbox_subcommand, CodexLocator, CodexProvider, CodexSettings,
    DiscoverySource, CODEX_PROVIDER,
};
pub use native::{NativeProvider, NATIVE_PROVIDER};
pub use process::{
    command_line, run_captured, ExecSettings, ProcessSpec, DEFAULT_EXEC_TIMEOUT,
    DEFAULT_INSTALL_TIMEOUT, DEFAULT_SCRIPT_TIMEOUT, TIMEOUT_EXIT_CODE,
};
pub use provider::{
    ExecRequest, ExecResult, IsolationLevel, ProviderCapabilities, ProviderConfig,
    ProviderMetadata, SandboxProvider, ScriptOptions, VolumeMount,
};
pub use registry::{
    InstanceInfo, InstanceState, ProviderFactory, ProviderPlugin, ProviderRegistry,
    DEFAULT_PRIORITY,
};
pub use runtime::{find_program, Interpreter, ScriptRuntime};
pub use selector::{FallbackSelector, ProviderSelection};
