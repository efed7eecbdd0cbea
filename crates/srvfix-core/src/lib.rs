//! # srvfix-core
//!
//! Core library for running Source engine dedicated servers headless.
//!
//! This crate provides:
//! - Module loading with game and engine override directories
//! - Lazy lookup of hidden (non-exported) symbols from ELF and Mach-O images
//! - Function redirection with tracked lifecycle and guaranteed teardown
//! - The start-up fixups that keep a dedicated server off the GUI and console paths
//! - Server responses (variable values, update notices) delivered to a listener
//!
//! ## Feature Flags
//!
//! - `debug-tools`: Enables [`SymbolDump`] for listing a module's symbol table.
//!   This feature is intended for CLI tools and development, not production use.

pub mod config;
pub mod engine;
pub mod error;
pub mod fixup;
pub mod hook;
pub mod listener;
pub mod module;
pub mod server_data;
pub mod symbols;

pub use config::{DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILTER, SrvfixConfig, SrvfixConfigBuilder};
pub use engine::{EngineDetector, EngineVariant, FixedEngine, UiMode, game_name_from_args};
pub use error::{Error, Result};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use fixup::NativeOrchestrator;
pub use fixup::{
    AppBundle, EngineCalls, FixupOrchestrator, FixupState, HookKind, InterceptionPlan,
    ModuleCatalog, NativeCalls, PlannedHook,
};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use hook::InlineBackend;
pub use hook::{
    Detour, DetourBackend, HookId, HookState, HookSummary, InterceptionManager, SlotBackend,
};
pub use listener::{ErrorReporter, GameListener, NullListener, TracingListener};
pub use module::{Candidate, LIB_EXT, Module, ModuleLoader, NamingConvention};
pub use server_data::{
    Dispatch, ResponseDispatcher, ResponseKind, ServerDataChannel, ServerResponse,
};
pub use symbols::{
    BatchResolution, HiddenSymbolResolver, ImageKind, IndexStats, SymbolIndex, SymbolRequest,
};

// Debug utilities (requires debug-tools feature)
#[cfg(feature = "debug-tools")]
pub use symbols::{SymbolDump, SymbolEntry};
