use std::path::PathBuf;

use thiserror::Error;

use crate::symbols::ViewError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Module not found: {name} (tried: {})", .tried.join(", "))]
    ModuleNotFound { name: String, tried: Vec<String> },

    #[error("Module {name} loaded from {} is incompatible: {reason}", .path.display())]
    ModuleIncompatible {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Symbol table unavailable for {module}: {reason}")]
    SymbolTableUnavailable { module: String, reason: String },

    #[error("Failed to locate the following symbols for {module} library:\n{}", format_missing(.missing))]
    SymbolsUnresolved { module: String, missing: Vec<String> },

    #[error("Failed to create detour for {name}: {reason}")]
    HookInstall { name: String, reason: String },

    #[error("Target {target:#x} is already redirected by {existing}")]
    AlreadyBound { target: usize, existing: String },

    #[error("Cannot redirect {0}: target address is null")]
    NullTarget(String),

    #[error("Unknown hook handle: {0}")]
    UnknownHook(u32),

    #[error("Invalid image layout: {0}")]
    View(#[from] ViewError),

    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_missing(missing: &[String]) -> String {
    missing.iter().map(|name| format!("{name}\n")).collect()
}

impl Error {
    /// Errors the orchestrator always treats as fatal, regardless of hook priority
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::AlreadyBound { .. } | Error::UnknownHook(_) | Error::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_module_names_the_loaded_path() {
        let err = Error::ModuleIncompatible {
            name: "engine".to_string(),
            path: PathBuf::from("bin/engine_srv.so"),
            reason: "loaded but its image base is unknown".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Module engine loaded from bin/engine_srv.so is incompatible: loaded but its image base is unknown"
        );
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_unresolved_message_lists_every_symbol() {
        let err = Error::SymbolsUnresolved {
            module: "dedicated".to_string(),
            missing: vec!["_Z3foov".to_string(), "_Z3barv".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to locate the following symbols for dedicated library:\n_Z3foov\n_Z3barv\n"
        );
    }

    #[test]
    fn test_contract_violations() {
        let err = Error::AlreadyBound {
            target: 0x1000,
            existing: "Sys_LoadModule".to_string(),
        };
        assert!(err.is_contract_violation());
        assert!(!Error::NullTarget("x".to_string()).is_contract_violation());
    }
}
