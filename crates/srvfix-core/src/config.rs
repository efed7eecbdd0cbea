//! Runtime configuration, loaded from `srvfix.toml`.
//!
//! ## Example
//!
//! ```ignore
//! use srvfix_core::{SrvfixConfig, UiMode};
//!
//! // Read the file, falling back to defaults when it does not exist
//! let config = SrvfixConfig::load("srvfix.toml")?;
//!
//! // Or build one in code
//! let config = SrvfixConfig::builder()
//!     .game("cstrike")
//!     .ui_mode(UiMode::Gui)
//!     .exit_on_fatal(false)
//!     .build();
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{EngineVariant, UiMode};
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "srvfix.toml";
pub const DEFAULT_LOG_FILTER: &str = "srvfix=info";

/// Configuration for module loading and fixups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrvfixConfig {
    /// Game directory name, enables `game/<game>/` overrides
    pub game: Option<String>,
    /// Engine branch, enables `engine/<variant>/` overrides
    pub engine: Option<EngineVariant>,
    /// Directory the `game/` and `engine/` override trees live under
    pub override_root: PathBuf,
    /// Directories tried for stock module names before the loader's own search
    pub search_paths: Vec<PathBuf>,
    pub ui_mode: UiMode,
    /// Terminate the process after reporting a fatal error
    pub exit_on_fatal: bool,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for SrvfixConfig {
    fn default() -> Self {
        Self {
            game: None,
            engine: None,
            override_root: PathBuf::from("."),
            search_paths: Vec::new(),
            ui_mode: UiMode::Console,
            exit_on_fatal: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl SrvfixConfig {
    /// Create a new configuration builder
    pub fn builder() -> SrvfixConfigBuilder {
        SrvfixConfigBuilder::default()
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using default configuration", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.log_filter.trim().is_empty() {
            return Err(Error::Config("log_filter must not be empty".to_string()));
        }
        if self.game.as_deref().is_some_and(|g| g.contains('/')) {
            return Err(Error::Config(
                "game must be a directory name, not a path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SrvfixConfig
#[derive(Debug, Clone, Default)]
pub struct SrvfixConfigBuilder {
    game: Option<String>,
    engine: Option<EngineVariant>,
    override_root: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    ui_mode: Option<UiMode>,
    exit_on_fatal: Option<bool>,
    log_filter: Option<String>,
}

impl SrvfixConfigBuilder {
    /// Set the game directory name
    pub fn game<S: Into<String>>(mut self, game: S) -> Self {
        self.game = Some(game.into());
        self
    }

    /// Set the engine branch
    pub fn engine(mut self, engine: EngineVariant) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the directory holding the override trees
    pub fn override_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.override_root = Some(path.into());
        self
    }

    /// Add a search directory for stock module names
    pub fn search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn ui_mode(mut self, mode: UiMode) -> Self {
        self.ui_mode = Some(mode);
        self
    }

    /// Terminate on fatal errors instead of returning them
    pub fn exit_on_fatal(mut self, enabled: bool) -> Self {
        self.exit_on_fatal = Some(enabled);
        self
    }

    pub fn log_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> SrvfixConfig {
        let default = SrvfixConfig::default();
        SrvfixConfig {
            game: self.game.or(default.game),
            engine: self.engine.or(default.engine),
            override_root: self.override_root.unwrap_or(default.override_root),
            search_paths: self.search_paths,
            ui_mode: self.ui_mode.unwrap_or(default.ui_mode),
            exit_on_fatal: self.exit_on_fatal.unwrap_or(default.exit_on_fatal),
            log_filter: self.log_filter.unwrap_or(default.log_filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SrvfixConfig::builder().build();
        assert_eq!(config, SrvfixConfig::default());
        assert!(config.exit_on_fatal);
        assert_eq!(config.log_filter, "srvfix=info");
    }

    #[test]
    fn test_builder_overrides() {
        let config = SrvfixConfig::builder()
            .game("csgo")
            .engine(EngineVariant::Csgo)
            .ui_mode(UiMode::Gui)
            .exit_on_fatal(false)
            .search_path("bin")
            .search_path("bin/linux64")
            .build();
        assert_eq!(config.game.as_deref(), Some("csgo"));
        assert_eq!(config.engine, Some(EngineVariant::Csgo));
        assert_eq!(config.ui_mode, UiMode::Gui);
        assert!(!config.exit_on_fatal);
        assert_eq!(config.search_paths.len(), 2);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SrvfixConfig::from_toml(
            r#"
            game = "left4dead2"
            engine = "l4d2"
            ui_mode = "gui"
            search_paths = ["bin"]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine, Some(EngineVariant::Left4Dead2));
        assert_eq!(config.ui_mode, UiMode::Gui);
        assert_eq!(config.override_root, PathBuf::from("."));
        assert!(config.exit_on_fatal);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            SrvfixConfig::from_toml("engine = \"dota2\""),
            Err(Error::Toml(_))
        ));
        assert!(matches!(
            SrvfixConfig::from_toml("log_filter = \"\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SrvfixConfig::from_toml("game = \"../cstrike\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SrvfixConfig::load(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, SrvfixConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = SrvfixConfig::builder()
            .game("tf")
            .engine(EngineVariant::Source2013)
            .exit_on_fatal(false)
            .build();

        config.save(&path).unwrap();
        assert_eq!(SrvfixConfig::load(&path).unwrap(), config);
    }
}
