//! File names tried, in order, when opening a module by logical name.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::engine::EngineVariant;

#[cfg(target_vendor = "apple")]
pub const LIB_EXT: &str = ".dylib";
#[cfg(not(target_vendor = "apple"))]
pub const LIB_EXT: &str = ".so";

/// Which transformation of the logical name produced the file that opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, IntoStaticStr, Display)]
pub enum NamingConvention {
    /// `game/<game>/<name>.ovrd<ext>`
    GameOverride,
    /// `engine/<variant>/<name>.ovrd<ext>`
    EngineOverride,
    /// `<name>_srv<ext>`
    ServerSuffix,
    /// `<name><ext>`
    Plain,
    /// `lib<name>_srv<ext>`
    LibPrefixServerSuffix,
    /// `lib<name><ext>`
    LibPrefix,
}

impl NamingConvention {
    pub fn is_override(&self) -> bool {
        matches!(self, Self::GameOverride | Self::EngineOverride)
    }

    /// File name for `name` under this convention, without any directory.
    pub fn file_name(&self, name: &str) -> String {
        match self {
            Self::GameOverride | Self::EngineOverride => format!("{name}.ovrd{LIB_EXT}"),
            Self::ServerSuffix => format!("{name}_srv{LIB_EXT}"),
            Self::Plain => format!("{name}{LIB_EXT}"),
            Self::LibPrefixServerSuffix => format!("lib{name}_srv{LIB_EXT}"),
            Self::LibPrefix => format!("lib{name}{LIB_EXT}"),
        }
    }
}

/// Stock conventions for this platform, in priority order.
#[cfg(not(target_vendor = "apple"))]
pub const STOCK_CONVENTIONS: &[NamingConvention] = &[
    NamingConvention::ServerSuffix,
    NamingConvention::Plain,
    NamingConvention::LibPrefixServerSuffix,
    NamingConvention::LibPrefix,
];

#[cfg(target_vendor = "apple")]
pub const STOCK_CONVENTIONS: &[NamingConvention] =
    &[NamingConvention::Plain, NamingConvention::LibPrefix];

/// One path handed to the platform loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub path: PathBuf,
    pub convention: NamingConvention,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Inputs that decide which candidates exist for a module.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub game: Option<&'a str>,
    pub engine: Option<EngineVariant>,
    pub override_root: &'a Path,
    pub search_paths: &'a [PathBuf],
}

/// Every path tried for `name`, in order.
///
/// Override paths come first and are only produced when the game name or
/// engine variant is known. Stock names are tried in each search directory
/// before the bare file names go to the platform loader's own search.
pub fn candidates(name: &str, ctx: &SearchContext<'_>) -> Vec<Candidate> {
    let mut out = Vec::new();

    if let Some(game) = ctx.game.filter(|g| !g.is_empty()) {
        out.push(Candidate {
            path: ctx
                .override_root
                .join("game")
                .join(game)
                .join(NamingConvention::GameOverride.file_name(name)),
            convention: NamingConvention::GameOverride,
        });
    }
    if let Some(engine) = ctx.engine {
        out.push(Candidate {
            path: ctx
                .override_root
                .join("engine")
                .join(engine.as_str())
                .join(NamingConvention::EngineOverride.file_name(name)),
            convention: NamingConvention::EngineOverride,
        });
    }

    for dir in ctx.search_paths {
        for convention in STOCK_CONVENTIONS {
            out.push(Candidate {
                path: dir.join(convention.file_name(name)),
                convention: *convention,
            });
        }
    }
    for convention in STOCK_CONVENTIONS {
        out.push(Candidate {
            path: PathBuf::from(convention.file_name(name)),
            convention: *convention,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.path.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_stock_names_only_without_game_or_engine() {
        let ctx = SearchContext {
            game: None,
            engine: None,
            override_root: Path::new("."),
            search_paths: &[],
        };
        let list = candidates("engine", &ctx);
        assert_eq!(list.len(), STOCK_CONVENTIONS.len());
        assert!(list.iter().all(|c| !c.convention.is_override()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_order_with_overrides() {
        let ctx = SearchContext {
            game: Some("cstrike"),
            engine: Some(EngineVariant::Source2013),
            override_root: Path::new("/srv"),
            search_paths: &[PathBuf::from("/srv/bin")],
        };
        let list = candidates("engine", &ctx);
        assert_eq!(
            paths(&list),
            vec![
                "/srv/game/cstrike/engine.ovrd.so",
                "/srv/engine/s2013/engine.ovrd.so",
                "/srv/bin/engine_srv.so",
                "/srv/bin/engine.so",
                "/srv/bin/libengine_srv.so",
                "/srv/bin/libengine.so",
                "engine_srv.so",
                "engine.so",
                "libengine_srv.so",
                "libengine.so",
            ]
        );
        assert_eq!(list[0].convention, NamingConvention::GameOverride);
        assert_eq!(list[1].convention, NamingConvention::EngineOverride);
        assert_eq!(list[9].convention, NamingConvention::LibPrefix);
    }

    #[test]
    fn test_empty_game_name_has_no_override() {
        let ctx = SearchContext {
            game: Some(""),
            engine: None,
            override_root: Path::new("."),
            search_paths: &[],
        };
        assert!(
            candidates("tier0", &ctx)
                .iter()
                .all(|c| c.convention != NamingConvention::GameOverride)
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            NamingConvention::LibPrefixServerSuffix.file_name("tier0"),
            format!("libtier0_srv{LIB_EXT}")
        );
        assert_eq!(
            NamingConvention::EngineOverride.file_name("dedicated"),
            format!("dedicated.ovrd{LIB_EXT}")
        );
    }
}
