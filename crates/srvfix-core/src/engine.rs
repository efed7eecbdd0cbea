use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Source engine branch the dedicated server was built from.
///
/// The string form is the directory name used for engine override modules
/// (`engine/<variant>/<module>.ovrd<ext>`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Display,
)]
pub enum EngineVariant {
    /// Also covers Orange Box and Source 2009 servers
    #[strum(serialize = "s2013")]
    #[serde(rename = "s2013")]
    Source2013,
    #[strum(serialize = "l4d")]
    #[serde(rename = "l4d")]
    Left4Dead,
    #[strum(serialize = "l4d2")]
    #[serde(rename = "l4d2")]
    Left4Dead2,
    #[strum(serialize = "nd")]
    #[serde(rename = "nd")]
    NuclearDawn,
    #[strum(serialize = "csgo")]
    #[serde(rename = "csgo")]
    Csgo,
    #[strum(serialize = "ins")]
    #[serde(rename = "ins")]
    Insurgency,
}

impl EngineVariant {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Branches whose launcher expects `VGUI_Surface031` instead of `030`
    pub fn uses_newer_surface(&self) -> bool {
        matches!(self, Self::NuclearDawn | Self::Left4Dead2 | Self::Csgo)
    }
}

/// How the server is presented to the user.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UiMode {
    /// Plain terminal; the engine drives its own console
    #[default]
    Console,
    /// Interactive front end; console, frame and spew entry points are redirected
    Gui,
}

impl UiMode {
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Gui)
    }
}

/// Classifies the running engine branch.
///
/// Implementations probe the engine's public interface factories; that
/// heuristic lives outside this crate.
pub trait EngineDetector {
    fn detect(&self) -> Option<EngineVariant>;
}

/// Detector that always answers with a fixed, caller-supplied variant
#[derive(Debug, Clone, Copy)]
pub struct FixedEngine(pub EngineVariant);

impl EngineDetector for FixedEngine {
    fn detect(&self) -> Option<EngineVariant> {
        Some(self.0)
    }
}

/// Game directory named by `-game <name>` on the server command line.
pub fn game_name_from_args<I, S>(args: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg.as_ref() == "-game" {
            return args.next().map(|name| name.as_ref().to_string());
        }
    }
    None
}
