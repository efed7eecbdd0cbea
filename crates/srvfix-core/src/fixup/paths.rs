//! Repair of search paths when the server binary lives in an app bundle
//! (`Srcds.app/Contents/MacOS`).

use std::path::{Path, PathBuf};

/// Where the running binary's bundle sits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    /// Directory containing the `.app` bundle; the real game root
    pub root: PathBuf,
    /// Bundle path relative to `root`, with a leading separator
    pub suffix: String,
}

impl AppBundle {
    /// Locate the bundle of an executable at `<root>/<X>.app/Contents/MacOS/<exe>`.
    pub fn for_executable(exe: &Path) -> Option<Self> {
        let macos = exe.parent()?;
        let bundle = macos.parent()?.parent()?;
        let is_bundle = bundle
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
        if !is_bundle {
            return None;
        }
        let root = bundle.parent()?;
        let relative = macos.strip_prefix(root).ok()?;
        Some(Self {
            root: root.to_path_buf(),
            suffix: format!("/{}", relative.to_string_lossy()),
        })
    }

    /// Bundle of the running process
    pub fn current() -> Option<Self> {
        let exe = std::env::current_exe().ok()?;
        let exe = exe.canonicalize().unwrap_or(exe);
        Self::for_executable(&exe)
    }
}

/// `path` with the first case-insensitive occurrence of `bundle` removed,
/// or `None` when it does not occur.
pub fn strip_app_bundle(path: &str, bundle: &str) -> Option<String> {
    if bundle.is_empty() {
        return None;
    }
    // ASCII lowercasing keeps byte offsets, so the match position is valid in `path`
    let start = path.to_ascii_lowercase().find(&bundle.to_ascii_lowercase())?;
    let mut repaired = String::with_capacity(path.len() - bundle.len());
    repaired.push_str(&path[..start]);
    repaired.push_str(&path[start + bundle.len()..]);
    Some(repaired)
}
