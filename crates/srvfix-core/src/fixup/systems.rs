//! Engine app systems registered around `CSys::LoadModules`, and the
//! module-name policy of the `Sys_LoadModule` replacement.

use std::ffi::{CString, c_char};

use serde::Serialize;

use crate::engine::EngineVariant;
use crate::module::LIB_EXT;

pub const SDL_MGR_INTERFACE: &str = "SDLMgrInterface001";
pub const COCOA_MGR_INTERFACE: &str = "CocoaMgrInterface006";

/// Interface name the launcher manager is registered under
pub fn manager_interface(uses_sdl: bool) -> &'static str {
    if uses_sdl {
        SDL_MGR_INTERFACE
    } else {
        COCOA_MGR_INTERFACE
    }
}

/// A module file and the interface the app-system group should pull from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSystem {
    pub module: String,
    pub interface: &'static str,
}

impl AppSystem {
    fn new(name: &str, interface: &'static str) -> Self {
        Self {
            module: format!("{name}{LIB_EXT}"),
            interface,
        }
    }
}

/// Registered before the original `LoadModules` runs
pub fn pre_systems(engine: EngineVariant) -> Vec<AppSystem> {
    let mut systems = vec![AppSystem::new("inputsystem", "InputSystemVersion001")];
    if engine == EngineVariant::Csgo {
        systems.push(AppSystem::new("soundemittersystem", "VSoundEmitter003"));
    }
    systems
}

/// Registered after the original `LoadModules` returns
pub fn post_systems(engine: EngineVariant) -> Vec<AppSystem> {
    let surface = if engine.uses_newer_surface() {
        "VGUI_Surface031"
    } else {
        "VGUI_Surface030"
    };
    vec![
        AppSystem::new("vguimatsurface", surface),
        AppSystem::new("vgui2", "VGUI_ivgui008"),
    ]
}

/// `AppSystemInfo_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AppSystemInfo {
    pub module_name: *const c_char,
    pub interface_name: *const c_char,
}

/// A native `AppSystemInfo_t` array terminated by an empty entry, with the
/// strings it points at.
#[derive(Debug)]
pub struct NativeSystemList {
    _strings: Vec<CString>,
    entries: Vec<AppSystemInfo>,
}

impl NativeSystemList {
    pub fn new(systems: &[AppSystem]) -> Self {
        let mut strings = Vec::with_capacity(systems.len() * 2 + 1);
        for system in systems {
            strings.push(CString::new(system.module.as_str()).unwrap_or_default());
            strings.push(CString::new(system.interface).unwrap_or_default());
        }
        strings.push(CString::default());

        let empty = strings[strings.len() - 1].as_ptr();
        let mut entries: Vec<AppSystemInfo> = strings[..strings.len() - 1]
            .chunks(2)
            .map(|pair| AppSystemInfo {
                module_name: pair[0].as_ptr(),
                interface_name: pair[1].as_ptr(),
            })
            .collect();
        entries.push(AppSystemInfo {
            module_name: empty,
            interface_name: empty,
        });

        Self {
            _strings: strings,
            entries,
        }
    }

    pub fn as_ptr(&self) -> *const AppSystemInfo {
        self.entries.as_ptr()
    }

    /// Entries including the terminator
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

/// What the `Sys_LoadModule` replacement does with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDecision {
    /// Return no handle without calling the loader
    Refuse,
    Keep,
    Rename(String),
}

pub fn module_load_decision(name: &str, engine: EngineVariant) -> LoadDecision {
    // libcef leaks autorelease pools when loaded headless
    if name.contains("chromehtml") {
        return LoadDecision::Refuse;
    }
    if engine == EngineVariant::Csgo {
        let dedicated = format!("matchmaking_ds{LIB_EXT}");
        if name.contains(&dedicated) {
            return LoadDecision::Rename(name.replacen(&dedicated, &format!("matchmaking{LIB_EXT}"), 1));
        }
    }
    LoadDecision::Keep
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    #[test]
    fn test_pre_systems_per_engine() {
        let s2013 = pre_systems(EngineVariant::Source2013);
        assert_eq!(s2013.len(), 1);
        assert_eq!(s2013[0].module, format!("inputsystem{LIB_EXT}"));
        assert_eq!(s2013[0].interface, "InputSystemVersion001");

        let csgo = pre_systems(EngineVariant::Csgo);
        assert_eq!(csgo.len(), 2);
        assert_eq!(csgo[1].interface, "VSoundEmitter003");
    }

    #[test]
    fn test_post_systems_surface_version() {
        for engine in [EngineVariant::NuclearDawn, EngineVariant::Left4Dead2, EngineVariant::Csgo] {
            assert_eq!(post_systems(engine)[0].interface, "VGUI_Surface031");
        }
        for engine in [EngineVariant::Source2013, EngineVariant::Left4Dead, EngineVariant::Insurgency] {
            assert_eq!(post_systems(engine)[0].interface, "VGUI_Surface030");
        }
        assert_eq!(post_systems(EngineVariant::Csgo)[1].interface, "VGUI_ivgui008");
    }

    #[test]
    fn test_native_list_is_terminated() {
        let list = NativeSystemList::new(&post_systems(EngineVariant::Source2013));
        assert_eq!(list.len(), 3);
        assert!(!list.is_empty());

        let entries = unsafe { std::slice::from_raw_parts(list.as_ptr(), list.len()) };
        let interface = unsafe { CStr::from_ptr(entries[1].interface_name) };
        assert_eq!(interface.to_str().unwrap(), "VGUI_ivgui008");
        let end = unsafe { CStr::from_ptr(entries[2].module_name) };
        assert!(end.to_bytes().is_empty());
    }

    #[test]
    fn test_chromehtml_is_refused() {
        assert_eq!(
            module_load_decision(&format!("bin/chromehtml{LIB_EXT}"), EngineVariant::Source2013),
            LoadDecision::Refuse
        );
        assert_eq!(
            module_load_decision(&format!("bin/engine{LIB_EXT}"), EngineVariant::Source2013),
            LoadDecision::Keep
        );
    }

    #[test]
    fn test_matchmaking_renamed_only_for_csgo() {
        let name = format!("bin/matchmaking_ds{LIB_EXT}");
        assert_eq!(
            module_load_decision(&name, EngineVariant::Csgo),
            LoadDecision::Rename(format!("bin/matchmaking{LIB_EXT}"))
        );
        assert_eq!(module_load_decision(&name, EngineVariant::Left4Dead2), LoadDecision::Keep);
    }

    #[test]
    fn test_manager_interface_names() {
        assert_eq!(manager_interface(true), "SDLMgrInterface001");
        assert_eq!(manager_interface(false), "CocoaMgrInterface006");
    }
}
