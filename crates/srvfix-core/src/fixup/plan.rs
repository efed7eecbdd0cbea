//! Symbols the fixups need and the record of hooks installed for them.

use serde::Serialize;
use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

use crate::engine::UiMode;
use crate::hook::HookId;
use crate::symbols::SymbolRequest;

// dedicated
pub const LOAD_MODULES: &str = "_ZN4CSys11LoadModulesEP24CDedicatedAppSystemGroup";
pub const SYS_LOAD_MODULE: &str = "_Z14Sys_LoadModulePKc";
pub const SYS_LOAD_MODULE_FLAGS: &str = "_Z14Sys_LoadModulePKc9Sys_Flags";
pub const CONSOLE_STARTUP: &str = "_Z14ConsoleStartupPFPvPKcPiE";
pub const CONSOLE_OUTPUT: &str = "_ZN4CSys13ConsoleOutputEPKc";
pub const PROCESS_CONSOLE_INPUT: &str = "_Z19ProcessConsoleInputv";
pub const SPEW_OUTPUT: &str = "_Z23DedicatedSpewOutputFunc10SpewType_tPKc";

// dedicated or launcher
pub const CREATE_SDL_MGR: &str = "_Z12CreateSDLMgrv";
pub const CREATE_COCOA_MGR: &str = "_Z15CreateCCocoaMgrv";

// launcher
pub const ADD_SYSTEM: &str = "_ZN15CAppSystemGroup9AddSystemEP10IAppSystemPKc";
pub const ADD_SYSTEMS: &str = "_ZN15CAppSystemGroup10AddSystemsEP15AppSystemInfo_t";
pub const SDL_INIT: &str = "_ZN7CSDLMgr4InitEv";
pub const SDL_SHUTDOWN: &str = "_ZN7CSDLMgr8ShutdownEv";

// filesystem_stdio
pub const ADD_SEARCH_PATH: &str = "_ZN15CBaseFileSystem13AddSearchPathEPKcS1_15SearchPathAdd_t";

// engine
pub const LAUNCHER_MGR: &str = "g_pLauncherMgr";
pub const LAUNCHER_COCOA_MGR: &str = "g_pLauncherCocoaMgr";
pub const RUN_FRAME: &str = "_ZN19CDedicatedServerAPI8RunFrameEv";

// tier0, public export
pub const PLAT_DEBUG_STRING: &str = "Plat_DebugString";

/// Symbols looked up in `dedicated`; the console hooks only matter in
/// interactive mode.
pub fn dedicated_requests(mode: UiMode) -> Vec<SymbolRequest<'static>> {
    let ui = |name| {
        if mode.is_interactive() {
            SymbolRequest::new(name)
        } else {
            SymbolRequest::new(name).optional()
        }
    };
    vec![
        SymbolRequest::new(LOAD_MODULES),
        SymbolRequest::new(SYS_LOAD_MODULE).with_alternate(SYS_LOAD_MODULE_FLAGS),
        ui(CONSOLE_STARTUP),
        ui(CONSOLE_OUTPUT),
        ui(PROCESS_CONSOLE_INPUT),
        ui(SPEW_OUTPUT),
    ]
}

/// Symbols looked up in `launcher`. The SDL manager methods are checked
/// separately once it is known whether the Cocoa manager was substituted.
pub fn launcher_requests() -> Vec<SymbolRequest<'static>> {
    vec![
        SymbolRequest::new(ADD_SYSTEM),
        SymbolRequest::new(ADD_SYSTEMS),
        SymbolRequest::new(CREATE_SDL_MGR).with_alternate(CREATE_COCOA_MGR),
        SymbolRequest::new(SDL_INIT).optional(),
        SymbolRequest::new(SDL_SHUTDOWN).optional(),
    ]
}

/// Every function the fixups redirect.
///
/// The discriminant doubles as the index of the hook's original-call slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr, EnumCount, EnumIter,
)]
pub enum HookKind {
    #[strum(serialize = "CSys::LoadModules")]
    LoadModules,
    #[strum(serialize = "Sys_LoadModule")]
    SysLoadModule,
    #[strum(serialize = "Sys_LoadModule(flags)")]
    SysLoadModuleFlags,
    #[strum(serialize = "ConsoleStartup")]
    ConsoleStartup,
    #[strum(serialize = "CSys::ConsoleOutput")]
    ConsoleOutput,
    #[strum(serialize = "ProcessConsoleInput")]
    ProcessConsoleInput,
    #[strum(serialize = "DedicatedSpewOutputFunc")]
    SpewOutput,
    #[strum(serialize = "Plat_DebugString")]
    PlatDebugString,
    #[strum(serialize = "CSDLMgr::Init")]
    SdlInit,
    #[strum(serialize = "CSDLMgr::Shutdown")]
    SdlShutdown,
    #[strum(serialize = "filesystem Sys_LoadModule")]
    FsLoadModule,
    #[strum(serialize = "filesystem Sys_LoadModule(flags)")]
    FsLoadModuleFlags,
    #[strum(serialize = "CBaseFileSystem::AddSearchPath")]
    AddSearchPath,
    #[strum(serialize = "CDedicatedServerAPI::RunFrame")]
    RunFrame,
}

impl HookKind {
    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Why a hook was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// `dedicated` has no manager factory of its own
    NoManagerInDedicated,
    Interactive,
    DedicatedOverridden,
    SdlManager,
    /// Installed on the alternate symbol name
    AlternateSymbol,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedHook {
    pub kind: HookKind,
    pub id: HookId,
    pub module: String,
    pub symbol: String,
    pub target: usize,
    pub conditions: Vec<Condition>,
}

/// Hooks created during start-up, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterceptionPlan {
    hooks: Vec<PlannedHook>,
}

impl InterceptionPlan {
    pub fn record(&mut self, hook: PlannedHook) {
        self.hooks.push(hook);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedHook> {
        self.hooks.iter()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn get(&self, kind: HookKind) -> Option<&PlannedHook> {
        self.hooks.iter().find(|h| h.kind == kind)
    }

    pub fn contains(&self, kind: HookKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> Vec<HookKind> {
        self.hooks.iter().map(|h| h.kind).collect()
    }

    /// Handles newest first, the order they are torn down in
    pub fn teardown_order(&self) -> Vec<HookId> {
        self.hooks.iter().rev().map(|h| h.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_mode_makes_ui_symbols_optional() {
        let console = dedicated_requests(UiMode::Console);
        let gui = dedicated_requests(UiMode::Gui);
        assert_eq!(console.len(), gui.len());
        assert!(!console[0].optional && !console[1].optional);
        assert!(console[2..].iter().all(|r| r.optional));
        assert!(gui.iter().all(|r| !r.optional));
        assert_eq!(console[1].alternate, Some(SYS_LOAD_MODULE_FLAGS));
    }

    #[test]
    fn test_slots_are_distinct() {
        use strum::IntoEnumIterator;
        let slots: Vec<usize> = HookKind::iter().map(HookKind::slot).collect();
        assert_eq!(slots, (0..HookKind::COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_plan_teardown_order() {
        let mut plan = InterceptionPlan::default();
        for (i, kind) in [HookKind::LoadModules, HookKind::SysLoadModule].into_iter().enumerate() {
            plan.record(PlannedHook {
                kind,
                id: HookId(i as u32 + 1),
                module: "dedicated".to_string(),
                symbol: kind.to_string(),
                target: 0x1000 * (i + 1),
                conditions: Vec::new(),
            });
        }
        assert!(plan.contains(HookKind::SysLoadModule));
        assert!(!plan.contains(HookKind::RunFrame));
        assert_eq!(plan.teardown_order(), vec![HookId(2), HookId(1)]);
        assert_eq!(HookKind::LoadModules.to_string(), "CSys::LoadModules");
    }
}
