//! Start-up sequencing of the redirections a headless dedicated server
//! needs.
//!
//! [`FixupOrchestrator::initialize`] hooks `dedicated` before the server's
//! entry point runs. The `CSys::LoadModules` replacement then runs the
//! launcher stage: it registers the launcher manager and engine app systems
//! and hooks the frame loop.

mod calls;
mod paths;
mod plan;
mod shims;
mod systems;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

pub use calls::{EngineCalls, NativeCalls};
pub use paths::{AppBundle, strip_app_bundle};
pub use plan::{
    ADD_SEARCH_PATH, ADD_SYSTEM, ADD_SYSTEMS, CONSOLE_OUTPUT, CONSOLE_STARTUP, CREATE_COCOA_MGR,
    CREATE_SDL_MGR, Condition, HookKind, InterceptionPlan, LAUNCHER_COCOA_MGR, LAUNCHER_MGR,
    LOAD_MODULES, PLAT_DEBUG_STRING, PROCESS_CONSOLE_INPUT, PlannedHook, RUN_FRAME, SDL_INIT,
    SDL_SHUTDOWN, SPEW_OUTPUT, SYS_LOAD_MODULE, SYS_LOAD_MODULE_FLAGS, dedicated_requests,
    launcher_requests,
};
pub use shims::STARTED_FRAME;
pub use systems::{
    AppSystem, AppSystemInfo, COCOA_MGR_INTERFACE, LoadDecision, NativeSystemList,
    SDL_MGR_INTERFACE, manager_interface, module_load_decision, post_systems, pre_systems,
};

use self::shims::{LauncherStage, ShimState, lock};
use crate::config::SrvfixConfig;
use crate::engine::{EngineVariant, UiMode};
use crate::error::{Error, Result};
use crate::hook::{DetourBackend, HookId, HookSummary, InterceptionManager};
use crate::listener::{ErrorReporter, GameListener};
use crate::module::ModuleLoader;
use crate::server_data::ServerDataChannel;
use crate::symbols::HiddenSymbolResolver;

pub const DEDICATED: &str = "dedicated";
pub const LAUNCHER: &str = "launcher";
pub const ENGINE: &str = "engine";
pub const FILESYSTEM: &str = "filesystem_stdio";
pub const TIER0: &str = "tier0";

/// Source of symbol-indexed modules
pub trait ModuleCatalog: Send {
    /// Load the module `name` and index its symbol table.
    fn open_indexed(&mut self, name: &str) -> Result<HiddenSymbolResolver>;
}

impl ModuleCatalog for ModuleLoader {
    fn open_indexed(&mut self, name: &str) -> Result<HiddenSymbolResolver> {
        HiddenSymbolResolver::open(self.load(name)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FixupState {
    Uninitialized,
    DiscoveringSymbols,
    InstallingHooks,
    Active,
    TearingDown,
    Inactive,
}

struct FixupCore<C, B: DetourBackend, E> {
    // Declared before `modules`: hooks are restored before their images go
    manager: InterceptionManager<B>,
    modules: Vec<HiddenSymbolResolver>,
    catalog: C,
    calls: E,
    plan: InterceptionPlan,
    state: FixupState,
    ui_mode: UiMode,
    dedicated_overridden: bool,
    app_root: Option<PathBuf>,
}

impl<C, B: DetourBackend, E> FixupCore<C, B, E> {
    fn teardown(&mut self, shared: &ShimState) -> Result<()> {
        self.state = FixupState::TearingDown;
        shared.set_launcher(None);
        let result = self.manager.destroy_all();
        shared.clear_originals();
        while let Some(module) = self.modules.pop() {
            debug!("Releasing {}", module.name());
        }
        self.state = FixupState::Inactive;
        result
    }

    fn original_of(&self, kind: HookKind) -> Result<usize> {
        let hook = self.plan.get(kind).ok_or_else(|| Error::InvalidState {
            expected: format!("{kind} redirected"),
            actual: "not installed".to_string(),
        })?;
        self.manager.original_address(hook.id)
    }
}

impl<C: ModuleCatalog, B: DetourBackend, E: EngineCalls> FixupCore<C, B, E> {
    /// Create, record and enable one hook.
    ///
    /// A failing optional hook is reported as a warning and skipped.
    #[allow(clippy::too_many_arguments)]
    fn hook(
        &mut self,
        shared: &ShimState,
        kind: HookKind,
        module: &str,
        symbol: &str,
        target: Option<usize>,
        conditions: &[Condition],
        required: bool,
    ) -> Result<Option<HookId>> {
        let mut conditions = conditions.to_vec();
        if !required {
            conditions.push(Condition::Optional);
        }
        match self.try_hook(shared, kind, module, symbol, target.unwrap_or(0), conditions) {
            Ok(id) => Ok(Some(id)),
            Err(e) if required || e.is_contract_violation() => Err(e),
            Err(e) => {
                shared
                    .reporter()
                    .warning(&format!("Failed to create detour for {kind} in {module}: {e}\n"));
                Ok(None)
            }
        }
    }

    fn try_hook(
        &mut self,
        shared: &ShimState,
        kind: HookKind,
        module: &str,
        symbol: &str,
        target: usize,
        conditions: Vec<Condition>,
    ) -> Result<HookId> {
        let name = kind.to_string();
        // SAFETY: target comes from the module's own symbol table and the
        // replacement shim has the signature of the function named by kind.
        let id = unsafe { self.manager.create(&name, target, shims::replacement(kind)) }?;
        shared.set_original(kind, self.manager.original_address(id)?);
        self.plan.record(PlannedHook {
            kind,
            id,
            module: module.to_string(),
            symbol: symbol.to_string(),
            target,
            conditions,
        });
        self.manager.enable(id)?;
        Ok(id)
    }

    fn install_dedicated(&mut self, shared: &ShimState) -> Result<()> {
        self.state = FixupState::DiscoveringSymbols;
        let mut dedicated = self.catalog.open_indexed(DEDICATED)?;
        let batch = dedicated
            .resolve_batch(&dedicated_requests(self.ui_mode))
            .ensure_complete()?;
        let has_manager = dedicated.resolve(CREATE_COCOA_MGR).is_some()
            || dedicated.resolve(CREATE_SDL_MGR).is_some();
        self.dedicated_overridden = dedicated.is_overridden();
        debug!("{} symbols: {:?}", DEDICATED, dedicated.stats());

        self.state = FixupState::InstallingHooks;
        if has_manager {
            info!("{} creates its own launcher manager, CSys::LoadModules left alone", DEDICATED);
        } else {
            self.hook(
                shared,
                HookKind::LoadModules,
                DEDICATED,
                LOAD_MODULES,
                batch.address_of(LOAD_MODULES),
                &[Condition::NoManagerInDedicated],
                true,
            )?;
        }

        let (kind, conditions) = if batch.is_substituted(SYS_LOAD_MODULE) {
            (HookKind::SysLoadModuleFlags, vec![Condition::AlternateSymbol])
        } else {
            (HookKind::SysLoadModule, Vec::new())
        };
        let symbol = batch
            .entry(SYS_LOAD_MODULE)
            .map_or(SYS_LOAD_MODULE, |e| e.resolved_name.as_str());
        self.hook(
            shared,
            kind,
            DEDICATED,
            symbol,
            batch.address_of(SYS_LOAD_MODULE),
            &conditions,
            true,
        )?;

        if self.ui_mode.is_interactive() {
            for (kind, symbol) in [
                (HookKind::ConsoleStartup, CONSOLE_STARTUP),
                (HookKind::ConsoleOutput, CONSOLE_OUTPUT),
                (HookKind::ProcessConsoleInput, PROCESS_CONSOLE_INPUT),
                (HookKind::SpewOutput, SPEW_OUTPUT),
            ] {
                self.hook(
                    shared,
                    kind,
                    DEDICATED,
                    symbol,
                    batch.address_of(symbol),
                    &[Condition::Interactive],
                    true,
                )?;
            }
        }
        self.modules.push(dedicated);

        match self.catalog.open_indexed(TIER0) {
            Ok(tier0) if tier0.is_overridden() => {
                info!("{} loaded from an override path, {} left alone", TIER0, PLAT_DEBUG_STRING);
                self.modules.push(tier0);
            }
            Ok(tier0) => {
                let address = tier0.resolve_export(PLAT_DEBUG_STRING);
                self.modules.push(tier0);
                self.hook(
                    shared,
                    HookKind::PlatDebugString,
                    TIER0,
                    PLAT_DEBUG_STRING,
                    address,
                    &[],
                    false,
                )?;
            }
            Err(e) => shared
                .reporter()
                .warning(&format!("{PLAT_DEBUG_STRING} not redirected: {e}\n")),
        }
        Ok(())
    }

    fn launcher_stage(&mut self, shared: &ShimState, this: usize, appsys: usize) -> Result<bool> {
        let mut launcher = self.catalog.open_indexed(LAUNCHER)?;
        shared.listener().on_server_loaded();

        let batch = launcher.resolve_batch(&launcher_requests());
        // With the Cocoa manager the SDL methods are not needed
        let uses_sdl = !batch.is_substituted(CREATE_SDL_MGR);
        let missing: Vec<String> = batch
            .entries
            .iter()
            .filter(|e| !e.is_resolved() && (!e.optional || uses_sdl))
            .map(|e| e.requested.clone())
            .collect();
        if !missing.is_empty() {
            return Err(Error::SymbolsUnresolved {
                module: LAUNCHER.to_string(),
                missing,
            });
        }
        let required = |name: &str| {
            batch.address_of(name).ok_or_else(|| Error::SymbolsUnresolved {
                module: LAUNCHER.to_string(),
                missing: vec![name.to_string()],
            })
        };
        let add_system = required(ADD_SYSTEM)?;
        let add_systems = required(ADD_SYSTEMS)?;
        let create_manager = required(CREATE_SDL_MGR)?;

        if !uses_sdl {
            debug!("{} uses the Cocoa manager", LAUNCHER);
        } else if launcher.is_overridden() {
            info!("{} loaded from an override path, SDL manager left alone", LAUNCHER);
        } else {
            for (kind, symbol) in [(HookKind::SdlInit, SDL_INIT), (HookKind::SdlShutdown, SDL_SHUTDOWN)] {
                self.hook(
                    shared,
                    kind,
                    LAUNCHER,
                    symbol,
                    batch.address_of(symbol),
                    &[Condition::SdlManager],
                    true,
                )?;
            }
        }
        self.modules.push(launcher);

        let kind = if uses_sdl { "SDL" } else { "Cocoa" };
        // SAFETY: resolved from launcher's symbol table
        let manager = unsafe { self.calls.create_manager(create_manager) };
        if manager == 0 {
            return Err(Error::Fatal(format!("Failed to create {kind} manager interface")));
        }
        // SAFETY: appsys is the group LoadModules was called with
        unsafe {
            self.calls
                .add_system(add_system, appsys, manager, manager_interface(uses_sdl));
        }

        if self.dedicated_overridden && !self.plan.contains(HookKind::AddSearchPath) {
            self.hook_filesystem(shared)?;
        }

        let engine_variant = shared.engine();
        if !self.dedicated_overridden
            && !unsafe { self.calls.add_systems(add_systems, appsys, &pre_systems(engine_variant)) }
        {
            return Ok(false);
        }

        let original = self.original_of(HookKind::LoadModules)?;
        // SAFETY: original runs the unpatched CSys::LoadModules
        if !unsafe { self.calls.load_modules(original, this, appsys) } {
            return Ok(false);
        }

        let mut engine = self.catalog.open_indexed(ENGINE)?;
        let pointer = engine
            .resolve(LAUNCHER_MGR)
            .or_else(|| engine.resolve(LAUNCHER_COCOA_MGR))
            .ok_or_else(|| Error::SymbolsUnresolved {
                module: ENGINE.to_string(),
                missing: vec![LAUNCHER_MGR.to_string(), LAUNCHER_COCOA_MGR.to_string()],
            })?;
        // SAFETY: pointer is the engine's global manager pointer
        unsafe { self.calls.store_pointer(pointer, manager) };
        debug!("Stored {} manager 0x{:X} at 0x{:X}", kind, manager, pointer);

        if self.ui_mode.is_interactive() {
            if engine.is_overridden() {
                info!("{} loaded from an override path, frame loop left alone", ENGINE);
            } else if let Some(run_frame) = engine.resolve(RUN_FRAME) {
                self.hook(
                    shared,
                    HookKind::RunFrame,
                    ENGINE,
                    RUN_FRAME,
                    Some(run_frame),
                    &[Condition::Interactive],
                    true,
                )?;
            } else {
                debug!("{} has no {}", ENGINE, RUN_FRAME);
            }
        }
        self.modules.push(engine);

        if !self.dedicated_overridden
            && !unsafe { self.calls.add_systems(add_systems, appsys, &post_systems(engine_variant)) }
        {
            return Ok(false);
        }

        if let Some(root) = &self.app_root {
            match std::env::set_current_dir(root) {
                Ok(()) => info!("Working directory set to {}", root.display()),
                Err(e) => shared
                    .reporter()
                    .warning(&format!("Failed to change directory to {}: {e}\n", root.display())),
            }
        }
        Ok(true)
    }

    fn hook_filesystem(&mut self, shared: &ShimState) -> Result<()> {
        let mut fs = self.catalog.open_indexed(FILESYSTEM)?;
        if fs.is_overridden() {
            info!("{} loaded from an override path, left alone", FILESYSTEM);
            self.modules.push(fs);
            return Ok(());
        }

        let load = fs
            .resolve(SYS_LOAD_MODULE)
            .map(|address| (HookKind::FsLoadModule, SYS_LOAD_MODULE, address))
            .or_else(|| {
                fs.resolve(SYS_LOAD_MODULE_FLAGS)
                    .map(|address| (HookKind::FsLoadModuleFlags, SYS_LOAD_MODULE_FLAGS, address))
            });
        let add_search_path = fs.resolve(ADD_SEARCH_PATH);
        self.modules.push(fs);

        match load {
            Some((kind, symbol, address)) => {
                self.hook(
                    shared,
                    kind,
                    FILESYSTEM,
                    symbol,
                    Some(address),
                    &[Condition::DedicatedOverridden],
                    false,
                )?;
            }
            None => shared.reporter().warning(&format!(
                "Failed to create detour for Sys_LoadModule in {FILESYSTEM}\n"
            )),
        }

        let add_search_path = add_search_path.ok_or_else(|| Error::SymbolsUnresolved {
            module: FILESYSTEM.to_string(),
            missing: vec![ADD_SEARCH_PATH.to_string()],
        })?;
        self.hook(
            shared,
            HookKind::AddSearchPath,
            FILESYSTEM,
            ADD_SEARCH_PATH,
            Some(add_search_path),
            &[Condition::DedicatedOverridden],
            true,
        )?;
        Ok(())
    }
}

/// Runs the launcher stage from the `CSys::LoadModules` replacement
struct CoreStage<C, B: DetourBackend, E> {
    core: Arc<Mutex<FixupCore<C, B, E>>>,
}

impl<C, B, E> LauncherStage for CoreStage<C, B, E>
where
    C: ModuleCatalog,
    B: DetourBackend + Send,
    E: EngineCalls,
{
    fn run(&self, state: &ShimState, this: usize, appsys: usize) -> bool {
        let mut core = lock(&self.core);
        if core.state != FixupState::Active {
            warn!("Launcher stage requested while {}", core.state);
            return false;
        }
        match core.launcher_stage(state, this, appsys) {
            Ok(loaded) => loaded,
            Err(err) => {
                drop(core);
                state.reporter().fatal(err);
                false
            }
        }
    }
}

/// Owner of every redirection installed into the server process.
///
/// Hooks are removed by [`shutdown`](Self::shutdown) or on drop.
pub struct FixupOrchestrator<C, B: DetourBackend, E = NativeCalls> {
    core: Arc<Mutex<FixupCore<C, B, E>>>,
    reporter: ErrorReporter,
    app_bundle: Option<AppBundle>,
    pending_server_data: Option<Box<dyn ServerDataChannel>>,
    shared: Option<Arc<ShimState>>,
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub type NativeOrchestrator =
    FixupOrchestrator<ModuleLoader, crate::hook::InlineBackend, NativeCalls>;

impl<C, B, E> FixupOrchestrator<C, B, E>
where
    C: ModuleCatalog + 'static,
    B: DetourBackend + Send + 'static,
    E: EngineCalls + 'static,
{
    pub fn new(
        catalog: C,
        backend: B,
        calls: E,
        config: &SrvfixConfig,
        listener: Arc<dyn GameListener>,
    ) -> Self {
        let core = FixupCore {
            manager: InterceptionManager::new(backend),
            modules: Vec::new(),
            catalog,
            calls,
            plan: InterceptionPlan::default(),
            state: FixupState::Uninitialized,
            ui_mode: config.ui_mode,
            dedicated_overridden: false,
            app_root: None,
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            reporter: ErrorReporter::new(listener, config.exit_on_fatal),
            app_bundle: None,
            pending_server_data: None,
            shared: None,
        }
    }

    /// Repair search paths and the working directory for a bundled binary.
    pub fn with_app_bundle(mut self, bundle: AppBundle) -> Self {
        lock(&self.core).app_root = Some(bundle.root.clone());
        self.app_bundle = Some(bundle);
        self
    }

    /// Responses drained by the frame hook.
    pub fn with_server_data(mut self, channel: Box<dyn ServerDataChannel>) -> Self {
        self.pending_server_data = Some(channel);
        self
    }

    /// Resolve `dedicated`'s internals and install the start-up hooks.
    ///
    /// Failures are fatal: whatever was installed is removed again and the
    /// error goes through the reporter.
    pub fn initialize(&mut self, game: Option<&str>, engine: EngineVariant) -> Result<()> {
        let mut core = lock(&self.core);
        if core.state != FixupState::Uninitialized {
            return Err(Error::InvalidState {
                expected: FixupState::Uninitialized.to_string(),
                actual: core.state.to_string(),
            });
        }
        info!(
            "Installing server fixups for {} ({}, {} mode)",
            game.unwrap_or("unknown game"),
            engine,
            core.ui_mode
        );

        let shared = Arc::new(ShimState::new(
            self.reporter.clone(),
            engine,
            self.app_bundle.as_ref().map(|b| b.suffix.clone()),
        ));
        if let Some(channel) = self.pending_server_data.take() {
            shared.set_server_data(channel);
        }
        shared.set_launcher(Some(Arc::new(CoreStage {
            core: Arc::clone(&self.core),
        })));

        let result = shims::install(&shared).and_then(|()| core.install_dedicated(&shared));
        if let Err(err) = result {
            if let Err(e) = core.teardown(&shared) {
                warn!("Incomplete teardown after failed start-up: {}", e);
            }
            shims::uninstall(&shared);
            drop(core);
            return Err(self.reporter.fatal(err));
        }

        core.state = FixupState::Active;
        info!("{} redirections active", core.plan.len());
        drop(core);
        self.shared = Some(shared);
        Ok(())
    }

    /// Run the launcher stage as the `CSys::LoadModules` replacement does.
    pub fn run_launcher_stage(&self, this: usize, appsys: usize) -> bool {
        match &self.shared {
            Some(shared) => CoreStage {
                core: Arc::clone(&self.core),
            }
            .run(shared, this, appsys),
            None => false,
        }
    }
}

impl<C, B: DetourBackend, E> FixupOrchestrator<C, B, E> {
    pub fn state(&self) -> FixupState {
        lock(&self.core).state
    }

    pub fn plan(&self) -> InterceptionPlan {
        lock(&self.core).plan.clone()
    }

    pub fn hooks(&self) -> Vec<HookSummary> {
        lock(&self.core).manager.summaries()
    }

    /// Destroy every hook, newest first, and release the modules.
    ///
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut core = lock(&self.core);
        let Some(shared) = self.shared.take() else {
            if core.state == FixupState::Uninitialized {
                core.state = FixupState::Inactive;
            }
            return Ok(());
        };
        let result = core.teardown(&shared);
        shims::uninstall(&shared);
        info!("Server fixups removed");
        result
    }
}

impl<C, B: DetourBackend, E> Drop for FixupOrchestrator<C, B, E> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to remove server fixups: {}", e);
        }
    }
}
