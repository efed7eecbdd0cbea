//! Native replacement functions and the installed-context slot they read.
//!
//! The engine calls these through redirected code on whatever thread it
//! likes, so all shared state is behind an `RwLock` or atomics.

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use strum::EnumCount;
use tracing::{debug, error};

use super::paths::strip_app_bundle;
use super::plan::HookKind;
use super::systems::{LoadDecision, module_load_decision};
use crate::engine::EngineVariant;
use crate::error::{Error, Result};
use crate::listener::{ErrorReporter, GameListener};
use crate::server_data::{ResponseDispatcher, ServerDataChannel};

const SPEW_CONTINUE: c_int = 0;
const SPEW_ABORT: c_int = 2;
const SPEW_ERROR: c_int = 3;

/// Frame on which the server counts as started; earlier frames still load
/// game libraries.
pub const STARTED_FRAME: u32 = 4;

static INSTALLED: RwLock<Option<Arc<ShimState>>> = RwLock::new(None);

/// Work done by the `CSys::LoadModules` replacement
pub(crate) trait LauncherStage: Send + Sync {
    fn run(&self, state: &ShimState, this: usize, appsys: usize) -> bool;
}

/// State shared between the orchestrator and the replacement functions
pub(crate) struct ShimState {
    reporter: ErrorReporter,
    engine: EngineVariant,
    app_bundle: Option<String>,
    originals: [AtomicUsize; HookKind::COUNT],
    frames: AtomicU32,
    started: AtomicBool,
    dispatcher: Mutex<ResponseDispatcher>,
    server_data: Mutex<Option<Box<dyn ServerDataChannel>>>,
    launcher: Mutex<Option<Arc<dyn LauncherStage>>>,
}

pub(super) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShimState {
    pub(crate) fn new(reporter: ErrorReporter, engine: EngineVariant, app_bundle: Option<String>) -> Self {
        Self {
            reporter,
            engine,
            app_bundle,
            originals: std::array::from_fn(|_| AtomicUsize::new(0)),
            frames: AtomicU32::new(0),
            started: AtomicBool::new(false),
            dispatcher: Mutex::new(ResponseDispatcher::new()),
            server_data: Mutex::new(None),
            launcher: Mutex::new(None),
        }
    }

    pub(crate) fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub(crate) fn listener(&self) -> &dyn GameListener {
        self.reporter.listener().as_ref()
    }

    pub(crate) fn engine(&self) -> EngineVariant {
        self.engine
    }

    pub(crate) fn set_original(&self, kind: HookKind, address: usize) {
        self.originals[kind.slot()].store(address, Ordering::Release);
    }

    fn original(&self, kind: HookKind) -> Option<usize> {
        match self.originals[kind.slot()].load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    pub(crate) fn clear_originals(&self) {
        for slot in &self.originals {
            slot.store(0, Ordering::Release);
        }
    }

    pub(crate) fn set_launcher(&self, stage: Option<Arc<dyn LauncherStage>>) {
        *lock(&self.launcher) = stage;
    }

    fn launcher(&self) -> Option<Arc<dyn LauncherStage>> {
        lock(&self.launcher).clone()
    }

    pub(crate) fn set_server_data(&self, channel: Box<dyn ServerDataChannel>) {
        *lock(&self.server_data) = Some(channel);
    }

    /// Route every pending server-data response to the listener
    pub(crate) fn drain_server_data(&self) -> usize {
        let mut channel = lock(&self.server_data);
        match channel.as_mut() {
            Some(channel) => lock(&self.dispatcher).drain(channel.as_mut(), self.listener()),
            None => 0,
        }
    }

    /// Count a frame; true exactly once, on [`STARTED_FRAME`].
    pub(crate) fn count_frame(&self) -> bool {
        if self.started.load(Ordering::Acquire) {
            return false;
        }
        let frame = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        frame == STARTED_FRAME && !self.started.swap(true, Ordering::AcqRel)
    }
}

/// Publish `state` to the replacement functions.
pub(crate) fn install(state: &Arc<ShimState>) -> Result<()> {
    let mut slot = INSTALLED.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.as_ref()
        && !Arc::ptr_eq(existing, state)
    {
        return Err(Error::InvalidState {
            expected: "no installed fixups".to_string(),
            actual: "another orchestrator is active".to_string(),
        });
    }
    *slot = Some(Arc::clone(state));
    Ok(())
}

/// Clear the slot if it still holds `state`.
pub(crate) fn uninstall(state: &Arc<ShimState>) {
    let mut slot = INSTALLED.write().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, state)) {
        *slot = None;
    }
}

fn current() -> Option<Arc<ShimState>> {
    INSTALLED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Address of the replacement for `kind`
pub(crate) fn replacement(kind: HookKind) -> usize {
    match kind {
        HookKind::LoadModules => load_modules as usize,
        HookKind::SysLoadModule => sys_load_module as usize,
        HookKind::SysLoadModuleFlags => sys_load_module_flags as usize,
        HookKind::ConsoleStartup => console_startup as usize,
        HookKind::ConsoleOutput => console_output as usize,
        HookKind::ProcessConsoleInput => process_console_input as usize,
        HookKind::SpewOutput => spew_output as usize,
        HookKind::PlatDebugString => plat_debug_string as usize,
        HookKind::SdlInit => sdl_init as usize,
        HookKind::SdlShutdown => sdl_shutdown as usize,
        HookKind::FsLoadModule => fs_load_module as usize,
        HookKind::FsLoadModuleFlags => fs_load_module_flags as usize,
        HookKind::AddSearchPath => add_search_path as usize,
        HookKind::RunFrame => run_frame as usize,
    }
}

type LoadModulesFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> bool;
type LoadModuleFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type LoadModuleFlagsFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;
type SpewFn = unsafe extern "C" fn(c_int, *const c_char) -> c_int;
type AddSearchPathFn = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, c_int);
type RunFrameFn = unsafe extern "C" fn(*mut c_void) -> bool;

/// # Safety
///
/// `raw` is null or a NUL-terminated string.
unsafe fn text<'a>(raw: *const c_char) -> Cow<'a, str> {
    if raw.is_null() {
        Cow::Borrowed("")
    } else {
        unsafe { CStr::from_ptr(raw) }.to_string_lossy()
    }
}

unsafe extern "C" fn load_modules(this: *mut c_void, appsys: *mut c_void) -> bool {
    let Some(state) = current() else {
        return false;
    };
    if let Some(stage) = state.launcher() {
        return stage.run(&state, this as usize, appsys as usize);
    }
    match state.original(HookKind::LoadModules) {
        Some(original) => unsafe {
            std::mem::transmute::<usize, LoadModulesFn>(original)(this, appsys)
        },
        None => false,
    }
}

unsafe extern "C" fn sys_load_module(name: *const c_char) -> *mut c_void {
    unsafe { load_module(HookKind::SysLoadModule, name, None) }
}

unsafe extern "C" fn sys_load_module_flags(name: *const c_char, flags: c_int) -> *mut c_void {
    unsafe { load_module(HookKind::SysLoadModuleFlags, name, Some(flags)) }
}

unsafe extern "C" fn fs_load_module(name: *const c_char) -> *mut c_void {
    unsafe { load_module(HookKind::FsLoadModule, name, None) }
}

unsafe extern "C" fn fs_load_module_flags(name: *const c_char, flags: c_int) -> *mut c_void {
    unsafe { load_module(HookKind::FsLoadModuleFlags, name, Some(flags)) }
}

unsafe fn load_module(kind: HookKind, name: *const c_char, flags: Option<c_int>) -> *mut c_void {
    let Some(state) = current() else {
        return ptr::null_mut();
    };
    let Some(original) = state.original(kind) else {
        return ptr::null_mut();
    };

    let renamed: CString;
    let mut name = name;
    if !name.is_null() {
        let requested = unsafe { text(name) };
        match module_load_decision(&requested, state.engine()) {
            LoadDecision::Refuse => {
                debug!("Refusing to load {}", requested);
                return ptr::null_mut();
            }
            LoadDecision::Keep => {}
            LoadDecision::Rename(replacement) => {
                debug!("Loading {} instead of {}", replacement, requested);
                if let Ok(replacement) = CString::new(replacement) {
                    renamed = replacement;
                    name = renamed.as_ptr();
                }
            }
        }
    }

    // SAFETY: original runs the code this hook replaced, with its signature
    unsafe {
        match flags {
            Some(flags) => std::mem::transmute::<usize, LoadModuleFlagsFn>(original)(name, flags),
            None => std::mem::transmute::<usize, LoadModuleFn>(original)(name),
        }
    }
}

unsafe extern "C" fn console_startup(_factory: *mut c_void) -> bool {
    if let Some(state) = current() {
        state.listener().on_game_frame();
    }
    true
}

unsafe extern "C" fn console_output(_this: *mut c_void, output: *const c_char) {
    if let Some(state) = current() {
        state.listener().on_console_output(&unsafe { text(output) });
        state.listener().on_game_frame();
    }
}

unsafe extern "C" fn process_console_input() {}

unsafe extern "C" fn spew_output(kind: c_int, message: *const c_char) -> c_int {
    let Some(state) = current() else {
        return SPEW_CONTINUE;
    };
    if kind == SPEW_ERROR {
        let message = unsafe { text(message) };
        error!("{}", message.trim_end());
        state.listener().on_error(&message);
        return SPEW_ABORT;
    }
    match state.original(HookKind::SpewOutput) {
        Some(original) => unsafe { std::mem::transmute::<usize, SpewFn>(original)(kind, message) },
        None => SPEW_CONTINUE,
    }
}

// Console output already reaches the listener; printing it again duplicates it
unsafe extern "C" fn plat_debug_string(_text: *const c_char) {}

unsafe extern "C" fn sdl_init(_this: *mut c_void) -> c_int {
    1
}

unsafe extern "C" fn sdl_shutdown(_this: *mut c_void) {}

unsafe extern "C" fn add_search_path(
    this: *mut c_void,
    path: *const c_char,
    path_id: *const c_char,
    add_type: c_int,
) {
    let Some(state) = current() else {
        return;
    };
    let Some(original) = state.original(HookKind::AddSearchPath) else {
        return;
    };
    let original = unsafe { std::mem::transmute::<usize, AddSearchPathFn>(original) };

    let repaired = match (&state.app_bundle, path.is_null()) {
        (Some(bundle), false) => strip_app_bundle(&unsafe { text(path) }, bundle)
            .and_then(|p| CString::new(p).ok()),
        _ => None,
    };
    match repaired {
        Some(repaired) => unsafe { original(this, repaired.as_ptr(), path_id, add_type) },
        None => unsafe { original(this, path, path_id, add_type) },
    }
}

unsafe extern "C" fn run_frame(this: *mut c_void) -> bool {
    let Some(state) = current() else {
        return false;
    };
    let Some(original) = state.original(HookKind::RunFrame) else {
        return false;
    };
    let listener = state.listener();

    if state.count_frame() {
        listener.on_server_started();
    }
    listener.on_game_frame();

    let running = unsafe { std::mem::transmute::<usize, RunFrameFn>(original)(this) };
    if !running {
        listener.on_server_stopped();
        return false;
    }

    state.drain_server_data();
    listener.on_game_frame();
    true
}

/// Serializes tests that publish a context in the process-wide slot
#[cfg(test)]
pub(crate) fn slot_guard() -> MutexGuard<'static, ()> {
    static GUARD: Mutex<()> = Mutex::new(());
    lock(&GUARD)
}
