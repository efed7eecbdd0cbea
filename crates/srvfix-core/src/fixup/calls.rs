//! Calls into engine functions the launcher stage drives.

use std::ffi::{CString, c_void};

use super::systems::{AppSystem, NativeSystemList};

/// The engine functions the launcher stage invokes, given their resolved
/// addresses.
pub trait EngineCalls: Send {
    /// Call a `void *Create*Mgr()` factory.
    ///
    /// # Safety
    ///
    /// `factory` must be the address of such a function.
    unsafe fn create_manager(&mut self, factory: usize) -> usize;

    /// `CAppSystemGroup::AddSystem(appsys, system, name)`.
    ///
    /// # Safety
    ///
    /// `add_system` must be that method and `appsys` a live group.
    unsafe fn add_system(&mut self, add_system: usize, appsys: usize, system: usize, name: &str);

    /// `CAppSystemGroup::AddSystems(appsys, systems)`.
    ///
    /// # Safety
    ///
    /// `add_systems` must be that method and `appsys` a live group.
    unsafe fn add_systems(&mut self, add_systems: usize, appsys: usize, systems: &[AppSystem]) -> bool;

    /// The original `CSys::LoadModules(this, appsys)`.
    ///
    /// # Safety
    ///
    /// `original` must run that method's original code.
    unsafe fn load_modules(&mut self, original: usize, this: usize, appsys: usize) -> bool;

    /// Store `value` in the pointer-sized global at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be a writable, aligned pointer variable.
    unsafe fn store_pointer(&mut self, slot: usize, value: usize);
}

/// Calls straight into the loaded engine code
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCalls;

type CreateMgrFn = unsafe extern "C" fn() -> *mut c_void;
type AddSystemFn = unsafe extern "C" fn(*mut c_void, *mut c_void, *const std::ffi::c_char);
type AddSystemsFn = unsafe extern "C" fn(*mut c_void, *const super::systems::AppSystemInfo) -> bool;
type LoadModulesFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> bool;

impl EngineCalls for NativeCalls {
    unsafe fn create_manager(&mut self, factory: usize) -> usize {
        // SAFETY: forwarded from the caller's contract
        unsafe {
            let create = std::mem::transmute::<usize, CreateMgrFn>(factory);
            create() as usize
        }
    }

    unsafe fn add_system(&mut self, add_system: usize, appsys: usize, system: usize, name: &str) {
        let Ok(name) = CString::new(name) else {
            return;
        };
        // SAFETY: forwarded from the caller's contract; name outlives the call
        unsafe {
            let add = std::mem::transmute::<usize, AddSystemFn>(add_system);
            add(appsys as *mut c_void, system as *mut c_void, name.as_ptr());
        }
    }

    unsafe fn add_systems(&mut self, add_systems: usize, appsys: usize, systems: &[AppSystem]) -> bool {
        let list = NativeSystemList::new(systems);
        // SAFETY: forwarded from the caller's contract; list outlives the call
        unsafe {
            let add = std::mem::transmute::<usize, AddSystemsFn>(add_systems);
            add(appsys as *mut c_void, list.as_ptr())
        }
    }

    unsafe fn load_modules(&mut self, original: usize, this: usize, appsys: usize) -> bool {
        // SAFETY: forwarded from the caller's contract
        unsafe {
            let load = std::mem::transmute::<usize, LoadModulesFn>(original);
            load(this as *mut c_void, appsys as *mut c_void)
        }
    }

    unsafe fn store_pointer(&mut self, slot: usize, value: usize) {
        // SAFETY: forwarded from the caller's contract
        unsafe { std::ptr::write_volatile(slot as *mut usize, value) }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        CreateManager(usize),
        AddSystem { appsys: usize, system: usize, name: String },
        AddSystems { appsys: usize, interfaces: Vec<&'static str> },
        LoadModules { original: usize, this: usize, appsys: usize },
        StorePointer { slot: usize, value: usize },
    }

    /// Records calls; the manager factory returns `manager`.
    #[derive(Debug, Clone)]
    pub struct RecordingCalls {
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub manager: usize,
        pub load_result: bool,
    }

    impl Default for RecordingCalls {
        fn default() -> Self {
            Self {
                calls: Arc::default(),
                manager: 0xAB00,
                load_result: true,
            }
        }
    }

    impl RecordingCalls {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl EngineCalls for RecordingCalls {
        unsafe fn create_manager(&mut self, factory: usize) -> usize {
            self.push(Call::CreateManager(factory));
            self.manager
        }

        unsafe fn add_system(&mut self, _add_system: usize, appsys: usize, system: usize, name: &str) {
            self.push(Call::AddSystem {
                appsys,
                system,
                name: name.to_string(),
            });
        }

        unsafe fn add_systems(&mut self, _add_systems: usize, appsys: usize, systems: &[AppSystem]) -> bool {
            self.push(Call::AddSystems {
                appsys,
                interfaces: systems.iter().map(|s| s.interface).collect(),
            });
            true
        }

        unsafe fn load_modules(&mut self, original: usize, this: usize, appsys: usize) -> bool {
            self.push(Call::LoadModules {
                original,
                this,
                appsys,
            });
            self.load_result
        }

        unsafe fn store_pointer(&mut self, slot: usize, value: usize) {
            self.push(Call::StorePointer { slot, value });
        }
    }
}
