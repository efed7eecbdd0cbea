//! Redirection by rewriting a function-pointer slot (GOT entry, vtable
//! entry, callback table). Works on every architecture.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::backend::{BackendError, Detour, DetourBackend};

/// The target passed to [`SlotBackend::intercept`] is the address of the
/// slot, not of the function it points at.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlotBackend;

#[derive(Debug)]
pub struct SlotDetour {
    slot: usize,
    original: usize,
    replacement: usize,
    enabled: bool,
}

impl DetourBackend for SlotBackend {
    type Detour = SlotDetour;

    unsafe fn intercept(
        &mut self,
        target: usize,
        replacement: usize,
    ) -> Result<SlotDetour, BackendError> {
        if target % std::mem::align_of::<usize>() != 0 {
            return Err(BackendError(format!("slot 0x{:X} is misaligned", target)));
        }
        // SAFETY: caller guarantees target is a live pointer slot
        let original = unsafe { slot_ref(target) }.load(Ordering::SeqCst);
        if original == 0 {
            return Err(BackendError(format!("slot 0x{:X} is empty", target)));
        }
        Ok(SlotDetour {
            slot: target,
            original,
            replacement,
            enabled: false,
        })
    }
}

impl SlotDetour {
    /// Store `value` into the slot, restoring the page's protection afterwards
    /// when it had to be made writable.
    fn write(&self, value: usize) -> Result<(), BackendError> {
        let page = page_start(self.slot);
        let prot = page_protection(self.slot)?;
        let read_only = prot & libc::PROT_WRITE == 0;
        if read_only {
            protect(page, prot | libc::PROT_READ | libc::PROT_WRITE)?;
        }
        // SAFETY: validated by intercept, page is writable here
        unsafe { slot_ref(self.slot) }.store(value, Ordering::SeqCst);
        if read_only {
            protect(page, prot)?;
        }
        Ok(())
    }
}

impl Detour for SlotDetour {
    fn enable(&mut self) -> Result<(), BackendError> {
        if !self.enabled {
            self.write(self.replacement)?;
            self.enabled = true;
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<(), BackendError> {
        if self.enabled {
            self.write(self.original)?;
            self.enabled = false;
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn original(&self) -> usize {
        self.original
    }
}

impl Drop for SlotDetour {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}

/// # Safety
///
/// `slot` must be an aligned, live pointer-sized location.
unsafe fn slot_ref<'a>(slot: usize) -> &'a AtomicUsize {
    unsafe { AtomicUsize::from_ptr(slot as *mut usize) }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// An aligned slot never straddles a page, so one page covers it.
fn page_start(slot: usize) -> usize {
    slot & !(page_size() - 1)
}

fn protect(page: usize, prot: libc::c_int) -> Result<(), BackendError> {
    // SAFETY: only changes protection of the page holding the slot
    let rc = unsafe { libc::mprotect(page as *mut libc::c_void, page_size(), prot) };
    if rc != 0 {
        return Err(BackendError(format!(
            "mprotect 0x{:X}: {}",
            page,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Current `PROT_*` flags of the mapping holding `addr`.
#[cfg(not(target_vendor = "apple"))]
fn page_protection(addr: usize) -> Result<libc::c_int, BackendError> {
    let maps = std::fs::read_to_string("/proc/self/maps")
        .map_err(|e| BackendError(format!("/proc/self/maps: {}", e)))?;
    maps.lines()
        .filter_map(parse_mapping)
        .find(|(start, end, _)| (*start..*end).contains(&addr))
        .map(|(_, _, prot)| prot)
        .ok_or_else(|| BackendError(format!("0x{:X} is not mapped", addr)))
}

/// `start-end perms ...` line of `/proc/self/maps`.
#[cfg(not(target_vendor = "apple"))]
fn parse_mapping(line: &str) -> Option<(usize, usize, libc::c_int)> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    let perms = fields.next()?.as_bytes();
    if perms.len() < 3 {
        return None;
    }
    let mut prot = libc::PROT_NONE;
    if perms[0] == b'r' {
        prot |= libc::PROT_READ;
    }
    if perms[1] == b'w' {
        prot |= libc::PROT_WRITE;
    }
    if perms[2] == b'x' {
        prot |= libc::PROT_EXEC;
    }
    Some((start, end, prot))
}

#[cfg(target_vendor = "apple")]
fn page_protection(addr: usize) -> Result<libc::c_int, BackendError> {
    use mach2::kern_return::KERN_SUCCESS;
    use mach2::traps::mach_task_self;
    use mach2::vm_region::{VM_REGION_BASIC_INFO_64, vm_region_basic_info_64, vm_region_info_t};
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

    let mut region_addr = addr as mach_vm_address_t;
    let mut region_size: mach_vm_size_t = 0;
    // SAFETY: plain C struct, zero is a valid bit pattern
    let mut info: vm_region_basic_info_64 = unsafe { std::mem::zeroed() };
    let mut info_count = vm_region_basic_info_64::count();
    let mut object_name = 0;
    // SAFETY: every out pointer refers to a live local
    let kr = unsafe {
        mach2::vm::mach_vm_region(
            mach_task_self(),
            &mut region_addr,
            &mut region_size,
            VM_REGION_BASIC_INFO_64,
            (&mut info as *mut vm_region_basic_info_64) as vm_region_info_t,
            &mut info_count,
            &mut object_name,
        )
    };
    // mach_vm_region reports the next region when addr is unmapped
    if kr != KERN_SUCCESS || region_addr > addr as mach_vm_address_t {
        return Err(BackendError(format!("0x{:X} is not mapped", addr)));
    }
    // VM_PROT_* and PROT_* share bit values
    Ok(info.protection as libc::c_int)
}
