//! Thin wrappers over the platform dynamic loader.

use std::ffi::{CStr, CString, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// An open `dlopen` handle, closed on drop.
#[derive(Debug)]
pub struct Library {
    handle: NonNull<c_void>,
}

// SAFETY: dl handles are process-global and the loader API is thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// `dlopen(path, RTLD_LAZY)`; the error is the loader's own message.
    pub fn open(path: &Path) -> Result<Self, String> {
        Self::open_with(path, libc::RTLD_LAZY).ok_or_else(last_error)
    }

    /// Handle of an already loaded image, without loading it.
    pub fn open_loaded(path: &Path) -> Option<Self> {
        Self::open_with(path, libc::RTLD_LAZY | libc::RTLD_NOLOAD)
    }

    fn open_with(path: &Path, flags: libc::c_int) -> Option<Self> {
        let cpath = CString::new(path.as_os_str().as_bytes()).ok()?;
        // SAFETY: cpath is a valid NUL-terminated string
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), flags) };
        NonNull::new(handle).map(|handle| Self { handle })
    }

    pub fn handle(&self) -> *mut c_void {
        self.handle.as_ptr()
    }

    /// Public export lookup (`dlsym`).
    pub fn symbol(&self, name: &str) -> Option<usize> {
        let cname = CString::new(name).ok()?;
        // SAFETY: handle is open for the lifetime of self
        let addr = unsafe { libc::dlsym(self.handle.as_ptr(), cname.as_ptr()) };
        (!addr.is_null()).then_some(addr as usize)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed exactly once
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

fn last_error() -> String {
    // SAFETY: dlerror returns null or a valid string owned by the loader
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dlopen failure".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

fn c_path(raw: *const libc::c_char) -> Option<PathBuf> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: caller passes a loader-owned NUL-terminated string
    let bytes = unsafe { CStr::from_ptr(raw) }.to_bytes();
    if bytes.is_empty() {
        return None;
    }
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

/// A loaded image as reported by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub base: usize,
    pub path: PathBuf,
}

/// Image containing `addr`, via `dladdr`.
pub fn image_containing(addr: usize) -> Option<LoadedImage> {
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only inspects addr and fills info
    if unsafe { libc::dladdr(addr as *const c_void, &mut info) } == 0 {
        return None;
    }
    if info.dli_fbase.is_null() {
        return None;
    }
    Some(LoadedImage {
        base: info.dli_fbase as usize,
        path: c_path(info.dli_fname)?,
    })
}

/// Every image currently loaded in the process.
#[cfg(not(target_vendor = "apple"))]
pub fn loaded_images() -> Vec<LoadedImage> {
    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> libc::c_int {
        // SAFETY: data is the Vec passed below; info is valid for this call
        let images = unsafe { &mut *(data as *mut Vec<LoadedImage>) };
        let info = unsafe { &*info };

        let Some(path) = c_path(info.dlpi_name) else {
            return 0;
        };
        let phdrs = unsafe { std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) };
        let lowest = phdrs
            .iter()
            .filter(|p| p.p_type == libc::PT_LOAD)
            .map(|p| p.p_vaddr as usize)
            .min()
            .unwrap_or(0);

        images.push(LoadedImage {
            base: info.dlpi_addr as usize + lowest,
            path,
        });
        0
    }

    let mut images: Vec<LoadedImage> = Vec::new();
    // SAFETY: callback only touches the Vec for the duration of the call
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut images as *mut _ as *mut c_void);
    }
    images
}

#[cfg(target_vendor = "apple")]
pub fn loaded_images() -> Vec<LoadedImage> {
    // SAFETY: dyld's image list accessors are safe to call at any time
    let count = unsafe { libc::_dyld_image_count() };
    (0..count)
        .filter_map(|i| {
            let header = unsafe { libc::_dyld_get_image_header(i) };
            let path = c_path(unsafe { libc::_dyld_get_image_name(i) })?;
            (!header.is_null()).then(|| LoadedImage {
                base: header as usize,
                path,
            })
        })
        .collect()
}

/// Find the loaded image whose `dlopen` handle equals `library`'s.
pub fn image_for_handle(library: &Library) -> Option<LoadedImage> {
    loaded_images().into_iter().find(|image| {
        Library::open_loaded(&image.path).is_some_and(|probe| probe.handle() == library.handle())
    })
}
