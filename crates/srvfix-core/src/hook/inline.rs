//! Code patching with relocated trampolines.

use retour::RawDetour;

use super::backend::{BackendError, Detour, DetourBackend};

/// Patches the target's first instructions with a jump to the replacement
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBackend;

pub struct InlineDetour {
    inner: RawDetour,
}

// SAFETY: the detour is only toggled from the control thread that owns the
// interception manager; the patched code itself is process-global.
unsafe impl Send for InlineDetour {}

impl std::fmt::Debug for InlineDetour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineDetour")
            .field("enabled", &self.inner.is_enabled())
            .field("trampoline", &format_args!("0x{:X}", self.original()))
            .finish()
    }
}

impl DetourBackend for InlineBackend {
    type Detour = InlineDetour;

    unsafe fn intercept(
        &mut self,
        target: usize,
        replacement: usize,
    ) -> Result<InlineDetour, BackendError> {
        // SAFETY: forwarded from the caller's contract
        let inner = unsafe { RawDetour::new(target as *const (), replacement as *const ()) }
            .map_err(|e| BackendError(e.to_string()))?;
        Ok(InlineDetour { inner })
    }
}

impl Detour for InlineDetour {
    fn enable(&mut self) -> Result<(), BackendError> {
        // SAFETY: target and replacement were validated by intercept
        unsafe { self.inner.enable() }.map_err(|e| BackendError(e.to_string()))
    }

    fn disable(&mut self) -> Result<(), BackendError> {
        // SAFETY: restores the bytes saved by intercept
        unsafe { self.inner.disable() }.map_err(|e| BackendError(e.to_string()))
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn original(&self) -> usize {
        self.inner.trampoline() as *const () as usize
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[inline(never)]
    extern "C" fn scale(a: i32, b: i32) -> i32 {
        let mut acc = std::hint::black_box(a);
        for _ in 0..std::hint::black_box(b) {
            acc = acc.wrapping_mul(3).wrapping_add(b);
        }
        acc
    }

    extern "C" fn replacement(_a: i32, _b: i32) -> i32 {
        -1
    }

    #[test]
    fn test_inline_detour_redirects_and_restores() {
        let call = std::hint::black_box(scale as extern "C" fn(i32, i32) -> i32);
        let expected = call(2, 3);

        let mut detour = unsafe {
            InlineBackend.intercept(scale as usize, replacement as usize)
        }
        .unwrap();
        assert!(!detour.is_enabled());

        detour.enable().unwrap();
        assert_eq!(call(2, 3), -1);

        let original: extern "C" fn(i32, i32) -> i32 =
            unsafe { std::mem::transmute(detour.original()) };
        assert_eq!(original(2, 3), expected);

        detour.disable().unwrap();
        assert_eq!(call(2, 3), expected);
    }
}
