use thiserror::Error;

/// Failure reported by a redirection mechanism
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// One installed-but-possibly-inactive redirection.
///
/// Dropping an enabled detour restores the original control path.
pub trait Detour: Send {
    fn enable(&mut self) -> Result<(), BackendError>;
    fn disable(&mut self) -> Result<(), BackendError>;
    fn is_enabled(&self) -> bool;
    /// Address that runs the original behavior, callable while enabled.
    fn original(&self) -> usize;
}

/// A way of routing calls to a target through a replacement.
pub trait DetourBackend {
    type Detour: Detour;

    /// Prepare a redirection from `target` to `replacement` without
    /// activating it.
    ///
    /// # Safety
    ///
    /// `target` must be what this backend patches (a function entry for
    /// code patching, a function-pointer slot for slot redirection) and
    /// must stay valid while the detour lives. `replacement` must have the
    /// target's signature and calling convention.
    unsafe fn intercept(
        &mut self,
        target: usize,
        replacement: usize,
    ) -> Result<Self::Detour, BackendError>;
}
