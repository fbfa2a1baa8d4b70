//! A patcher that lifts page protection around the write, so code and read-only data can be patched

use region::Protection;
use thiserror::Error;
use tracing::trace;

use crate::address::Address;

use super::{PatchRecord, Patcher};

/// Errors of a protection-lifting write
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}

/// Makes every page under the write readable, writable and executable, runs the inner patcher, then puts each page
/// back to its previous protection.
///
/// # Safety
///
/// Only the bytes covered by `patch` are unprotected. The inner patcher must not write past them.
#[derive(Default)]
pub struct PermissionWrapper<P: Patcher> {
    /// Patcher doing the actual write
    patcher: P,
}

impl<P: Patcher> PermissionWrapper<P> {
    /// Wraps `patcher`
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
{
    type Error = PermissionError<P::Error>;

    unsafe fn patch(&self, target: Address, patch: &[u8]) -> Result<PatchRecord, Self::Error> {
        if patch.is_empty() {
            return self
                .patcher
                .patch(target, patch)
                .map_err(PermissionError::CustomError);
        }

        // The guard puts every page back to its previous protection when dropped, including on error
        let _guard = region::protect_with_handle(
            target.as_ptr::<u8>(),
            patch.len(),
            Protection::READ_WRITE_EXECUTE,
        )?;
        trace!(%target, len = patch.len(), "unprotected for write");

        self.patcher
            .patch(target, patch)
            .map_err(PermissionError::CustomError)
    }
}
