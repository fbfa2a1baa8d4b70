//! Plain byte writes

use std::convert::Infallible;
use std::ptr;

use crate::address::Address;

use super::{PatchRecord, Patcher};

/// Copies bytes over a location that is already writable, keeping what was there.
/// Never fails and leaves page protection alone.
#[derive(Default)]
pub struct BytePatcher;

impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}

unsafe impl Patcher for BytePatcher {
    type Error = Infallible;

    unsafe fn patch(&self, target: Address, patch: &[u8]) -> Result<PatchRecord, Self::Error> {
        let mut original = vec![0u8; patch.len()];

        // Safety: caller must pass in a `target` that is valid for the full length of the patch
        ptr::copy_nonoverlapping(target.as_ptr::<u8>(), original.as_mut_ptr(), patch.len());

        // Safety: caller must ensure that `target` is writable
        ptr::copy(patch.as_ptr(), target.as_mut_ptr::<u8>(), patch.len());

        Ok(PatchRecord::new(target, original, patch.to_vec()))
    }
}
