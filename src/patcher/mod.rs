//! # Patcher
//!
//! This module covers patchers, which overwrite locations in memory and record what was there before.
//!
//! Patches applied at attach time are permanent. The [`PatchRecord`] a patcher returns keeps the original bytes
//! for diagnostics and for tests, but nothing reverts a patch implicitly.

pub mod byte;
pub mod mem;

use std::mem as std_mem;
use std::slice;

use crate::address::Address;
use crate::error::{PatchError, Result};

use self::byte::BytePatcher;
use self::mem::PermissionWrapper;

/// Patchers write bytes to a location and report what they replaced
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must write exactly the bytes it reports in the returned record
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds, use [`std::convert::Infallible`].
    type Error;

    /// Patches a given location.
    ///
    /// # Safety
    ///
    /// `target` must be valid for reads of `patch.len()` bytes, and writable as far as this patcher requires
    unsafe fn patch(&self, target: Address, patch: &[u8]) -> std::result::Result<PatchRecord, Self::Error>;
}

/// What a single write changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchRecord {
    /// Location that was patched
    address: Address,
    /// Bytes at `address` before the write
    original: Vec<u8>,
    /// Bytes written
    patched: Vec<u8>,
}

impl PatchRecord {
    /// Creates a record
    pub(crate) fn new(address: Address, original: Vec<u8>, patched: Vec<u8>) -> Self {
        Self {
            address,
            original,
            patched,
        }
    }

    /// Location that was patched
    pub fn address(&self) -> Address {
        self.address
    }

    /// Bytes that were overwritten
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Bytes that were written
    pub fn patched(&self) -> &[u8] {
        &self.patched
    }

    /// Number of bytes written
    pub fn len(&self) -> usize {
        self.patched.len()
    }

    /// Whether the write was empty
    pub fn is_empty(&self) -> bool {
        self.patched.is_empty()
    }
}

/// The memory writer every patch goes through.
///
/// Each write makes the touched pages writable, copies the bytes, and restores the previous protection, so no
/// caller ever handles page protection itself.
#[derive(Default)]
pub struct MemoryWriter {
    /// Byte patcher behind a protection toggle
    inner: PermissionWrapper<BytePatcher>,
}

impl MemoryWriter {
    /// Creates a new memory writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `bytes` to `target`
    ///
    /// # Safety
    ///
    /// `target` must be mapped for `bytes.len()` bytes, and overwriting it must not break code currently running
    pub unsafe fn write(&self, target: Address, bytes: &[u8]) -> Result<PatchRecord> {
        self.inner
            .patch(target, bytes)
            .map_err(|e| PatchError::from_permission(target, bytes.len(), e))
    }

    /// Writes the in-memory representation of `value` to `target`
    ///
    /// # Safety
    ///
    /// Same as [`MemoryWriter::write`]; `T` must be plain data without padding (integers, floats, pointers)
    pub unsafe fn write_value<T: Copy>(&self, target: Address, value: T) -> Result<PatchRecord> {
        let bytes = slice::from_raw_parts(
            (&value as *const T).cast::<u8>(),
            std_mem::size_of::<T>(),
        );
        self.write(target, bytes)
    }

    /// Overwrites `count` bytes at `target` with `nop`
    ///
    /// # Safety
    ///
    /// Same as [`MemoryWriter::write`]
    pub unsafe fn nop(&self, target: Address, count: usize) -> Result<PatchRecord> {
        self.write(target, &crate::code::nops(count))
    }

    /// Puts the original bytes of `record` back
    ///
    /// # Safety
    ///
    /// Same as [`MemoryWriter::write`]; the caller must ensure returning to the pre-patch state is safe
    pub unsafe fn revert(&self, record: &PatchRecord) -> Result<PatchRecord> {
        self.write(record.address, &record.original)
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use super::MemoryWriter;
    use crate::address::Address;

    #[test]
    /// Test write, read back, and revert
    fn test_write_round_trip() {
        let mut data = vec![1u8, 2, 3, 4];
        let target = Address::from_ptr(data.as_mut_ptr());
        let writer = MemoryWriter::new();

        let record = unsafe { writer.write(target, &[4, 3, 2, 1]).unwrap() };
        assert_eq!(data, [4, 3, 2, 1]);
        assert_eq!(record.original(), [1, 2, 3, 4]);
        assert_eq!(record.patched(), [4, 3, 2, 1]);

        unsafe { writer.revert(&record).unwrap() };
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    fn test_write_value_and_nop() {
        let mut data = vec![0xCCu8; 8];
        let target = Address::from_ptr(data.as_mut_ptr());
        let writer = MemoryWriter::new();

        unsafe {
            writer.write_value(target, 0x1122_3344u32).unwrap();
            writer.write_value(target.add(4), -1i8).unwrap();
            writer.nop(target.add(5), 2).unwrap();
        }
        assert_eq!(data, [0x44, 0x33, 0x22, 0x11, 0xFF, 0x90, 0x90, 0xCC]);
    }

    #[test]
    /// Writes to read-only pages, across a page boundary, and checks the protection comes back unchanged
    fn test_write_read_only_across_pages() {
        let page = region::page::size();
        let allocation = region::alloc(page * 2, Protection::READ).unwrap();
        let base = Address::from_ptr(allocation.as_ptr::<u8>());
        let target = base.add(page - 2);
        let writer = MemoryWriter::new();

        let record = unsafe { writer.write(target, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap() };
        assert_eq!(record.original(), [0, 0, 0, 0]);
        assert_eq!(unsafe { target.read_bytes(4) }, [0xDE, 0xAD, 0xBE, 0xEF]);

        for region in region::query_range(base.as_ptr::<u8>(), page * 2).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), Protection::READ);
        }
    }
}
