//! # Address
//!
//! Typed addresses into memory the crate does not own (the host image, or a test buffer standing in for it).
//!
//! An [`Address`] is only a number until it is dereferenced. Every dereference is `unsafe` and the caller
//! attests that the memory is mapped for the duration of the access.

use std::fmt;
use std::ptr;

/// Address of a location in foreign memory
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    /// Wraps a raw integer address
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// Wraps a pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Raw integer value
    pub const fn get(self) -> usize {
        self.0
    }

    /// Moves the address by a signed byte offset.
    ///
    /// No range check is made: an offset that leaves the scanned region is the patch author's responsibility.
    pub const fn offset(self, offset: isize) -> Self {
        Self(self.0.wrapping_add_signed(offset))
    }

    /// Moves the address forward by `count` bytes
    pub const fn add(self, count: usize) -> Self {
        Self(self.0.wrapping_add(count))
    }

    /// Signed distance from `origin` to `self`
    pub const fn distance_from(self, origin: Address) -> isize {
        self.0.wrapping_sub(origin.0) as isize
    }

    /// Reinterprets the address as a const pointer
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Reinterprets the address as a mutable pointer.
    ///
    /// This does not make the memory writable; writes to code go through [`crate::patcher`].
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Reads a `T` at this address
    ///
    /// # Safety
    ///
    /// `size_of::<T>()` bytes at this address must be readable and form a valid `T`
    pub unsafe fn read<T: Copy>(self) -> T {
        ptr::read_unaligned(self.as_ptr::<T>())
    }

    /// Reads `len` bytes at this address
    ///
    /// # Safety
    ///
    /// `len` bytes at this address must be readable
    pub unsafe fn read_bytes(self, len: usize) -> Vec<u8> {
        std::slice::from_raw_parts(self.as_ptr::<u8>(), len).to_vec()
    }

    /// Reads a NUL-terminated byte string, without the terminator
    ///
    /// # Safety
    ///
    /// The memory from this address up to and including a NUL byte must be readable
    pub unsafe fn read_c_str<'a>(self) -> &'a [u8] {
        std::ffi::CStr::from_ptr(self.as_ptr()).to_bytes()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(address: usize) -> Self {
        Self(address)
    }
}

impl<T> From<*const T> for Address {
    fn from(ptr: *const T) -> Self {
        Self::from_ptr(ptr)
    }
}

impl<T> From<*mut T> for Address {
    fn from(ptr: *mut T) -> Self {
        Self::from_ptr(ptr)
    }
}
