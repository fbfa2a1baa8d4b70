//! # Alloc
//!
//! Executable memory for runtime-assembled stubs (relays and wrappers), allocated close enough to a patch site
//! that a rel32 branch at the site can reach it.
//!
//! Stubs are referenced by patched host code, so they are never handed back: a [`Stub`] keeps its memory alive
//! and the attach context that owns the stubs lives until the process exits.
//!
//! Based on detour-rs: https://github.com/darfink/detour-rs

// detour-rs - A cross-platform detour library written in Rust
// Copyright (C) 2017 Elliott Linder.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// ===============================================================================
//
// minhook-rs - A minimalist x86/x86-64 hooking library for Rust
// Copyright (C) 2015 Jascha Neutelings.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

pub mod pool;
pub mod search;

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::address::Address;

use self::pool::NearAllocator;

/// The furthest distance between a patch site and a stub, kept a little under 2 GiB so a rel32 from anywhere in a
/// 5-byte instruction at the site still reaches every byte of the stub.
pub const STUB_RANGE: usize = 0x7FF0_0000;

/// Errors that occur while allocating stub memory
#[derive(Debug, Error)]
pub enum StubError {
    /// No free memory within reach of the origin
    #[error("no free memory within {range:#x} bytes of {origin}")]
    OutOfRange {
        /// Address the stub must be close to
        origin: Address,
        /// Maximum distance
        range: usize,
    },
    /// Error while mapping a page
    #[error("{0}")]
    Map(mmap::MapError),
    /// Error while querying the address space
    #[error("{0}")]
    Query(#[from] region::Error),
}

/// A thread-safe pool of executable memory for stubs
#[derive(Clone)]
pub struct StubPool(Arc<Mutex<NearAllocator>>);

impl StubPool {
    /// Creates a pool allocating within `max_distance` bytes of the requested origin
    pub fn new(max_distance: usize) -> Self {
        Self(Arc::new(Mutex::new(NearAllocator::new(max_distance))))
    }

    /// Allocates `code.len()` bytes of executable memory close to `origin` and copies `code` into it
    pub fn allocate(&self, origin: Address, code: &[u8]) -> Result<Stub, StubError> {
        let mut allocator = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = allocator.allocate(origin, code.len())?;
        data.copy_from_slice(code);
        let stub = Stub { data };
        debug!(%origin, stub = %stub.address(), len = code.len(), "allocated stub");
        Ok(stub)
    }
}

impl Default for StubPool {
    fn default() -> Self {
        Self::new(STUB_RANGE)
    }
}

/// A block of executable memory holding a stub
pub struct Stub {
    /// Chunk of a mapped, executable pool page
    data: pool::Allocation,
}

impl Stub {
    /// Entry point of the stub
    pub fn address(&self) -> Address {
        Address::from_ptr(self.data.as_ptr())
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stub")
            .field("address", &self.address())
            .field("len", &self.data.len())
            .finish()
    }
}

impl Deref for Stub {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.deref()
    }
}

impl DerefMut for Stub {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Address {
        Address::from_ptr(test_origin as *const u8)
    }

    fn test_origin() {}

    #[test]
    fn test_allocate_near() {
        let pool = StubPool::default();
        let stub = pool.allocate(origin(), &[0xC3; 16]).unwrap();

        assert_eq!(&stub[..], &[0xC3; 16]);
        let distance = stub.address().distance_from(origin()).unsigned_abs();
        assert!(distance < STUB_RANGE, "stub {distance:#x} bytes away");
    }

    #[test]
    fn test_allocations_share_pages() {
        let pool = StubPool::default();
        let first = pool.allocate(origin(), &[0x90; 8]).unwrap();
        let second = pool.allocate(origin(), &[0xCC; 8]).unwrap();

        assert_ne!(first.address(), second.address());
        assert_eq!(&first[..], &[0x90; 8]);
        assert_eq!(&second[..], &[0xCC; 8]);
    }

    #[test]
    fn test_stub_is_executable() {
        let pool = StubPool::default();
        let stub = pool.allocate(origin(), &[0xC3]).unwrap();
        let info = region::query(stub.address().as_ptr::<u8>()).unwrap();
        assert!(info.protection().contains(region::Protection::EXECUTE));
    }
}
