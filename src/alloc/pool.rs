//! Sub-allocation of executable pages mapped near a requested origin
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

use std::ops::Range;
use std::slice;

use slice_pool::sync::{SliceBox, SlicePool};
use tracing::trace;

use crate::address::Address;

use super::search;
use super::StubError;

/// A chunk of a pool page
pub type Allocation = SliceBox<u8>;

/// Pools of executable pages, each carved up for stubs
pub struct NearAllocator {
    /// Max distance between an origin and any byte of its allocation
    max_distance: usize,
    /// Pages mapped so far
    pools: Vec<SlicePool<u8>>,
}

impl NearAllocator {
    /// Creates an allocator with no pages mapped yet
    pub fn new(max_distance: usize) -> Self {
        Self {
            max_distance,
            pools: Vec::new(),
        }
    }

    /// Allocates `size` bytes within reach of `origin`, mapping a new pool if no existing one has room
    pub fn allocate(&mut self, origin: Address, size: usize) -> Result<Allocation, StubError> {
        let origin = origin.get();
        let window = origin.saturating_sub(self.max_distance)..origin.saturating_add(self.max_distance);

        let reusable = self
            .pools
            .iter()
            .filter(|pool| pool_within(pool, &window))
            .find_map(|pool| pool.alloc(size));
        if let Some(allocation) = reusable {
            return Ok(allocation);
        }

        let pool = Self::map_pool(origin, &window, size)?;
        let allocation = pool.alloc(size).ok_or(StubError::OutOfRange {
            origin: Address::new(origin),
            range: self.max_distance,
        })?;
        self.pools.push(pool);
        Ok(allocation)
    }

    /// Maps a fresh pool large enough for `size` bytes as close to `origin` as possible
    fn map_pool(
        origin: usize,
        window: &Range<usize>,
        size: usize,
    ) -> Result<SlicePool<u8>, StubError> {
        let page = region::page::size();
        let len = size.div_ceil(page).max(1) * page;

        for candidate in search::free_near(origin, window.clone()) {
            let address = candidate?;
            if address.saturating_add(len) > window.end || !search::is_free(address, len) {
                continue;
            }
            match StubPage::map(address, len) {
                Ok(page) => {
                    trace!(address = %Address::new(address), len, "mapped stub page");
                    return Ok(SlicePool::new(page));
                }
                // Lost a race for the range or hit allocation granularity; keep looking
                Err(mmap::MapError::ErrNoMem) => continue,
                Err(e) => trace!(address = %Address::new(address), error = %e, "mapping failed"),
            }
        }

        Err(StubError::OutOfRange {
            origin: Address::new(origin),
            range: window.end.saturating_sub(origin),
        })
    }
}

/// Whether every byte of `pool` lies inside `window`
fn pool_within(pool: &SlicePool<u8>, window: &Range<usize>) -> bool {
    let start = pool.as_ptr() as usize;
    let end = start + pool.len();
    window.contains(&start) && window.contains(&(end - 1))
}

/// A readable, writable and executable mapping backing one pool
struct StubPage(mmap::MemoryMap);

impl StubPage {
    /// Maps `len` bytes at exactly `address`
    fn map(address: usize, len: usize) -> Result<Self, mmap::MapError> {
        mmap::MemoryMap::new(
            len,
            &[
                mmap::MapOption::MapReadable,
                mmap::MapOption::MapWritable,
                mmap::MapOption::MapExecutable,
                mmap::MapOption::MapAddr(address as *const u8),
            ],
        )
        .map(Self)
    }
}

impl AsRef<[u8]> for StubPage {
    fn as_ref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for StubPage {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

// Safety: the mapping is plain memory, only reached through the pool's own synchronization
unsafe impl Send for StubPage {}
unsafe impl Sync for StubPage {}
