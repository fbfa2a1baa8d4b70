//! Walks the address space outward from an origin looking for unmapped pages
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

use std::iter::FusedIterator;
use std::ops::Range;

/// Unmapped, page-aligned addresses inside `window`: first upward from `origin`, then downward from it
pub fn free_near(
    origin: usize,
    window: Range<usize>,
) -> impl Iterator<Item = Result<usize, region::Error>> {
    let page = region::page::size();
    let origin = origin - origin % page;

    FreePages::new(Some(origin), window.clone(), Direction::Up, page).chain(FreePages::new(
        origin.checked_sub(page),
        window,
        Direction::Down,
        page,
    ))
}

/// Whether every page in `address..address + len` is unmapped
pub fn is_free(address: usize, len: usize) -> bool {
    let page = region::page::size();
    (address..address.saturating_add(len))
        .step_by(page)
        .all(|page| matches!(region::query(page as *const u8), Err(region::Error::UnmappedRegion)))
}

/// Which way the walk moves
#[derive(Clone, Copy)]
enum Direction {
    /// Towards higher addresses
    Up,
    /// Towards lower addresses
    Down,
}

/// Iterator over free pages in one direction
struct FreePages {
    /// Next address to try
    next: Option<usize>,
    /// Addresses the walk may visit
    window: Range<usize>,
    /// Walk direction
    direction: Direction,
    /// Page size
    page: usize,
}

impl FreePages {
    /// Creates a walk starting at `start`
    fn new(start: Option<usize>, window: Range<usize>, direction: Direction, page: usize) -> Self {
        Self {
            next: start,
            window,
            direction,
            page,
        }
    }

    /// Address of the neighbouring page in the walk direction
    fn step(&self, address: usize) -> Option<usize> {
        match self.direction {
            Direction::Up => address.checked_add(self.page),
            Direction::Down => address.checked_sub(self.page),
        }
    }
}

impl Iterator for FreePages {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self
                .next
                .filter(|address| *address != 0 && self.window.contains(address))?;

            match region::query(current as *const u8) {
                Ok(mapped) => {
                    // Skip the whole mapping at once
                    let range = mapped.as_range();
                    self.next = match self.direction {
                        Direction::Up => Some(range.end),
                        Direction::Down => range.start.checked_sub(self.page),
                    };
                }
                Err(region::Error::UnmappedRegion) => {
                    self.next = self.step(current);
                    return Some(Ok(current));
                }
                Err(error) => {
                    self.next = None;
                    return Some(Err(error));
                }
            }
        }
    }
}

impl FusedIterator for FreePages {}
