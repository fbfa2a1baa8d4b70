//! # Pattern
//!
//! This module covers signature scanning: compiling wildcard byte signatures and locating them in a region of
//! memory, with the multiplicity checks patch authors rely on (`first`, `get_one`, `count`, `count_hint`).

pub mod scan;
pub mod signature;

use std::slice;

use tracing::debug;

use crate::address::Address;
use crate::error::{PatchError, Result};

pub use scan::{Match, Matches};
pub use signature::Signature;

/// A contiguous, readable range of foreign memory to scan, usually one section of the host image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// First byte of the region
    start: Address,
    /// Length in bytes
    len: usize,
}

impl Region {
    /// Creates a region.
    ///
    /// # Safety
    ///
    /// `len` bytes starting at `start` must be readable for as long as the region (or anything scanned from it)
    /// is used. For the host image this holds for the lifetime of the process.
    pub unsafe fn new(start: Address, len: usize) -> Self {
        Self { start, len }
    }

    /// Creates a region over a buffer.
    ///
    /// # Safety
    ///
    /// The region does not borrow `data`; the caller must keep the buffer alive and in place while it is used.
    pub unsafe fn from_slice(data: &[u8]) -> Self {
        Self::new(Address::from_ptr(data.as_ptr()), data.len())
    }

    /// Creates a region over a buffer that will be patched.
    ///
    /// # Safety
    ///
    /// As for [`Region::from_slice`].
    pub unsafe fn from_mut_slice(data: &mut [u8]) -> Self {
        Self::new(Address::from_ptr(data.as_mut_ptr()), data.len())
    }

    /// First byte of the region
    pub fn start(&self) -> Address {
        self.start
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte
    pub fn end(&self) -> Address {
        self.start.add(self.len)
    }

    /// Whether `address` lies within the region
    pub fn contains(&self, address: Address) -> bool {
        (self.start..self.end()).contains(&address)
    }

    /// Views the region as bytes
    ///
    /// # Safety
    ///
    /// Same contract as [`Region::new`]
    pub(crate) unsafe fn bytes<'a>(&self) -> &'a [u8] {
        slice::from_raw_parts(self.start.as_ptr(), self.len)
    }

    /// Lazily scans the region for `signature`
    pub fn scan<'s>(&self, signature: &'s Signature) -> Matches<'s> {
        Matches::new(signature, *self)
    }
}

/// A signature bound to the region it is searched in
#[derive(Debug)]
pub struct Pattern {
    /// Compiled signature
    signature: Signature,
    /// Region to search
    region: Region,
}

impl Pattern {
    /// Compiles `text` for scanning `region`
    pub fn new(text: &str, region: Region) -> Result<Self> {
        Ok(Self::with_signature(Signature::parse(text)?, region))
    }

    /// Binds an already compiled signature to a region
    pub fn with_signature(signature: Signature, region: Region) -> Self {
        Self { signature, region }
    }

    /// The compiled signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// All matches, lazily, in ascending address order
    pub fn matches(&self) -> Matches<'_> {
        self.region.scan(&self.signature)
    }

    /// The lowest match; fails if there is none
    pub fn first(&self) -> Result<Match<'_>> {
        let found = self.matches().next().ok_or_else(|| self.not_found())?;
        debug!(signature = %self.signature, address = %found.address(), "found first match");
        Ok(found)
    }

    /// The only match; fails if there are none or several
    pub fn get_one(&self) -> Result<Match<'_>> {
        let mut matches = self.matches();
        let found = matches.next().ok_or_else(|| self.not_found())?;
        let extra = matches.count();
        if extra != 0 {
            return Err(PatchError::AmbiguousMatch {
                signature: self.signature.to_string(),
                expected: 1,
                found: 1 + extra,
            });
        }
        debug!(signature = %self.signature, address = %found.address(), "found unique match");
        Ok(found)
    }

    /// Exactly `expected` matches
    pub fn count(&self, expected: usize) -> Result<Vec<Match<'_>>> {
        let found: Vec<_> = self.matches().collect();
        match found.len() {
            0 if expected != 0 => Err(self.not_found()),
            n if n < expected => Err(PatchError::TooFewMatches {
                signature: self.signature.to_string(),
                required: expected,
                found: n,
            }),
            n if n > expected => Err(PatchError::AmbiguousMatch {
                signature: self.signature.to_string(),
                expected,
                found: n,
            }),
            _ => Ok(found),
        }
    }

    /// At least `minimum` matches, returning all of them.
    ///
    /// Used where a fix touches several structurally identical sites and the exact number varies by build.
    pub fn count_hint(&self, minimum: usize) -> Result<Vec<Match<'_>>> {
        let found: Vec<_> = self.matches().collect();
        match found.len() {
            0 if minimum != 0 => Err(self.not_found()),
            n if n < minimum => Err(PatchError::TooFewMatches {
                signature: self.signature.to_string(),
                required: minimum,
                found: n,
            }),
            n => {
                debug!(signature = %self.signature, count = n, "found matches");
                Ok(found)
            }
        }
    }

    /// Error for zero matches
    fn not_found(&self) -> PatchError {
        PatchError::NotFound {
            signature: self.signature.to_string(),
        }
    }
}
