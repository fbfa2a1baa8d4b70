//! Lazy scanning of a region for a signature

use std::iter::FusedIterator;

use crate::address::Address;

use super::signature::Signature;
use super::Region;

/// A location where a signature was found
#[derive(Clone, Copy, Debug)]
pub struct Match<'s> {
    /// Address of the first byte of the match
    address: Address,
    /// Signature that produced the match
    signature: &'s Signature,
}

impl<'s> Match<'s> {
    /// Address of the first matched byte
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signature that produced this match
    pub fn signature(&self) -> &'s Signature {
        self.signature
    }

    /// Resolves the match plus a signed byte offset.
    ///
    /// The offset may point before the match or past its end; whatever it points at is the patch author's
    /// responsibility.
    pub fn resolve(&self, offset: isize) -> Address {
        self.address.offset(offset)
    }

    /// Resolves the match plus an offset as a typed pointer
    pub fn get<T>(&self, offset: isize) -> *mut T {
        self.resolve(offset).as_mut_ptr()
    }
}

/// Iterator over the matches of a signature in a region, in ascending address order.
///
/// Nothing is cached: cloning the iterator, or calling [`super::Pattern::matches`] again, scans afresh.
#[derive(Clone)]
pub struct Matches<'s> {
    /// Signature being searched for
    signature: &'s Signature,
    /// Region being searched
    region: Region,
    /// Offset into the region of the next candidate start
    cursor: usize,
}

impl<'s> Matches<'s> {
    /// Starts a scan at the beginning of `region`
    pub(crate) fn new(signature: &'s Signature, region: Region) -> Self {
        Self {
            signature,
            region,
            cursor: 0,
        }
    }
}

impl<'s> Iterator for Matches<'s> {
    type Item = Match<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        // Safety: constructing the region attested that it stays readable
        let haystack = unsafe { self.region.bytes() };
        let len = self.signature.len();
        let last_start = haystack.len().checked_sub(len)?;
        let (anchor, anchor_byte) = self.signature.anchor();

        while self.cursor <= last_start {
            let window = &haystack[self.cursor + anchor..=last_start + anchor];
            let Some(found) = memchr::memchr(anchor_byte, window) else {
                self.cursor = last_start + 1;
                break;
            };

            let start = self.cursor + found;
            self.cursor = start + 1;
            if self.signature.matches(&haystack[start..start + len]) {
                return Some(Match {
                    address: self.region.start().add(start),
                    signature: self.signature,
                });
            }
        }

        None
    }
}

impl FusedIterator for Matches<'_> {}

#[cfg(test)]
mod tests {
    use crate::pattern::{Region, Signature};

    #[test]
    fn test_ascending_and_overlapping() {
        let data = [0x90u8, 0x90, 0x90, 0x00, 0x90, 0x90];
        let region = unsafe { Region::from_slice(&data) };
        let sig = Signature::parse("90 90").unwrap();

        let offsets: Vec<_> = region
            .scan(&sig)
            .map(|m| m.address().distance_from(region.start()))
            .collect();
        assert_eq!(offsets, [0, 1, 4]);
    }

    #[test]
    fn test_anchor_after_wildcards() {
        let data = [0x11u8, 0x22, 0xC3, 0x33, 0x44, 0xC3];
        let region = unsafe { Region::from_slice(&data) };
        let sig = Signature::parse("? ? C3").unwrap();

        let offsets: Vec<_> = region
            .scan(&sig)
            .map(|m| m.address().distance_from(region.start()))
            .collect();
        assert_eq!(offsets, [0, 3]);
    }

    #[test]
    fn test_restartable() {
        let data = [0xAAu8, 0xBB, 0xAA, 0xBB];
        let region = unsafe { Region::from_slice(&data) };
        let sig = Signature::parse("AA BB").unwrap();

        let mut matches = region.scan(&sig);
        let first = matches.next().unwrap();
        let replay = matches.clone();
        assert_eq!(matches.count(), 1);
        assert_eq!(replay.count(), 1);
        assert_eq!(region.scan(&sig).next().unwrap().address(), first.address());
    }

    #[test]
    fn test_signature_longer_than_region() {
        let data = [0xAAu8];
        let region = unsafe { Region::from_slice(&data) };
        let sig = Signature::parse("AA BB").unwrap();
        assert_eq!(region.scan(&sig).count(), 0);
    }

    #[test]
    fn test_match_at_region_end() {
        let data = [0x00u8, 0x00, 0xAA, 0xBB];
        let region = unsafe { Region::from_slice(&data) };
        let sig = Signature::parse("AA ?").unwrap();
        let found: Vec<_> = region.scan(&sig).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resolve(1), region.start().add(3));
        assert_eq!(unsafe { *found[0].get::<u8>(1) }, 0xBB);
    }
}
