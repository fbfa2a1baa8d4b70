//! # Image
//!
//! Minimal reader for a PE image already mapped by the loader: header validation, section lookup and the import
//! directory. Only what locating scan regions and rewriting the IAT needs.

pub mod imports;

use tracing::debug;

use crate::address::Address;
use crate::error::{PatchError, Result};
use crate::pattern::Region;

pub use imports::{redirect_import, ImportRequest, ImportThunk};

/// `MZ`
const DOS_SIGNATURE: u16 = 0x5A4D;
/// Offset of `e_lfanew` in the DOS header
const DOS_LFANEW: usize = 0x3C;
/// `PE\0\0`
const NT_SIGNATURE: u32 = 0x0000_4550;
/// Size of the signature plus the file header
const NT_OPTIONAL_OFFSET: usize = 4 + 20;
/// Offset of `NumberOfSections` in the NT headers
const NT_NUMBER_OF_SECTIONS: usize = 4 + 2;
/// Offset of `SizeOfOptionalHeader` in the NT headers
const NT_SIZE_OF_OPTIONAL_HEADER: usize = 4 + 16;
/// Offset of `SizeOfImage` in the optional header, same for both widths
const OPTIONAL_SIZE_OF_IMAGE: usize = 56;
/// Size of one section header
const SECTION_HEADER_LEN: usize = 40;
/// Index of the import directory
pub const DIRECTORY_IMPORT: usize = 1;

/// Optional header magic and data directory layout for the host's pointer width
#[cfg(target_pointer_width = "32")]
mod layout {
    /// `IMAGE_NT_OPTIONAL_HDR32_MAGIC`
    pub const MAGIC: u16 = 0x10B;
    /// Offset of `NumberOfRvaAndSizes`
    pub const NUMBER_OF_DIRECTORIES: usize = 92;
    /// Offset of the data directory array
    pub const DIRECTORIES: usize = 96;
}

/// Optional header magic and data directory layout for the host's pointer width
#[cfg(target_pointer_width = "64")]
mod layout {
    /// `IMAGE_NT_OPTIONAL_HDR64_MAGIC`
    pub const MAGIC: u16 = 0x20B;
    /// Offset of `NumberOfRvaAndSizes`
    pub const NUMBER_OF_DIRECTORIES: usize = 108;
    /// Offset of the data directory array
    pub const DIRECTORIES: usize = 112;
}

pub use layout::MAGIC as OPTIONAL_MAGIC;

/// A data directory entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Directory {
    /// RVA of the data
    pub rva: u32,
    /// Size of the data
    pub size: u32,
}

/// A loaded PE image with validated headers
#[derive(Clone, Copy, Debug)]
pub struct Image {
    /// Load address
    base: Address,
    /// Start of the NT headers
    nt: Address,
    /// Start of the optional header
    optional: Address,
}

impl Image {
    /// Validates the headers of the image loaded at `base`
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped image, or at least to readable memory covering its headers and every
    /// structure reached from them, for as long as the `Image` is used.
    pub unsafe fn new(base: Address) -> Result<Self> {
        let malformed = |reason| PatchError::MalformedImage { base, reason };

        if base.read::<u16>() != DOS_SIGNATURE {
            return Err(malformed("missing DOS signature"));
        }
        let lfanew = base.add(DOS_LFANEW).read::<u32>() as usize;
        let nt = base.add(lfanew);
        if nt.read::<u32>() != NT_SIGNATURE {
            return Err(malformed("missing NT signature"));
        }
        let optional = nt.add(NT_OPTIONAL_OFFSET);
        if optional.read::<u16>() != layout::MAGIC {
            return Err(malformed("optional header magic does not match pointer width"));
        }

        Ok(Self { base, nt, optional })
    }

    /// Load address
    pub fn base(&self) -> Address {
        self.base
    }

    /// Address of `rva` within the image
    pub fn rva(&self, rva: u32) -> Address {
        self.base.add(rva as usize)
    }

    /// `SizeOfImage` from the optional header
    pub fn size(&self) -> usize {
        unsafe { self.optional.add(OPTIONAL_SIZE_OF_IMAGE).read::<u32>() as usize }
    }

    /// The whole mapped image
    pub fn region(&self) -> Region {
        unsafe { Region::new(self.base, self.size()) }
    }

    /// Data directory `index`, if the image has one and it is not empty
    pub fn directory(&self, index: usize) -> Option<Directory> {
        let count = unsafe {
            self.optional
                .add(layout::NUMBER_OF_DIRECTORIES)
                .read::<u32>() as usize
        };
        if index >= count {
            return None;
        }

        let entry = self.optional.add(layout::DIRECTORIES + index * 8);
        let directory = unsafe {
            Directory {
                rva: entry.read::<u32>(),
                size: entry.add(4).read::<u32>(),
            }
        };
        (directory.rva != 0).then_some(directory)
    }

    /// Section headers, as `(name, rva, virtual size)`
    pub fn sections(&self) -> impl Iterator<Item = (String, u32, u32)> + '_ {
        let (count, optional_len) = unsafe {
            (
                self.nt.add(NT_NUMBER_OF_SECTIONS).read::<u16>() as usize,
                self.nt.add(NT_SIZE_OF_OPTIONAL_HEADER).read::<u16>() as usize,
            )
        };
        let table = self.optional.add(optional_len);

        (0..count).map(move |index| {
            let header = table.add(index * SECTION_HEADER_LEN);
            unsafe {
                let raw = header.read::<[u8; 8]>();
                let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                (
                    String::from_utf8_lossy(&raw[..len]).into_owned(),
                    header.add(12).read::<u32>(),
                    header.add(8).read::<u32>(),
                )
            }
        })
    }

    /// Memory of the section called `name`
    pub fn section(&self, name: &str) -> Option<Region> {
        self.sections()
            .find(|(section, _, _)| section == name)
            .map(|(_, rva, size)| unsafe { Region::new(self.rva(rva), size as usize) })
    }

    /// Region patches are searched in: `.text`, or the whole image when there is no such section
    pub fn code(&self) -> Region {
        match self.section(".text") {
            Some(text) => text,
            None => {
                debug!(base = %self.base, "no .text section, scanning the whole image");
                self.region()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_headers() {
        let fake = FakeImage::new();
        let image = unsafe { Image::new(fake.base()) }.unwrap();

        assert_eq!(image.base(), fake.base());
        assert_eq!(image.size(), SIZE);
        assert_eq!(image.region().len(), SIZE);
        assert!(image.directory(DIRECTORY_IMPORT).is_none());
    }

    #[test]
    fn test_rejects_bad_headers() {
        let mut fake = FakeImage::new();
        fake.put(NT, b"NE\0\0");
        let err = unsafe { Image::new(fake.base()) }.unwrap_err();
        assert!(matches!(err, PatchError::MalformedImage { reason, .. } if reason.contains("NT")));

        let mut fake = FakeImage::new();
        // the other pointer width
        fake.put(OPTIONAL, &(OPTIONAL_MAGIC ^ 0x300).to_le_bytes());
        let err = unsafe { Image::new(fake.base()) }.unwrap_err();
        assert!(matches!(err, PatchError::MalformedImage { reason, .. } if reason.contains("magic")));

        let mut fake = FakeImage::new();
        fake.put(0, b"ZM");
        assert!(unsafe { Image::new(fake.base()) }.is_err());
    }

    #[test]
    fn test_sections() {
        let mut fake = FakeImage::new();
        fake.add_section(".text", 0x1000, 0x800);
        fake.add_section(".rdata", 0x1800, 0x100);
        let image = unsafe { Image::new(fake.base()) }.unwrap();

        let text = image.section(".text").unwrap();
        assert_eq!(text.start(), fake.base().add(0x1000));
        assert_eq!(text.len(), 0x800);
        assert_eq!(image.code(), text);
        assert_eq!(image.section(".rdata").unwrap().len(), 0x100);
        assert!(image.section(".data").is_none());
    }

    #[test]
    fn test_code_falls_back_to_image() {
        let fake = FakeImage::new();
        let image = unsafe { Image::new(fake.base()) }.unwrap();
        assert_eq!(image.code(), image.region());
    }
}
