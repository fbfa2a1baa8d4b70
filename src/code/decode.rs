//! Decoding of the branch instructions interceptions rewrite

use iced_x86::{Code, Decoder, DecoderOptions};

use crate::address::Address;
use crate::error::{PatchError, Result};

use super::{BranchKind, BRANCH_REL32_LEN};

/// Decoder bitness matching the host
const BITNESS: u32 = usize::BITS;

/// A decoded near `call`/`jmp` with a 32-bit displacement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    /// Call or jump
    pub kind: BranchKind,
    /// Address of the instruction
    pub site: Address,
    /// Absolute destination
    pub target: Address,
}

/// Decodes the instruction at `site`, which must be a `call rel32` or `jmp rel32`
///
/// # Safety
///
/// [`BRANCH_REL32_LEN`] bytes at `site` must be readable
pub unsafe fn decode_branch(site: Address) -> Result<Branch> {
    let bytes = site.read_bytes(BRANCH_REL32_LEN);
    decode_branch_bytes(site, &bytes)
}

/// Decodes `bytes` as if they were located at `site`
pub fn decode_branch_bytes(site: Address, bytes: &[u8]) -> Result<Branch> {
    let mut decoder = Decoder::with_ip(BITNESS, bytes, site.get() as u64, DecoderOptions::NONE);
    let instruction = decoder.decode();

    let kind = match instruction.code() {
        Code::Call_rel32_32 | Code::Call_rel32_64 => BranchKind::Call,
        Code::Jmp_rel32_32 | Code::Jmp_rel32_64 => BranchKind::Jump,
        _ => {
            return Err(PatchError::UnsupportedOpcode {
                address: site,
                mnemonic: format!("{:?}", instruction.mnemonic()).to_lowercase(),
            })
        }
    };

    Ok(Branch {
        kind,
        site,
        target: Address::new(instruction.near_branch_target() as usize),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_call() {
        let site = Address::new(0x401000);
        let branch = decode_branch_bytes(site, &[0xE8, 0xFB, 0x0F, 0x00, 0x00]).unwrap();
        assert_eq!(branch.kind, BranchKind::Call);
        assert_eq!(branch.target, Address::new(0x402000));
    }

    #[test]
    fn test_decode_jump_backwards() {
        let site = Address::new(0x401000);
        let branch = decode_branch_bytes(site, &[0xE9, 0xFB, 0xEF, 0xFF, 0xFF]).unwrap();
        assert_eq!(branch.kind, BranchKind::Jump);
        assert_eq!(branch.target, Address::new(0x400000));
    }

    #[test]
    fn test_decode_unsupported() {
        let site = Address::new(0x401000);
        // jmp rel8
        let err = decode_branch_bytes(site, &[0xEB, 0x10, 0x90, 0x90, 0x90]).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedOpcode { .. }));
        // call [eax]
        let err = decode_branch_bytes(site, &[0xFF, 0x10, 0x90, 0x90, 0x90]).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedOpcode { .. }));
        // truncated
        let err = decode_branch_bytes(site, &[0xE8, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            PatchError::UnsupportedOpcode { ref mnemonic, .. } if mnemonic == "invalid"
        ));
    }
}
