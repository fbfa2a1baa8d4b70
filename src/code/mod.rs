//! # Code
//!
//! Encoders for the handful of x86 instructions patches are made of, and a decoder for the branch instructions
//! interceptions rewrite. Everything calling-convention or architecture specific lives here, in [`crate::hook`]
//! and in [`crate::wrapper`].

pub mod decode;
pub mod x64;

use crate::address::Address;
use crate::error::{PatchError, Result};

/// `nop`
pub const NOP: u8 = 0x90;
/// `call rel32`
pub const CALL_REL32: u8 = 0xE8;
/// `jmp rel32`
pub const JMP_REL32: u8 = 0xE9;
/// `jmp rel8`
pub const JMP_REL8: u8 = 0xEB;
/// Length of a `call rel32` or `jmp rel32`
pub const BRANCH_REL32_LEN: usize = 5;

/// Shape of a relative branch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    /// `call rel32`: the destination returns to the instruction after the site
    Call,
    /// `jmp rel32`: the destination takes over, typically a tail call
    Jump,
}

impl BranchKind {
    /// Opcode of the rel32 form
    pub fn opcode(self) -> u8 {
        match self {
            Self::Call => CALL_REL32,
            Self::Jump => JMP_REL32,
        }
    }
}

/// `count` single-byte `nop`s
pub fn nops(count: usize) -> Vec<u8> {
    vec![NOP; count]
}

/// Displacement from the end of an instruction at `site` of length `len` to `destination`, if it fits in 32 bits
pub fn rel32(site: Address, len: usize, destination: Address) -> Option<i32> {
    i32::try_from(destination.distance_from(site.add(len))).ok()
}

/// Whether a rel32 branch at `site` can reach `destination`
pub fn in_rel32_range(site: Address, destination: Address) -> bool {
    rel32(site, BRANCH_REL32_LEN, destination).is_some()
}

/// Encodes a `call rel32` or `jmp rel32` placed at `site` branching to `destination`
pub fn branch_rel32(
    kind: BranchKind,
    site: Address,
    destination: Address,
) -> Result<[u8; BRANCH_REL32_LEN]> {
    let displacement =
        rel32(site, BRANCH_REL32_LEN, destination).ok_or(PatchError::OutOfRange {
            from: site,
            to: destination,
            width: 32,
        })?;

    let mut code = [kind.opcode(), 0, 0, 0, 0];
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    Ok(code)
}

/// Encodes a short `jmp rel8` placed at `site` branching to `destination`
pub fn jmp_rel8(site: Address, destination: Address) -> Result<[u8; 2]> {
    let displacement = i8::try_from(destination.distance_from(site.add(2))).map_err(|_| {
        PatchError::OutOfRange {
            from: site,
            to: destination,
            width: 8,
        }
    })?;
    Ok([JMP_REL8, displacement as u8])
}
