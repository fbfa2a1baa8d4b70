//! Wrapper that preserves the x87/SSE state across a call
//!
//! The stub aligns the stack, saves the full FPU state with `fxsave`, replays the instructions a hook displaced,
//! calls the target, restores the state with `fxrstor` and returns to whoever called into the stub.

use tracing::debug;

use crate::address::Address;
use crate::alloc::{Stub, StubPool};
use crate::error::Result;

use super::CallWrapper;

#[cfg(target_pointer_width = "32")]
mod frame {
    /// `push ebp; mov ebp, esp; and esp, -16; sub esp, 512`
    pub const PROLOGUE: &[u8] = &[
        0x55, 0x89, 0xE5, 0x83, 0xE4, 0xF0, 0x81, 0xEC, 0x00, 0x02, 0x00, 0x00,
    ];
    /// `mov esp, ebp; pop ebp; ret`
    pub const EPILOGUE: &[u8] = &[0x89, 0xEC, 0x5D, 0xC3];
    /// `fxsave [esp]`
    pub const SAVE: &[u8] = &[0x0F, 0xAE, 0x04, 0x24];
    /// `fxrstor [esp]`
    pub const RESTORE: &[u8] = &[0x0F, 0xAE, 0x0C, 0x24];
    /// `call rel32`
    pub const CALL_LEN: usize = 5;
}

#[cfg(target_pointer_width = "64")]
mod frame {
    /// `push rbp; mov rbp, rsp; and rsp, -16; sub rsp, 544`
    ///
    /// The save area sits above 32 bytes left free for callees that spill register arguments.
    pub const PROLOGUE: &[u8] = &[
        0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xE4, 0xF0, 0x48, 0x81, 0xEC, 0x20, 0x02, 0x00, 0x00,
    ];
    /// `mov rsp, rbp; pop rbp; ret`
    pub const EPILOGUE: &[u8] = &[0x48, 0x89, 0xEC, 0x5D, 0xC3];
    /// `fxsave [rsp + 32]`
    pub const SAVE: &[u8] = &[0x0F, 0xAE, 0x44, 0x24, 0x20];
    /// `fxrstor [rsp + 32]`
    pub const RESTORE: &[u8] = &[0x0F, 0xAE, 0x4C, 0x24, 0x20];
    /// Absolute call
    pub const CALL_LEN: usize = crate::code::x64::CALL_ABS_LEN;
}

/// Wraps a target with an FPU-state-preserving stub
#[derive(Clone)]
pub struct FpuWrapper {
    /// Where stubs are allocated
    stubs: StubPool,
    /// Instructions replayed before the call, normally the ones a hook jump overwrote
    displaced: Vec<u8>,
}

impl FpuWrapper {
    /// Creates a wrapper replaying `displaced` before each call
    ///
    /// `displaced` must be position independent, it is copied into the stub as is.
    pub fn new(stubs: StubPool, displaced: &[u8]) -> Self {
        Self {
            stubs,
            displaced: displaced.to_vec(),
        }
    }

    /// Total length of the assembled stub
    pub fn stub_len(&self) -> usize {
        frame::PROLOGUE.len()
            + frame::SAVE.len()
            + self.displaced.len()
            + frame::CALL_LEN
            + frame::RESTORE.len()
            + frame::EPILOGUE.len()
    }

    /// Assembles the stub as it would run at `stub`
    pub fn assemble(&self, stub: Address, target: Address) -> Result<Vec<u8>> {
        let mut code = Vec::with_capacity(self.stub_len());
        code.extend_from_slice(frame::PROLOGUE);
        code.extend_from_slice(frame::SAVE);
        code.extend_from_slice(&self.displaced);
        code.extend_from_slice(&call(stub.add(code.len()), target)?);
        code.extend_from_slice(frame::RESTORE);
        code.extend_from_slice(frame::EPILOGUE);
        Ok(code)
    }
}

#[cfg(target_pointer_width = "32")]
fn call(site: Address, target: Address) -> Result<Vec<u8>> {
    Ok(crate::code::branch_rel32(crate::code::BranchKind::Call, site, target)?.to_vec())
}

#[cfg(target_pointer_width = "64")]
fn call(_site: Address, target: Address) -> Result<Vec<u8>> {
    Ok(crate::code::x64::call_abs(target.get() as u64).to_vec())
}

unsafe impl CallWrapper for FpuWrapper {
    type Error = crate::error::PatchError;

    unsafe fn wrap(&self, near: Address, target: Address) -> Result<Stub> {
        // The call encoding depends on where the stub lands, so reserve first and assemble in place
        let mut stub = self.stubs.allocate(near, &vec![0xCC; self.stub_len()])?;
        let code = self.assemble(stub.address(), target)?;
        stub.copy_from_slice(&code);

        debug!(stub = %stub.address(), %target, displaced = self.displaced.len(), "assembled fpu wrapper");
        Ok(stub)
    }
}
