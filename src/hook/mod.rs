//! # Hook
//!
//! This module covers hooks, which redirect execution from a call or jump site to a replacement.
//!
//! - [`inject`] writes a fresh `call`/`jmp rel32` at a site, whatever was there before.
//! - [`intercept`] rewrites an existing `call`/`jmp rel32` and hands back the original destination, so the
//!   replacement can forward to it.
//!
//! Replacements must use exactly the calling convention the site expects; nothing here adapts conventions. When a
//! replacement has to keep the x87 stack intact for its caller, wrap it with [`crate::wrapper::fpu`].

pub mod inject;
pub mod intercept;

use crate::address::Address;
use crate::alloc::{Stub, StubPool};
use crate::code;
use crate::error::{PatchError, Result};

pub use inject::{inject, Injection};
pub use intercept::{intercept, Interception};

pub use crate::code::BranchKind as HookKind;

/// Finds a destination a rel32 branch at `site` can reach.
///
/// Returns `destination` itself when it is in range. Otherwise (only possible on 64-bit hosts) an absolute-jump
/// relay stub is allocated near `site`, and the relay is returned along with the stub that keeps it alive.
pub(crate) fn reachable(
    stubs: &StubPool,
    site: Address,
    destination: Address,
) -> Result<(Address, Option<Stub>)> {
    if code::in_rel32_range(site, destination) {
        return Ok((destination, None));
    }

    #[cfg(target_pointer_width = "64")]
    {
        let relay = stubs.allocate(site, &code::x64::jmp_abs(destination.get() as u64))?;
        tracing::debug!(%site, %destination, relay = %relay.address(), "destination out of rel32 range, using relay");
        Ok((relay.address(), Some(relay)))
    }

    #[cfg(not(target_pointer_width = "64"))]
    {
        let _ = stubs;
        Err(PatchError::OutOfRange {
            from: site,
            to: destination,
            width: 32,
        })
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
pub(crate) mod testing {
    //! Executable host code for hook tests: tiny functions assembled into stub memory

    use crate::address::Address;
    use crate::alloc::{Stub, StubPool};
    use crate::code::{branch_rel32, BranchKind};

    /// Offset of the `call` inside [`call_host`]
    pub const CALL_SITE: usize = 4;

    /// `sub rsp, 8; call target; add rsp, 8; ret`, callable as `extern "C" fn() -> u32`
    pub fn call_host(pool: &StubPool, target: Address) -> Stub {
        let mut host = pool
            .allocate(
                target,
                &[
                    0x48, 0x83, 0xEC, 0x08, 0xE8, 0, 0, 0, 0, 0x48, 0x83, 0xC4, 0x08, 0xC3,
                ],
            )
            .unwrap();
        let site = host.address().add(CALL_SITE);
        let call = branch_rel32(BranchKind::Call, site, target).unwrap();
        host[CALL_SITE..CALL_SITE + 5].copy_from_slice(&call);
        host
    }

    /// `jmp target`, callable as the target itself
    pub fn jump_host(pool: &StubPool, target: Address) -> Stub {
        let mut host = pool.allocate(target, &[0xE9, 0, 0, 0, 0]).unwrap();
        let jump = branch_rel32(BranchKind::Jump, host.address(), target).unwrap();
        host.copy_from_slice(&jump);
        host
    }

    /// Calls host code as `extern "C" fn() -> u32`
    pub fn run(address: Address) -> u32 {
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(address.get()) };
        f()
    }
}
