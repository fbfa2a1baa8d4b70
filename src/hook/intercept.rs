//! Interception of existing `call`/`jmp rel32` instructions

use std::mem;

use tracing::debug;

use crate::address::Address;
use crate::alloc::{Stub, StubPool};
use crate::code::decode::decode_branch;
use crate::code::{branch_rel32, BranchKind};
use crate::error::Result;
use crate::patcher::{MemoryWriter, PatchRecord};

/// An intercepted branch
///
/// Keeps the original destination so the replacement can forward to it, typically through a static the replacement
/// reads.
#[derive(Debug)]
pub struct Interception {
    /// Whether the site was a call or a jump
    kind: BranchKind,
    /// Address of the branch instruction
    site: Address,
    /// Where the branch went before
    original: Address,
    /// Where the branch goes now
    replacement: Address,
    /// Relay between the site and a far replacement
    relay: Option<Stub>,
    /// The five bytes rewritten at the site
    record: PatchRecord,
}

impl Interception {
    /// Call or jump, as found at the site
    pub fn kind(&self) -> BranchKind {
        self.kind
    }

    /// Address of the rewritten instruction
    pub fn site(&self) -> Address {
        self.site
    }

    /// Destination before interception
    pub fn original(&self) -> Address {
        self.original
    }

    /// Destination after interception
    pub fn replacement(&self) -> Address {
        self.replacement
    }

    /// Relay stub, when the replacement was too far for a direct branch
    pub fn relay(&self) -> Option<&Stub> {
        self.relay.as_ref()
    }

    /// Record of the rewrite
    pub fn record(&self) -> &PatchRecord {
        &self.record
    }

    /// The original destination as a function pointer
    ///
    /// # Safety
    ///
    /// `F` must be a pointer-sized function pointer type matching the original's signature and calling convention.
    pub unsafe fn original_as<F: Copy>(&self) -> F {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<usize>());
        mem::transmute_copy(&self.original.get())
    }
}

/// Redirects the `call rel32` or `jmp rel32` at `site` to `replacement`, keeping its kind.
///
/// Fails with [`UnsupportedOpcode`](crate::error::PatchError::UnsupportedOpcode) when the instruction at `site` is
/// anything else, in which case nothing is written.
///
/// # Safety
///
/// Five bytes at `site` must be readable code, and `replacement` must have the exact signature and calling
/// convention of the original destination.
pub unsafe fn intercept(
    writer: &MemoryWriter,
    stubs: &StubPool,
    site: Address,
    replacement: Address,
) -> Result<Interception> {
    let branch = decode_branch(site)?;
    let (target, relay) = super::reachable(stubs, site, replacement)?;
    let code = branch_rel32(branch.kind, site, target)?;
    let record = writer.write(site, &code)?;

    debug!(%site, original = %branch.target, %replacement, kind = ?branch.kind, "intercepted branch");
    Ok(Interception {
        kind: branch.kind,
        site,
        original: branch.target,
        replacement,
        relay,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchError;

    #[test]
    fn test_intercept_rewrites_displacement() {
        let mut code: [u8; 8] = [0x90, 0xE8, 0x10, 0x00, 0x00, 0x00, 0x90, 0x90];
        let site = Address::from(code.as_mut_ptr()).add(1);
        let original = site.add(5 + 0x10);
        let replacement = site.add(5 + 0x20);

        let interception =
            unsafe { intercept(&MemoryWriter::new(), &StubPool::default(), site, replacement) }.unwrap();

        assert_eq!(interception.kind(), BranchKind::Call);
        assert_eq!(interception.original(), original);
        assert_eq!(interception.replacement(), replacement);
        assert_eq!(code, [0x90, 0xE8, 0x20, 0x00, 0x00, 0x00, 0x90, 0x90]);
        assert_eq!(interception.record().original(), &[0xE8, 0x10, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_intercept_rejects_other_instructions() {
        let mut code = [0x8B, 0x46, 0x08, 0x3B, 0xF8];
        let site = Address::from(code.as_mut_ptr());

        let err = unsafe { intercept(&MemoryWriter::new(), &StubPool::default(), site, site.add(0x40)) }
            .unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedOpcode { ref mnemonic, .. } if mnemonic == "mov"));
        // nothing written
        assert_eq!(code, [0x8B, 0x46, 0x08, 0x3B, 0xF8]);
    }

    #[cfg(target_arch = "x86_64")]
    mod execution {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use super::*;
        use crate::hook::testing;

        #[inline(never)]
        extern "C" fn original() -> u32 {
            1
        }

        #[inline(never)]
        extern "C" fn replacement() -> u32 {
            2
        }

        static FORWARD_TO: AtomicUsize = AtomicUsize::new(0);

        #[inline(never)]
        extern "C" fn forwarding() -> u32 {
            let original: extern "C" fn() -> u32 =
                unsafe { mem::transmute(FORWARD_TO.load(Ordering::SeqCst)) };
            original() + 10
        }

        #[test]
        fn test_intercept_call() {
            let pool = StubPool::default();
            let host = testing::call_host(&pool, Address::new(original as usize));
            assert_eq!(testing::run(host.address()), 1);

            let site = host.address().add(testing::CALL_SITE);
            let interception =
                unsafe { intercept(&MemoryWriter::new(), &pool, site, Address::new(replacement as usize)) }
                    .unwrap();

            assert_eq!(interception.original(), Address::new(original as usize));
            assert_eq!(testing::run(host.address()), 2);

            // the original is still callable
            let f: extern "C" fn() -> u32 = unsafe { interception.original_as() };
            assert_eq!(f(), 1);
        }

        #[test]
        fn test_intercept_jump_forwards() {
            let pool = StubPool::default();
            let host = testing::jump_host(&pool, Address::new(original as usize));
            assert_eq!(testing::run(host.address()), 1);

            let interception = unsafe {
                intercept(
                    &MemoryWriter::new(),
                    &pool,
                    host.address(),
                    Address::new(forwarding as usize),
                )
            }
            .unwrap();
            assert_eq!(interception.kind(), BranchKind::Jump);
            FORWARD_TO.store(interception.original().get(), Ordering::SeqCst);

            assert_eq!(testing::run(host.address()), 11);
        }
    }
}
