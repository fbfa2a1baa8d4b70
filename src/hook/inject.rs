//! Fresh branches written over arbitrary code

use tracing::debug;

use crate::address::Address;
use crate::alloc::{Stub, StubPool};
use crate::code::{branch_rel32, BranchKind};
use crate::error::Result;
use crate::patcher::{MemoryWriter, PatchRecord};

/// A branch written by [`inject`]
#[derive(Debug)]
pub struct Injection {
    /// Call or jump
    kind: BranchKind,
    /// Where the branch was written
    site: Address,
    /// Where the branch ends up
    destination: Address,
    /// Relay between the site and a far destination
    relay: Option<Stub>,
    /// The bytes that were replaced
    record: PatchRecord,
}

impl Injection {
    /// Call or jump
    pub fn kind(&self) -> BranchKind {
        self.kind
    }

    /// Address the branch was written to
    pub fn site(&self) -> Address {
        self.site
    }

    /// Final destination of the branch
    pub fn destination(&self) -> Address {
        self.destination
    }

    /// Relay stub, when the destination was too far for a direct branch
    pub fn relay(&self) -> Option<&Stub> {
        self.relay.as_ref()
    }

    /// Record of the five bytes overwritten at the site
    pub fn record(&self) -> &PatchRecord {
        &self.record
    }
}

/// Writes a `call rel32` or `jmp rel32` at `site` targeting `destination`.
///
/// Whatever the five bytes at `site` held is overwritten; the caller is responsible for choosing a site where that
/// is safe. On 64-bit hosts a far destination is reached through a relay stub allocated near the site.
///
/// # Safety
///
/// `site` must point to five bytes of code that may be replaced, and `destination` must be a function with the
/// calling convention the site's callers expect.
pub unsafe fn inject(
    writer: &MemoryWriter,
    stubs: &StubPool,
    site: Address,
    destination: Address,
    kind: BranchKind,
) -> Result<Injection> {
    let (target, relay) = super::reachable(stubs, site, destination)?;
    let code = branch_rel32(kind, site, target)?;
    let record = writer.write(site, &code)?;

    debug!(%site, %destination, ?kind, "injected branch");
    Ok(Injection {
        kind,
        site,
        destination,
        relay,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_writes_branch() {
        let mut code = [0xCCu8; 16];
        let site = Address::from(code.as_mut_ptr()).add(3);
        let destination = site.add(0x100);

        let injection = unsafe {
            inject(
                &MemoryWriter::new(),
                &StubPool::default(),
                site,
                destination,
                BranchKind::Call,
            )
        }
        .unwrap();

        assert_eq!(&code[3..8], &[0xE8, 0xFB, 0x00, 0x00, 0x00]);
        assert_eq!(injection.record().original(), &[0xCC; 5]);
        assert_eq!(injection.destination(), destination);
        assert!(injection.relay().is_none());
        // neighbours untouched
        assert_eq!(code[2], 0xCC);
        assert_eq!(code[8], 0xCC);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_inject_redirects_execution() {
        use crate::hook::testing;

        #[inline(never)]
        extern "C" fn seven() -> u32 {
            7
        }
        #[inline(never)]
        extern "C" fn eight() -> u32 {
            8
        }

        let pool = StubPool::default();
        let host = testing::call_host(&pool, Address::new(seven as usize));
        assert_eq!(testing::run(host.address()), 7);

        unsafe {
            inject(
                &MemoryWriter::new(),
                &pool,
                host.address().add(testing::CALL_SITE),
                Address::new(eight as usize),
                BranchKind::Call,
            )
        }
        .unwrap();
        assert_eq!(testing::run(host.address()), 8);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_far_destination_uses_relay() {
        let pool = StubPool::default();
        let host = pool.allocate(Address::new(test_far_destination_uses_relay as usize), &[0x90; 8]).unwrap();
        let far = Address::new(host.address().get() ^ 0x4000_0000_0000);

        let injection =
            unsafe { inject(&MemoryWriter::new(), &pool, host.address(), far, BranchKind::Jump) }.unwrap();

        let relay = injection.relay().expect("relay");
        assert_eq!(&relay[..], &crate::code::x64::jmp_abs(far.get() as u64));
        assert_eq!(host[0], 0xE9);
        let branch = crate::code::decode::decode_branch_bytes(host.address(), &host[..5]).unwrap();
        assert_eq!(branch.target, relay.address());
    }
}
