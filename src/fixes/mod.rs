//! # Fixes
//!
//! The ordered catalog of fixes applied at attach. Each runs as its own transaction, so a signature belonging to
//! another build of the game only fails that one fix.
//!
//! Signatures come from three hosts: the configuration tool, the Acclaim demos (May, June/July builds) and the THQ
//! builds (January, April/May 2005). Most fixes therefore fail on any given host, which is expected.

pub mod acclaim;
pub mod config_tool;
pub mod thq;

use std::ffi::CStr;

use tracing::debug;

use crate::address::Address;
use crate::context::PatchContext;
use crate::error::Result;
use crate::txn::{Transaction, TxnState};

/// INI section for the Acclaim builds
pub const ACCLAIM: &str = "Acclaim";
/// INI section for the THQ builds
pub const THQ: &str = "THQ";
/// Longest driver name the game's buffers take, without the terminator
pub const DRIVER_NAME_LEN: usize = 19;

/// A named fix
pub struct Fix {
    /// Name used in logs and the attach report
    pub name: &'static str,
    /// Whether the fix should run at all on this attach
    pub enabled: fn(&PatchContext) -> bool,
    /// The transaction body
    pub apply: fn(&mut Transaction<'_>) -> Result<()>,
}

impl Fix {
    /// A fix that always runs
    pub const fn always(name: &'static str, apply: fn(&mut Transaction<'_>) -> Result<()>) -> Self {
        Self {
            name,
            enabled: always_enabled,
            apply,
        }
    }

    /// A fix that runs when `enabled` says so
    pub const fn when(
        name: &'static str,
        enabled: fn(&PatchContext) -> bool,
        apply: fn(&mut Transaction<'_>) -> Result<()>,
    ) -> Self {
        Self {
            name,
            enabled,
            apply,
        }
    }
}

/// Enabled on every attach
fn always_enabled(_: &PatchContext) -> bool {
    true
}

/// Every fix, in application order
pub fn catalog() -> Vec<Fix> {
    let mut fixes = config_tool::fixes();
    fixes.extend(acclaim::fixes());
    fixes.extend(thq::fixes());
    fixes
}

/// Applies every enabled fix in catalog order, returning how many applied
pub fn apply_all(ctx: &PatchContext) -> usize {
    catalog()
        .into_iter()
        .filter(|fix| {
            let enabled = (fix.enabled)(ctx);
            if !enabled {
                debug!(fix = fix.name, "disabled");
            }
            enabled
        })
        .map(|fix| ctx.apply(fix.name, fix.apply))
        .filter(|state| *state == TxnState::Applied)
        .count()
}

/// A NUL-terminated copy of `text`, cut at its first NUL and at `max` bytes, that lives until the process exits
pub fn leak_c_string(text: &str, max: usize) -> &'static CStr {
    let bytes = text.as_bytes();
    let len = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(bytes.len())
        .min(max);

    let mut owned = Vec::with_capacity(len + 1);
    owned.extend_from_slice(&bytes[..len]);
    owned.push(0);
    let leaked: &'static [u8] = Box::leak(owned.into_boxed_slice());
    // no interior NUL and exactly one terminator
    CStr::from_bytes_with_nul(leaked).unwrap_or_default()
}

/// Points the operand at `address` to a string with static lifetime
///
/// # Safety
///
/// `address` must be a pointer-sized operand the host reads a C string pointer from
pub(crate) unsafe fn write_string_pointer(txn: &mut Transaction<'_>, address: Address, text: &'static CStr) -> Result<()> {
    txn.write_value(address, text.as_ptr() as usize)?;
    Ok(())
}

/// The driver name from `section`, if one is configured
pub(crate) fn driver_name(ctx: &PatchContext, section: &str) -> Option<String> {
    ctx.config()?.get_string(section, "DriverName")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake host memory for fix tests

    use std::ptr::NonNull;

    use crate::address::Address;
    use crate::context::PatchContext;
    use crate::pattern::{Region, Signature};

    /// A zeroed buffer with signatures dropped in at chosen offsets.
    ///
    /// Owned through a raw pointer: fixes write into it through the context while the test reads it.
    pub struct FakeCode {
        /// The bytes
        data: NonNull<[u8]>,
    }

    impl FakeCode {
        /// `len` zero bytes
        pub fn new(len: usize) -> Self {
            Self {
                data: NonNull::from(Box::leak(vec![0; len].into_boxed_slice())),
            }
        }

        /// Writes `signature` at `offset`, wildcards as `fill`
        pub fn place(mut self, offset: usize, signature: &str, fill: u8) -> Self {
            let signature = Signature::parse(signature).unwrap();
            let data = unsafe { self.data.as_mut() };
            for (index, token) in signature.to_string().split(' ').enumerate() {
                data[offset + index] = match token {
                    "??" => fill,
                    hex => u8::from_str_radix(hex, 16).unwrap(),
                };
            }
            self
        }

        /// Current contents
        pub fn bytes(&self) -> &[u8] {
            unsafe { self.data.as_ref() }
        }

        /// Address of the first byte
        pub fn start(&self) -> Address {
            Address::from_ptr(self.data.as_ptr().cast::<u8>())
        }

        /// A context scanning the buffer
        pub fn context(&self) -> PatchContext {
            PatchContext::new(unsafe { Region::new(self.start(), self.data.len()) })
        }
    }

    impl Drop for FakeCode {
        fn drop(&mut self) {
            drop(unsafe { Box::from_raw(self.data.as_ptr()) });
        }
    }
}
