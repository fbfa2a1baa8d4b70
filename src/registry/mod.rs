//! # Registry
//!
//! Redirects the host's registry settings to the INI store. The host opens its key under `HKEY_CURRENT_USER` and
//! gets back a sentinel handle instead; queries and updates on the sentinel are served from the `Registry` section
//! of the store, and any other handle goes to the real registry.
//!
//! The logic here is platform neutral. The Windows-only glue that installs it over the host's `advapi32.dll`
//! imports lives in `win32`.

#[cfg(windows)]
pub mod win32;

use std::sync::atomic::AtomicU8;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{trace, warn};

use crate::config::{ConfigStore, Guid, GUID_LEN};

/// `HKEY_CURRENT_USER`, sign-extended like the real predefined handle
pub const HKEY_CURRENT_USER: usize = 0x8000_0001u32 as i32 as isize as usize;
/// `ERROR_SUCCESS`
pub const ERROR_SUCCESS: u32 = 0;
/// `ERROR_FILE_NOT_FOUND`
pub const ERROR_FILE_NOT_FOUND: u32 = 2;

/// INI section holding redirected values
pub const SECTION: &str = "Registry";
/// The one value stored as a GUID
pub const ADAPTER: &str = "Adapter";
/// Subkeys containing this are redirected
const SUBKEY_FRAGMENT: &[u8] = b"\\Juiced";

/// Its address is the sentinel handle, which cannot collide with a real key handle
static SENTINEL: AtomicU8 = AtomicU8::new(0);

/// The pseudo key handle given out for the redirected subtree
pub fn sentinel() -> usize {
    &SENTINEL as *const AtomicU8 as usize
}

/// Whether `handle` is the sentinel
pub fn is_sentinel(handle: usize) -> bool {
    handle == sentinel()
}

/// Errors reported back to the host
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShimError {
    /// The value is not in the store
    #[error("registry value `{0}` not found")]
    NotFound(String),
}

impl ShimError {
    /// Win32 status code for the host
    pub fn status(&self) -> u32 {
        match self {
            Self::NotFound(_) => ERROR_FILE_NOT_FOUND,
        }
    }
}

/// Serves registry operations on the sentinel handle from a [`ConfigStore`]
#[derive(Debug)]
pub struct RegistryShim {
    /// Store access is serialized, the host may query from several threads
    store: Mutex<ConfigStore>,
}

impl RegistryShim {
    /// Creates a shim over `store`
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Handle for opening `subkey` under `root`, or `None` when the key is not redirected
    pub fn open(&self, root: usize, subkey: &[u8]) -> Option<usize> {
        let redirected = root == HKEY_CURRENT_USER
            && subkey
                .windows(SUBKEY_FRAGMENT.len())
                .any(|window| window == SUBKEY_FRAGMENT);
        if redirected {
            trace!(subkey = %String::from_utf8_lossy(subkey), "opened redirected key");
        }
        redirected.then(sentinel)
    }

    /// Reads value `name` into `buffer`.
    ///
    /// A missing name succeeds without data, as does a missing buffer. Otherwise as many bytes as fit are copied
    /// and the count is returned.
    pub fn query(&self, name: Option<&[u8]>, buffer: Option<&mut [u8]>) -> Result<Option<usize>, ShimError> {
        let Some(name) = name else {
            return Ok(None);
        };
        let name = String::from_utf8_lossy(name);

        let value = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            if name.eq_ignore_ascii_case(ADAPTER) {
                store.get_guid(SECTION, &name).map(|guid| guid.to_bytes().to_vec())
            } else {
                store
                    .get_dword(SECTION, &name)
                    .map(|value| value.to_le_bytes().to_vec())
            }
        };
        let value = value.ok_or_else(|| ShimError::NotFound(name.clone().into_owned()))?;

        trace!(%name, len = value.len(), "queried redirected value");
        Ok(buffer.map(|buffer| {
            let len = buffer.len().min(value.len());
            buffer[..len].copy_from_slice(&value[..len]);
            len
        }))
    }

    /// Stores `data` as value `name`.
    ///
    /// Payloads too short for the value's type are ignored; the host is still told the write succeeded.
    pub fn set(&self, name: Option<&[u8]>, data: &[u8]) {
        let Some(name) = name else {
            return;
        };
        let name = String::from_utf8_lossy(name);
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        let result = if name.eq_ignore_ascii_case(ADAPTER) {
            let Some(bytes) = data.get(..GUID_LEN).and_then(|b| <[u8; GUID_LEN]>::try_from(b).ok()) else {
                return;
            };
            store.set_guid(SECTION, &name, &Guid::from_bytes(bytes))
        } else {
            let Some(bytes) = data.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()) else {
                return;
            };
            store.set_dword(SECTION, &name, u32::from_le_bytes(bytes))
        };

        if let Err(e) = result {
            warn!(%name, error = %e, "failed to persist registry value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_braced;

    fn shim(text: &str) -> (tempfile::TempDir, RegistryShim) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.ini");
        std::fs::write(&path, text).unwrap();
        (dir, RegistryShim::new(ConfigStore::new(path)))
    }

    const GUID: &str = "{D7B71EE2-4E1E-11CF-6D74-1A29A5C2CB35}";

    #[test]
    fn test_open() {
        let (_dir, shim) = shim("");
        let handle = shim.open(HKEY_CURRENT_USER, b"Software\\THQ\\Juiced").unwrap();
        assert!(is_sentinel(handle));
        assert_eq!(handle, sentinel());

        assert_eq!(shim.open(HKEY_CURRENT_USER, b"Software\\Other"), None);
        // HKEY_LOCAL_MACHINE
        assert_eq!(shim.open(0x8000_0002u32 as i32 as isize as usize, b"Software\\THQ\\Juiced"), None);
    }

    #[test]
    fn test_query_dword() {
        let (_dir, shim) = shim("[Registry]\nWidth=1280\n");

        let mut buffer = [0xAA; 8];
        let written = shim.query(Some(b"Width"), Some(&mut buffer)).unwrap();
        assert_eq!(written, Some(4));
        assert_eq!(buffer, [0x00, 0x05, 0x00, 0x00, 0xAA, 0xAA, 0xAA, 0xAA]);

        // short buffer gets what fits
        let mut short = [0; 2];
        assert_eq!(shim.query(Some(b"width"), Some(&mut short)).unwrap(), Some(2));
        assert_eq!(short, [0x00, 0x05]);

        // no buffer
        assert_eq!(shim.query(Some(b"Width"), None).unwrap(), None);
    }

    #[test]
    fn test_query_adapter() {
        let (_dir, shim) = shim(&format!("[Registry]\nAdapter={GUID}\n"));

        let mut buffer = [0; 16];
        assert_eq!(shim.query(Some(b"ADAPTER"), Some(&mut buffer)).unwrap(), Some(16));
        assert_eq!(buffer, parse_braced(GUID).unwrap().to_bytes());
    }

    #[test]
    fn test_query_missing() {
        let (_dir, shim) = shim("[Registry]\nBias=-1\n");

        let err = shim.query(Some(b"Height"), Some(&mut [0; 4])).unwrap_err();
        assert_eq!(err.status(), ERROR_FILE_NOT_FOUND);
        // negative values do not fit a dword
        assert!(shim.query(Some(b"Bias"), Some(&mut [0; 4])).is_err());
        assert!(shim.query(Some(b"Adapter"), Some(&mut [0; 16])).is_err());
        // null name
        assert_eq!(shim.query(None, Some(&mut [0; 4])).unwrap(), None);
    }

    #[test]
    fn test_set() {
        let (_dir, shim) = shim("");

        shim.set(Some(b"Height"), &1080u32.to_le_bytes());
        let guid = parse_braced(GUID).unwrap();
        shim.set(Some(b"Adapter"), &guid.to_bytes());
        // too short, ignored
        shim.set(Some(b"Depth"), &[32, 0]);
        shim.set(Some(b"adapter"), &[1; 8]);
        shim.set(None, &[1; 4]);

        let mut dword = [0; 4];
        shim.query(Some(b"Height"), Some(&mut dword)).unwrap();
        assert_eq!(u32::from_le_bytes(dword), 1080);

        let mut bytes = [0; 16];
        shim.query(Some(b"Adapter"), Some(&mut bytes)).unwrap();
        assert_eq!(Guid::from_bytes(bytes), guid);

        assert!(shim.query(Some(b"Depth"), Some(&mut dword)).is_err());
    }
}
