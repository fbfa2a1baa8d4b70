//! Queries about the process the patcher is loaded into

use std::ffi::{c_void, CStr, OsString};
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;

use windows::core::PCSTR;
use windows::Win32::Foundation::{HMODULE, MAX_PATH};
use windows::Win32::System::LibraryLoader::{GetModuleFileNameW, GetModuleHandleA, GetProcAddress};

/// Longest path the wide API returns
const MAX_WIDE_PATH: usize = 0x8000;

use crate::address::Address;

/// Address of `function` exported by the already loaded `module`
pub fn proc_address(module: &CStr, function: &CStr) -> Option<Address> {
    unsafe {
        let module = GetModuleHandleA(PCSTR::from_raw(module.as_ptr().cast())).ok()?;
        let function = GetProcAddress(module, PCSTR::from_raw(function.as_ptr().cast()))?;
        Some(Address::new(function as usize))
    }
}

/// Base address of the host executable
pub fn host_base() -> Option<Address> {
    let module = unsafe { GetModuleHandleA(PCSTR::null()) }.ok()?;
    Some(Address::new(module.0 as usize))
}

/// Full path of `module`, the patcher's own handle as passed to its entry point.
///
/// Read through the wide API so a game installed under a non-ANSI path still resolves.
pub fn module_path(module: *mut c_void) -> Option<PathBuf> {
    let mut buffer = vec![0u16; MAX_PATH as usize];
    loop {
        let len = unsafe { GetModuleFileNameW(HMODULE(module), &mut buffer) } as usize;
        if len == 0 {
            return None;
        }
        // a full buffer means the path was truncated
        if len < buffer.len() {
            buffer.truncate(len);
            return Some(PathBuf::from(OsString::from_wide(&buffer)));
        }
        if buffer.len() >= MAX_WIDE_PATH {
            return None;
        }
        buffer.resize(buffer.len() * 2, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_address() {
        assert!(proc_address(c"kernel32.dll", c"ExitProcess").is_some());
        assert!(proc_address(c"kernel32.dll", c"NotAnExport").is_none());
        assert!(proc_address(c"not-loaded.dll", c"ExitProcess").is_none());
    }

    #[test]
    fn test_host() {
        assert!(host_base().is_some());
        let exe = module_path(std::ptr::null_mut()).unwrap();
        assert!(exe.is_absolute());
        assert_eq!(exe, std::env::current_exe().unwrap());
    }

    #[test]
    fn test_module_path_of_dll() {
        let module = unsafe { GetModuleHandleA(PCSTR::from_raw(c"kernel32.dll".as_ptr().cast())) }.unwrap();
        let path = module_path(module.0).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_ascii_lowercase();
        assert_eq!(name, "kernel32.dll");
    }
}
