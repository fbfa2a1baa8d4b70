//! Fixes for the configuration tool shipped with the demos

use crate::address::Address;
use crate::code::BranchKind;
use crate::error::Result;
use crate::txn::Transaction;

use super::Fix;

/// `S_OK`
const S_OK: i32 = 0;

/// Configuration tool fixes, in order
pub fn fixes() -> Vec<Fix> {
    vec![
        Fix::always("Windowed resolutions (Acclaim)", |txn| {
            windowed_resolutions(txn, "56 0F 85 ? ? ? ? FF D7 50 FF D3", 1)
        }),
        Fix::always("Windowed resolutions (Acclaim debug)", |txn| {
            windowed_resolutions(txn, "83 F8 01 0F 85 ? ? ? ? 8B F4", 3)
        }),
        Fix::always("Windowed resolutions (THQ)", |txn| {
            windowed_resolutions(txn, "53 0F 85 ? ? ? ? FF D6 50 FF D7", 1)
        }),
        Fix::always("GetDirectXVersion stub", |txn| {
            directx_version(txn, "53 57 32 DB 33 FF 57 89 44 24 48", -8)
        }),
        Fix::always("GetDirectXVersion stub (debug)", |txn| {
            directx_version(
                txn,
                "53 56 57 8D BD ? ? ? ? B9 ? ? ? ? B8 ? ? ? ? F3 AB C6 45 EF 00",
                -9,
            )
        }),
    ]
}

/// Turns the `jne` skipping resolutions in windowed mode into `nop; jmp`, so every resolution is listed
fn windowed_resolutions(txn: &mut Transaction<'_>, signature: &str, offset: isize) -> Result<()> {
    let is_windowed = txn.get_one(signature, offset)?;
    unsafe { txn.write(is_windowed, &[0x90, 0xE9])? };
    Ok(())
}

/// Replaces the tool's DirectX version check with [`get_directx_version`]
fn directx_version(txn: &mut Transaction<'_>, signature: &str, offset: isize) -> Result<()> {
    let check = txn.get_one(signature, offset)?;
    unsafe {
        txn.inject(
            check,
            Address::new(get_directx_version as usize),
            BranchKind::Jump,
        )
    }
}

/// Always reports DirectX 9.0c: the tool only gets this far when DirectX 9 is installed
pub extern "C" fn get_directx_version(major: *mut i32, minor: *mut i32, letter: *mut u8) -> i32 {
    unsafe {
        if let Some(major) = major.as_mut() {
            *major = 9;
        }
        if let Some(minor) = minor.as_mut() {
            *minor = 0;
        }
        if let Some(letter) = letter.as_mut() {
            *letter = b'c';
        }
    }
    S_OK
}
