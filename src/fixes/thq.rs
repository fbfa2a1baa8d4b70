//! Fixes for the THQ builds (January and April/May 2005)

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::address::Address;
use crate::context::PatchContext;
use crate::error::Result;
use crate::txn::Transaction;

use super::{driver_name, leak_c_string, write_string_pointer, Fix, DRIVER_NAME_LEN, THQ};

/// Name of the core count fix
pub const CORE_COUNT: &str = "THQ core count";

/// Career file the custom starter car reads
const CREW_COLLECTION: &str = "scripts/CMSPlayersCrewCollection2.txt";

/// The game's allocator
type Allocator = unsafe extern "C" fn(usize) -> *mut c_void;

/// Allocators replaced by [`alloc_zeroed`], one per intercepted call site
static ORIGINAL_ALLOCATORS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];

/// THQ fixes, in order
pub fn fixes() -> Vec<Fix> {
    vec![
        Fix::always(CORE_COUNT, |txn| {
            // the core loop runs off a 4-entry table with more than 4 cores
            let max_cores = txn.get_one("03 C8 83 F9 20 7C EE 5F", 4)?;
            unsafe { txn.write_value(max_cores, 4u8)? };
            Ok(())
        }),
        Fix::always("THQ virtual memory", |txn| {
            let memory_status = txn.get_one("3B 4C 24 08 76 07 83 7C 24 ? 00 77 20", 0)?;
            unsafe {
                txn.nop(memory_status.add(4), 2)?;
                txn.write_value(memory_status.add(11), 0xEBu8)?;
            }
            Ok(())
        }),
        Fix::always("THQ zero-initialized allocations", zero_allocations),
        Fix::always("THQ languages", |txn| {
            // Polish, Russian and Czech are listed but not shipped
            let languages = txn.get_one("B8 05 00 00 00 C3 B8 06 00 00 00 C3 B8 07 00 00 00 C3", 0)?;
            for offset in [1, 7, 13] {
                unsafe { txn.write_value(languages.add(offset), 0i32)? };
            }
            Ok(())
        }),
        Fix::when("THQ starter car", career_present, starter_car),
        Fix::when(
            "THQ endless demo",
            |ctx| ctx.enabled(THQ, "EndlessDemo"),
            |txn| {
                let timeout = txn.get_one("80 7C D0 32 02 75 ? 8B 5E 70 89 3B", 5)?;
                unsafe { txn.nop(timeout, 2)? };
                Ok(())
            },
        ),
        Fix::when(
            "THQ driver name",
            |ctx| driver_name(ctx, THQ).is_some(),
            custom_driver_name,
        ),
    ]
}

/// Allocations of the string tables come back uninitialized, which the game only gets away with without page heap
fn zero_allocations(txn: &mut Transaction<'_>) -> Result<()> {
    let calls = txn.count("8D 14 9D ? ? ? ? 52 E8 ? ? ? ? 83 C4 04 8B E8", 2, 8)?;
    let replacements = [alloc_zeroed::<0> as Allocator, alloc_zeroed::<1> as Allocator];

    for ((call, replacement), slot) in calls.into_iter().zip(replacements).zip(&ORIGINAL_ALLOCATORS) {
        let original = unsafe { txn.intercept(call, Address::new(replacement as usize))? };
        slot.store(original.get(), Ordering::Release);
    }
    Ok(())
}

/// Calls the allocator saved in `SLOT` and zeroes what it returns
unsafe extern "C" fn alloc_zeroed<const SLOT: usize>(size: usize) -> *mut c_void {
    zeroed(ORIGINAL_ALLOCATORS[SLOT].load(Ordering::Acquire), size)
}

/// # Safety
///
/// `original` must be 0 or an [`Allocator`]
unsafe fn zeroed(original: usize, size: usize) -> *mut c_void {
    if original == 0 {
        return ptr::null_mut();
    }
    let allocate: Allocator = mem::transmute(original);
    let memory = allocate(size);
    if !memory.is_null() {
        ptr::write_bytes(memory.cast::<u8>(), 0, size);
    }
    memory
}

fn career_present(ctx: &PatchContext) -> bool {
    ctx.game_files_exist(&[CREW_COLLECTION])
}

/// Starts a career with the crew collection shipped for the custom starter car
fn starter_car(txn: &mut Transaction<'_>) -> Result<()> {
    // January, then April/May
    let collection = txn
        .get_one("68 ? ? ? ? E8 ? ? ? ? 8B 85 84 00 00 00 8B 08 8B 11", 1)
        .or_else(|_| txn.get_one("68 ? ? ? ? E8 ? ? ? ? 8B 9D 84 00 00 00 8B 33 33 C0", 1))?;
    unsafe { write_string_pointer(txn, collection, c"CMSPlayersCrewCollection2.txt") }
}

fn custom_driver_name(txn: &mut Transaction<'_>) -> Result<()> {
    let Some(name) = driver_name(txn.context(), THQ) else {
        return Ok(());
    };
    let name_switch = txn.get_one("FF 52 08 83 C0 FF 83 F8 ? 77 ? FF 24 85 ? ? ? ? B8", 5)?;
    let operand = txn.get_one("B8 ? ? ? ? 8D 4C 24 18 E8 ? ? ? ? 8B ? 64", 1)?;

    unsafe {
        // out of range of the switch, so the default name is never picked
        txn.write_value(name_switch, 127i8)?;
        write_string_pointer(txn, operand, leak_c_string(&name, DRIVER_NAME_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::fixes::testing::FakeCode;
    use crate::txn::TxnState;

    fn run(ctx: &PatchContext, name: &str) -> TxnState {
        let fix = fixes().into_iter().find(|fix| fix.name == name).unwrap();
        assert!((fix.enabled)(ctx), "{name} disabled");
        ctx.apply(fix.name, fix.apply)
    }

    #[test]
    fn test_virtual_memory() {
        let code = FakeCode::new(0x20).place(0x04, "3B 4C 24 08 76 07 83 7C 24 ? 00 77 20", 0x30);
        let ctx = code.context();

        assert_eq!(run(&ctx, "THQ virtual memory"), TxnState::Applied);
        assert_eq!(
            &code.bytes()[0x04..0x11],
            &[0x3B, 0x4C, 0x24, 0x08, 0x90, 0x90, 0x83, 0x7C, 0x24, 0x30, 0x00, 0xEB, 0x20]
        );
    }

    #[test]
    fn test_languages() {
        let code = FakeCode::new(0x20).place(0x02, "B8 05 00 00 00 C3 B8 06 00 00 00 C3 B8 07 00 00 00 C3", 0);
        let ctx = code.context();

        assert_eq!(run(&ctx, "THQ languages"), TxnState::Applied);
        assert_eq!(&code.bytes()[0x02..0x08], &[0xB8, 0, 0, 0, 0, 0xC3]);
        assert_eq!(&code.bytes()[0x0E..0x14], &[0xB8, 0, 0, 0, 0, 0xC3]);
        assert_eq!(ctx.history().len(), 3);
    }

    #[test]
    fn test_zero_allocations_needs_both_sites() {
        let code = FakeCode::new(0x40).place(0x08, "8D 14 9D ? ? ? ? 52 E8 ? ? ? ? 83 C4 04 8B E8", 0);
        let ctx = code.context();

        assert_eq!(run(&ctx, "THQ zero-initialized allocations"), TxnState::Failed);
        assert!(ctx.history().is_empty());
    }

    unsafe extern "C" fn dirty_alloc(size: usize) -> *mut c_void {
        Box::leak(vec![0xAAu8; size].into_boxed_slice()).as_mut_ptr().cast()
    }

    unsafe extern "C" fn failing_alloc(_: usize) -> *mut c_void {
        ptr::null_mut()
    }

    #[test]
    fn test_zeroed() {
        unsafe {
            let memory = zeroed(dirty_alloc as Allocator as usize, 16);
            assert_eq!(std::slice::from_raw_parts(memory.cast::<u8>(), 16), &[0; 16]);

            assert!(zeroed(failing_alloc as Allocator as usize, 16).is_null());
            assert!(zeroed(0, 16).is_null());
        }
    }

    #[test]
    fn test_starter_car_second_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join(CREW_COLLECTION), b"").unwrap();

        let code = FakeCode::new(0x40).place(0x10, "68 ? ? ? ? E8 ? ? ? ? 8B 9D 84 00 00 00 8B 33 33 C0", 0);
        let ctx = code.context().with_game_dir(dir.path());

        assert_eq!(run(&ctx, "THQ starter car"), TxnState::Applied);
        let pointer = unsafe { code.start().add(0x11).read::<usize>() };
        let text = unsafe { std::ffi::CStr::from_ptr(pointer as *const _) };
        assert_eq!(text.to_bytes(), b"CMSPlayersCrewCollection2.txt");
    }

    #[test]
    fn test_driver_name_scans_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("juiced-patch.ini");
        std::fs::write(&path, "[THQ]\nDriverName=Ryo\n").unwrap();

        // the name operand is missing, so the switch must stay untouched
        let code = FakeCode::new(0x40).place(0x08, "FF 52 08 83 C0 FF 83 F8 ? 77 ? FF 24 85 ? ? ? ? B8", 0x06);
        let ctx = code.context().with_config(ConfigStore::new(path));

        assert_eq!(run(&ctx, "THQ driver name"), TxnState::Failed);
        assert_eq!(code.bytes()[0x0D], 0xFF);
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn test_endless_demo_switch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("juiced-patch.ini");
        std::fs::write(&path, "[THQ]\nEndlessDemo=0x1\n").unwrap();

        let code = FakeCode::new(0x20).place(0x00, "80 7C D0 32 02 75 ? 8B 5E 70 89 3B", 0x0A);
        let ctx = code.context().with_config(ConfigStore::new(path));

        assert_eq!(run(&ctx, "THQ endless demo"), TxnState::Applied);
        assert_eq!(&code.bytes()[0x05..0x07], &[0x90, 0x90]);
    }
}
