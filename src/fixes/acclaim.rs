//! Fixes for the Acclaim demos (May and June/July builds)

use crate::address::Address;
use crate::code::BranchKind;
use crate::context::PatchContext;
use crate::error::Result;
use crate::txn::Transaction;
use crate::wrapper::FpuWrapper;

use super::{driver_name, leak_c_string, write_string_pointer, Fix, ACCLAIM, DRIVER_NAME_LEN};

/// `mov eax, [esi+8]; cmp edi, eax`, the instructions in front of the vertex buffer lock routine
const LOCK_VB_DISPLACED: [u8; 5] = [0x8B, 0x46, 0x08, 0x3B, 0xF8];

/// Files the May demo's MR2 needs
const MR2_FILES: [&str; 3] = ["cars/mr2.dat", "cars/mr2_ui.dat", "scripts/Demo2Unlock.txt"];

/// Movies behind the June/July arcade menu's video entry
const VIDEO_FILES: [&str; 3] = ["movies/video1.bik", "movies/video2.bik", "movies/video3.bik"];

/// `ret`
const RET: u8 = 0xC3;

/// Acclaim fixes, in order
pub fn fixes() -> Vec<Fix> {
    let mut fixes = vec![Fix::always("Acclaim FPU corruption", fpu_corruption)];
    #[cfg(windows)]
    fixes.push(Fix::always("Acclaim Alt+F4", alt_f4));
    fixes.extend([
        Fix::when("Acclaim MR2 unlock", mr2_present, mr2_unlock),
        Fix::when("Unlock demo courses", unlock_demo, unlock_courses),
        Fix::when("Unlock race modes", unlock_demo, |txn| {
            for address in txn.count_hint("8B CD 8B 0C 81 3B CB 74 02 89 19", 2, 9)? {
                unsafe { txn.nop(address, 2)? };
            }
            Ok(())
        }),
        Fix::when("Unlock lap limit", unlock_demo, |txn| {
            let laps = txn.get_one("46 83 FE ? 89 74 24 08 0F 8C", 3)?;
            unsafe { txn.write_value(laps, 7i8)? };
            Ok(())
        }),
        Fix::when("Unlock night opponents", unlock_demo, |txn| {
            let max_opponents = txn.get_one("BB 04 00 00 00 8B 51 70 8B 42 54", 0)?;
            unsafe { txn.nop(max_opponents, 5)? };
            Ok(())
        }),
        Fix::when("Unlock arcade menu entries", unlock_demo, arcade_menu_entries),
        Fix::when("Unlock all menus", unlock_menus, |txn| {
            let hide = txn.get_one("E8 ? ? ? ? BB ? ? ? ? E8 ? ? ? ? 8B 15 ? ? ? ?", 0)?;
            unsafe {
                txn.nop(hide, 5)?;
                txn.nop(hide.add(10), 5)?;
            }
            Ok(())
        }),
        Fix::when("Acclaim driver name", has_driver_name, custom_driver_name),
    ]);
    fixes
}

/// The vertex buffer lock calls into Direct3D without preserving the x87 stack its callers rely on. The bytes in
/// front of it become a jump into a wrapper that replays them, then calls the routine with the FPU state saved.
fn fpu_corruption(txn: &mut Transaction<'_>) -> Result<()> {
    let lock_vb = txn.get_one("53 8D 5E 1C C7 03 ? ? ? ? 76 04 33 C0 5B C3", 0)?;
    let site = lock_vb.offset(-(LOCK_VB_DISPLACED.len() as isize));

    let wrapper = FpuWrapper::new(txn.context().stubs().clone(), &LOCK_VB_DISPLACED);
    unsafe {
        let stub = txn.wrap(&wrapper, site, lock_vb)?;
        txn.inject(site, stub, BranchKind::Jump)
    }
}

/// Alt+F4 in the May demo posts a quit message the game never handles; exit instead
#[cfg(windows)]
fn alt_f4(txn: &mut Transaction<'_>) -> Result<()> {
    let post_quit = txn.get_one("75 11 6A 00 FF 15 ? ? ? ? 5F", 4)?;
    let exit_process = crate::host::proc_address(c"kernel32.dll", c"ExitProcess").ok_or_else(|| {
        crate::error::PatchError::NotFound {
            signature: "kernel32.dll!ExitProcess".into(),
        }
    })?;
    unsafe { txn.inject(post_quit, exit_process, BranchKind::Jump) }
}

fn mr2_present(ctx: &PatchContext) -> bool {
    ctx.game_files_exist(&MR2_FILES)
}

/// Points the demo unlock script at the one that lists the MR2
fn mr2_unlock(txn: &mut Transaction<'_>) -> Result<()> {
    let script = txn.get_one("8B 49 2C 8B 11 8D 44 24 10 50 55 68 ? ? ? ? FF 12", 12)?;
    unsafe { write_string_pointer(txn, script, c"Demo2Unlock.txt") }
}

fn unlock_demo(ctx: &PatchContext) -> bool {
    ctx.enabled(ACCLAIM, "UnlockDemoContent")
}

fn unlock_menus(ctx: &PatchContext) -> bool {
    unlock_demo(ctx) && ctx.enabled(ACCLAIM, "UnlockAllMenus")
}

/// Unlocks every course and route; the forced route is only lifted once the routes themselves are unlocked
fn unlock_courses(txn: &mut Transaction<'_>) -> Result<()> {
    // June/July, then May
    let june = txn.get_one("83 7F 18 01 6A 01 68 ? ? ? ? 0F 84", 11);
    match june {
        Ok(lock) => unsafe {
            txn.write(lock, &[0x90, 0xE9])?;
        },
        Err(_) => {
            let lock = txn.get_one("74 0F 8B 94 24 ? ? ? ? 52", 0)?;
            unsafe { txn.write_value(lock, 0xEBu8)? };
        }
    }

    for route in txn.count_hint("8B 0C 81 3B CD 74 02 89 29", 4, 7)? {
        unsafe { txn.nop(route, 2)? };
    }

    txn.apply("forced route", |txn| {
        let begin = txn.get_one("72 B4 8B 47 10 8B 90 1C 01 00 00 2B 90 18 01 00 00", 2)?;
        let end = txn.get_one(
            "E8 ? ? ? ? 39 2D ? ? ? ? 0F 84 ? ? ? ? 8B 4F 10 8B 91 1C 01 00 00",
            5,
        )?;
        unsafe { txn.jmp_rel8(begin, end)? };
        Ok(())
    });
    Ok(())
}

/// The arcade menu asks, entry by entry, whether an entry is selectable with a chain of `cmp eax, id; je`. The
/// first comparison is removed and the next 5 bytes become a call to a predicate that answers for every entry the
/// demo has content for. The game's own `je` right after the call then consumes the predicate's ZF.
fn arcade_menu_entries(txn: &mut Transaction<'_>) -> Result<()> {
    let all = unlock_menus(txn.context());

    // June/July, then May
    let (check, displaced, code) = match txn.get_one("83 F8 02 74 2E 83 F8 09 74 29 83 F8 FF 7E 24", 0) {
        Ok(check) => {
            let videos = txn.context().game_files_exist(&VIDEO_FILES);
            (check, 3, menu_predicate(all, &[0, 2, 9], videos.then_some(5)))
        }
        Err(_) => {
            let check = txn.get_one("85 C0 74 33 83 F8 09 74 2E 83 F8 05 74 29 83 F8 FF", 0)?;
            (check, 2, menu_predicate(all, &[0, 1], Some(9)))
        }
    };

    let site = check.add(displaced);
    let predicate = txn.stub(site, &code)?;
    unsafe {
        txn.nop(check, displaced)?;
        txn.inject(site, predicate, BranchKind::Call)
    }
}

/// Assembles a predicate over the menu entry id in `eax`, returning with ZF set when the entry is selectable.
///
/// `open` entries are always selectable, `last` is checked after them. Without `last` nothing else is.
fn menu_predicate(all: bool, open: &[i8], last: Option<i8>) -> Vec<u8> {
    if all {
        // cmp eax, eax
        return vec![0x39, 0xC0, RET];
    }

    let tail = if last.is_some() { 3 } else { 2 };
    let ret_at = open.len() * 5 + tail;
    let mut code = Vec::with_capacity(ret_at + 1);
    for &id in open {
        // cmp eax, id; je ret
        code.extend([0x83, 0xF8, id as u8]);
        let skip = ret_at - (code.len() + 2);
        code.extend([0x74, skip as u8]);
    }
    match last {
        Some(id) => code.extend([0x83, 0xF8, id as u8]),
        // test esp, esp clears ZF
        None => code.extend([0x85, 0xE4]),
    }
    code.push(RET);
    code
}

fn has_driver_name(ctx: &PatchContext) -> bool {
    driver_name(ctx, ACCLAIM).is_some()
}

fn custom_driver_name(txn: &mut Transaction<'_>) -> Result<()> {
    let Some(name) = driver_name(txn.context(), ACCLAIM) else {
        return Ok(());
    };
    let operand: Address = txn.get_one("B8 ? ? ? ? 8D 4C 24 18 E8 ? ? ? ? 8B 7D 68", 1)?;
    unsafe { write_string_pointer(txn, operand, leak_c_string(&name, DRIVER_NAME_LEN)) }
}
