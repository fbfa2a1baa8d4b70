//! Installs the registry shim over the host's `advapi32.dll` imports

use std::ffi::{c_void, CStr};
use std::mem;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use lazy_static::lazy_static;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::Result;
use crate::host;
use crate::image::{redirect_import, Image, ImportRequest};
use crate::patcher::MemoryWriter;

use super::{is_sentinel, RegistryShim, ERROR_SUCCESS};

/// Module the host imports the registry API from
const ADVAPI32: &CStr = c"advapi32.dll";

/// `RegCreateKeyExA`
type CreateKeyFn = unsafe extern "system" fn(
    usize,
    *const u8,
    u32,
    *const u8,
    u32,
    u32,
    *const c_void,
    *mut usize,
    *mut u32,
) -> u32;
/// `RegCloseKey`
type CloseKeyFn = unsafe extern "system" fn(usize) -> u32;
/// `RegQueryValueExA`
type QueryValueFn = unsafe extern "system" fn(usize, *const u8, *mut u32, *mut u32, *mut u8, *mut u32) -> u32;
/// `RegSetValueExA`
type SetValueFn = unsafe extern "system" fn(usize, *const u8, u32, u32, *const u8, u32) -> u32;

/// Real registry functions, filled in as their imports are redirected
struct Originals {
    /// `RegCreateKeyExA`
    create: AtomicUsize,
    /// `RegCloseKey`
    close: AtomicUsize,
    /// `RegQueryValueExA`
    query: AtomicUsize,
    /// `RegSetValueExA`
    set: AtomicUsize,
}

impl Originals {
    /// Nothing redirected yet
    const fn new() -> Self {
        Self {
            create: AtomicUsize::new(0),
            close: AtomicUsize::new(0),
            query: AtomicUsize::new(0),
            set: AtomicUsize::new(0),
        }
    }
}

static ORIGINALS: Originals = Originals::new();

lazy_static! {
    static ref SHIM: RwLock<Option<RegistryShim>> = RwLock::new(None);
}

/// Loads a saved original as a function pointer
///
/// # Safety
///
/// `F` must be the function pointer type the slot was saved for
unsafe fn original<F: Copy>(slot: &AtomicUsize) -> F {
    let address = slot.load(Ordering::Acquire);
    mem::transmute_copy(&address)
}

/// Runs `f` with the installed shim
fn with_shim<T>(f: impl FnOnce(&RegistryShim) -> T) -> Option<T> {
    let shim = SHIM.read().unwrap_or_else(|e| e.into_inner());
    shim.as_ref().map(f)
}

/// Optional C string argument
unsafe fn c_str<'a>(ptr: *const u8) -> Option<&'a [u8]> {
    (!ptr.is_null()).then(|| CStr::from_ptr(ptr.cast()).to_bytes())
}

unsafe extern "system" fn create_key(
    key: usize,
    subkey: *const u8,
    reserved: u32,
    class: *const u8,
    options: u32,
    desired: u32,
    security: *const c_void,
    result: *mut usize,
    disposition: *mut u32,
) -> u32 {
    if let Some(subkey_name) = c_str(subkey) {
        if let Some(Some(handle)) = with_shim(|shim| shim.open(key, subkey_name)) {
            if !result.is_null() {
                *result = handle;
            }
            return ERROR_SUCCESS;
        }
    }
    original::<CreateKeyFn>(&ORIGINALS.create)(
        key, subkey, reserved, class, options, desired, security, result, disposition,
    )
}

unsafe extern "system" fn close_key(key: usize) -> u32 {
    if is_sentinel(key) {
        return ERROR_SUCCESS;
    }
    original::<CloseKeyFn>(&ORIGINALS.close)(key)
}

unsafe extern "system" fn query_value(
    key: usize,
    name: *const u8,
    reserved: *mut u32,
    kind: *mut u32,
    data: *mut u8,
    len: *mut u32,
) -> u32 {
    if !is_sentinel(key) {
        return original::<QueryValueFn>(&ORIGINALS.query)(key, name, reserved, kind, data, len);
    }

    let buffer = (!data.is_null() && !len.is_null()).then(|| slice::from_raw_parts_mut(data, *len as usize));
    let outcome = with_shim(|shim| shim.query(c_str(name), buffer));
    match outcome {
        Some(Ok(Some(written))) => {
            *len = written as u32;
            ERROR_SUCCESS
        }
        Some(Ok(None)) => ERROR_SUCCESS,
        Some(Err(e)) => e.status(),
        None => super::ERROR_FILE_NOT_FOUND,
    }
}

unsafe extern "system" fn set_value(
    key: usize,
    name: *const u8,
    reserved: u32,
    kind: u32,
    data: *const u8,
    len: u32,
) -> u32 {
    if !is_sentinel(key) {
        return original::<SetValueFn>(&ORIGINALS.set)(key, name, reserved, kind, data, len);
    }

    let payload: &[u8] = if data.is_null() {
        &[]
    } else {
        slice::from_raw_parts(data, len as usize)
    };
    with_shim(|shim| shim.set(c_str(name), payload));
    ERROR_SUCCESS
}

/// Points the host's registry imports at the shim.
///
/// Returns how many of the four imports the host actually had.
///
/// # Safety
///
/// `image` must be the loaded host image, and no other thread may be calling the registry functions while their
/// slots are rewritten.
pub unsafe fn install(writer: &MemoryWriter, image: &Image, shim: RegistryShim) -> Result<usize> {
    *SHIM.write().unwrap_or_else(|e| e.into_inner()) = Some(shim);

    let redirections: [(&CStr, &AtomicUsize, usize); 4] = [
        (c"RegCreateKeyExA", &ORIGINALS.create, create_key as CreateKeyFn as usize),
        (c"RegCloseKey", &ORIGINALS.close, close_key as CloseKeyFn as usize),
        (c"RegQueryValueExA", &ORIGINALS.query, query_value as QueryValueFn as usize),
        (c"RegSetValueExA", &ORIGINALS.set, set_value as SetValueFn as usize),
    ];

    let mut installed = 0;
    for (function, slot, replacement) in redirections {
        let name = function.to_str().unwrap_or_default();
        let mut request = ImportRequest::new("advapi32.dll", name);
        if let Some(resolved) = host::proc_address(ADVAPI32, function) {
            request = request.with_resolved(resolved);
        }

        if let Some(previous) = redirect_import(writer, image, &request, Address::new(replacement))? {
            slot.store(previous.get(), Ordering::Release);
            installed += 1;
        } else {
            debug!(function = name, "host does not import");
        }
    }

    info!(installed, "registry redirected to INI");
    Ok(installed)
}
