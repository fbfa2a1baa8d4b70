//! Import directory walking and IAT slot rewriting

use std::mem::size_of;

use tracing::{debug, trace};

use crate::address::Address;
use crate::error::Result;
use crate::patcher::MemoryWriter;

use super::{Image, DIRECTORY_IMPORT};

/// Size of an `IMAGE_IMPORT_DESCRIPTOR`
const DESCRIPTOR_LEN: usize = 20;
/// Offset of `Name` in a descriptor
const DESCRIPTOR_NAME: usize = 12;
/// Offset of `FirstThunk` in a descriptor
const DESCRIPTOR_FIRST_THUNK: usize = 16;
/// Thunk entries with this bit set import by ordinal
const ORDINAL_FLAG: usize = 1 << (usize::BITS - 1);

/// The import a redirection targets
#[derive(Clone, Copy, Debug)]
pub struct ImportRequest<'a> {
    /// Module name, compared case-insensitively
    pub module: &'a str,
    /// Function name, compared exactly
    pub function: &'a str,
    /// The function's current address, used to recognise its slot in modules bound without a name table
    pub resolved: Option<Address>,
}

impl<'a> ImportRequest<'a> {
    /// Requests `module!function` by name only
    pub fn new(module: &'a str, function: &'a str) -> Self {
        Self {
            module,
            function,
            resolved: None,
        }
    }

    /// Also recognises the slot by the function's current address
    pub fn with_resolved(mut self, resolved: Address) -> Self {
        self.resolved = Some(resolved);
        self
    }
}

/// One IAT slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportThunk {
    /// Importing module name as written in the image
    pub module: String,
    /// Imported function name, `None` for ordinal imports and modules without a name table
    pub function: Option<String>,
    /// Address of the IAT slot
    pub slot: Address,
}

impl Image {
    /// Every IAT slot of the image, in directory order
    pub fn imports(&self) -> Vec<ImportThunk> {
        let mut thunks = Vec::new();
        let Some(directory) = self.directory(DIRECTORY_IMPORT) else {
            return thunks;
        };

        let mut descriptor = self.rva(directory.rva);
        loop {
            let (lookup, name, first_thunk) = unsafe {
                (
                    descriptor.read::<u32>(),
                    descriptor.add(DESCRIPTOR_NAME).read::<u32>(),
                    descriptor.add(DESCRIPTOR_FIRST_THUNK).read::<u32>(),
                )
            };
            if name == 0 {
                break;
            }

            let module = String::from_utf8_lossy(unsafe { self.rva(name).read_c_str() }).into_owned();
            let slots = self.rva(first_thunk);
            for index in 0.. {
                let slot = slots.add(index * size_of::<usize>());
                let function = if lookup != 0 {
                    let entry = unsafe {
                        self.rva(lookup)
                            .add(index * size_of::<usize>())
                            .read::<usize>()
                    };
                    if entry == 0 {
                        break;
                    }
                    self.import_name(entry)
                } else {
                    if unsafe { slot.read::<usize>() } == 0 {
                        break;
                    }
                    None
                };

                thunks.push(ImportThunk {
                    module: module.clone(),
                    function,
                    slot,
                });
            }

            descriptor = descriptor.add(DESCRIPTOR_LEN);
        }

        thunks
    }

    /// Name of an import name table entry, `None` for ordinals
    fn import_name(&self, entry: usize) -> Option<String> {
        if entry & ORDINAL_FLAG != 0 {
            return None;
        }
        // IMAGE_IMPORT_BY_NAME: a u16 hint, then the name
        let name = unsafe { self.rva(entry as u32).add(2).read_c_str() };
        Some(String::from_utf8_lossy(name).into_owned())
    }
}

/// Points every IAT slot of `request` at `replacement`, returning what the first of them held before.
///
/// A module can be imported by more than one descriptor, so each matching slot is rewritten. Slots are recognised
/// by name through the import name table; for modules without one, by comparing each slot with
/// `request.resolved`. An import the image does not have is not an error: `Ok(None)` is returned and nothing is
/// written.
///
/// # Safety
///
/// `replacement` must have the exact signature and calling convention of the imported function.
pub unsafe fn redirect_import(
    writer: &MemoryWriter,
    image: &Image,
    request: &ImportRequest<'_>,
    replacement: Address,
) -> Result<Option<Address>> {
    let thunks = image.imports().into_iter().filter(|thunk| {
        if !thunk.module.eq_ignore_ascii_case(request.module) {
            return false;
        }
        match &thunk.function {
            Some(function) => function == request.function,
            None => request
                .resolved
                .is_some_and(|resolved| unsafe { thunk.slot.read::<usize>() } == resolved.get()),
        }
    });

    let mut first = None;
    for thunk in thunks {
        let record = writer.write_value(thunk.slot, replacement.get())?;
        let mut original = [0; size_of::<usize>()];
        original.copy_from_slice(record.original());
        let original = Address::new(usize::from_le_bytes(original));

        debug!(
            module = request.module,
            function = request.function,
            slot = %thunk.slot,
            %original,
            %replacement,
            "redirected import"
        );
        first.get_or_insert(original);
    }

    if first.is_none() {
        trace!(module = request.module, function = request.function, "import not present");
    }
    Ok(first)
}
