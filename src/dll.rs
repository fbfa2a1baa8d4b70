//! Entry point of the patcher DLL
//!
//! Everything happens once, on process attach: the fixes have to be in place before the game's own code runs.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;

use crate::config::ConfigStore;
use crate::context::PatchContext;
use crate::fixes;
use crate::host;
use crate::image::Image;
use crate::registry::{win32, RegistryShim};

/// Log file written next to the game in debug builds
#[cfg(debug_assertions)]
const LOG_FILE: &str = "patches.log";

/// Loader entry point
#[no_mangle]
pub extern "system" fn DllMain(module: *mut c_void, reason: u32, _reserved: *mut c_void) -> i32 {
    if reason == DLL_PROCESS_ATTACH {
        attach(module);
    }
    1
}

/// Installs a subscriber writing to [`LOG_FILE`] in `dir`
#[cfg(debug_assertions)]
fn init_logging(dir: &Path) {
    use std::fs::File;
    use std::sync::Mutex;

    let Ok(file) = File::create(dir.join(LOG_FILE)) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
}

/// Applies every fix to the host executable
fn attach(module: *mut c_void) {
    let game_dir = host::module_path(std::ptr::null_mut())
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    #[cfg(debug_assertions)]
    init_logging(&game_dir);

    let Some(base) = host::host_base() else {
        warn!("host module not found");
        return;
    };
    let image = match unsafe { Image::new(base) } {
        Ok(image) => image,
        Err(e) => {
            warn!(error = %e, "not patching");
            return;
        }
    };

    let mut ctx = PatchContext::new(image.code()).with_game_dir(&game_dir);
    if let Some(dll) = host::module_path(module) {
        let config = ConfigStore::beside(dll);
        info!(path = %config.path().display(), "using settings");
        ctx = ctx.with_config(config);
    }

    if let Some(config) = ctx.config().cloned() {
        ctx.apply("Registry redirection", |txn| {
            let installed = unsafe { win32::install(txn.context().writer(), &image, RegistryShim::new(config))? };
            info!(installed, "registry imports");
            Ok(())
        });
    }

    let applied = fixes::apply_all(&ctx);
    info!(applied, "fixes applied");
    ctx.log_report();

    // hooks and stubs stay referenced by the game's code
    Box::leak(Box::new(ctx));
}
