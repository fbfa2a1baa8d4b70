#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod address;
pub mod alloc;
pub mod code;
pub mod config;
pub mod context;
pub mod error;
pub mod fixes;
pub mod hook;
pub mod image;
pub mod patcher;
pub mod pattern;
pub mod registry;
pub mod txn;
pub mod wrapper;

#[cfg(windows)]
pub mod dll;
#[cfg(windows)]
pub mod host;

pub use address::Address;
pub use context::PatchContext;
pub use error::{PatchError, Result};
pub use txn::{Transaction, TxnState};
