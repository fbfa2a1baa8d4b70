//! # Wrapper
//!
//! Runtime-assembled stubs that sit between a hooked site and a call target, doing extra work around the call

pub mod fpu;

use crate::address::Address;
use crate::alloc::Stub;

pub use fpu::FpuWrapper;

/// Call wrappers assemble a stub that eventually calls some other function
///
/// # Safety
///
/// The stub must leave the stack and every register the target's caller relies on as the target itself would
pub unsafe trait CallWrapper {
    /// Errors that could happen when wrapping calls
    type Error;

    /// Assembles a stub calling `target`
    ///
    /// - `near`: the site that will branch to the stub, which must be able to reach it with a rel32
    /// - `target`: the function the stub calls
    ///
    /// # Safety
    ///
    /// `target` must be code that may be called from the stub in the state the stub leaves the machine in
    unsafe fn wrap(&self, near: Address, target: Address) -> Result<Stub, Self::Error>;
}
