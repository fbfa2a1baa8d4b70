//! # Transactions
//!
//! One fix is one transaction: a closure that scans, resolves and writes through a [`Transaction`]. The first
//! error ends the closure and marks the transaction failed; the next fix runs regardless.
//!
//! Writes are not rolled back. Whatever a failed transaction wrote before failing stays in place and stays in the
//! history, which is why fixes scan for everything they need before writing anything.

use std::fmt;

use crate::address::Address;
use crate::alloc::Stub;
use crate::code::{self, BranchKind};
use crate::context::PatchContext;
use crate::error::Result;
use crate::hook::{self, Injection, Interception};
use crate::pattern::Pattern;
use crate::patcher::PatchRecord;
use crate::wrapper::CallWrapper;

/// Lifecycle of a transaction; `Applied` and `Failed` are final
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// Still running
    Pending,
    /// Ran to completion
    Applied,
    /// Stopped at an error
    Failed,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
        })
    }
}

/// Result of one transaction, as kept in the attach report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Fix name, nested names joined with `/`
    pub name: String,
    /// Final state
    pub state: TxnState,
    /// Error that stopped the fix
    pub error: Option<String>,
    /// Number of writes made, including those of a failed fix
    pub writes: usize,
}

/// Everything a transaction leaves behind
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Byte writes, in order
    pub records: Vec<PatchRecord>,
    /// Injected branches
    pub injections: Vec<Injection>,
    /// Intercepted branches
    pub interceptions: Vec<Interception>,
    /// Wrapper stubs referenced by patched code
    pub stubs: Vec<Stub>,
}

/// A running fix
pub struct Transaction<'c> {
    /// Context the fix runs in
    context: &'c PatchContext,
    /// Full name
    name: String,
    /// What the fix has done so far
    effects: Effects,
}

impl<'c> Transaction<'c> {
    /// Starts a transaction
    pub(crate) fn new(context: &'c PatchContext, name: String) -> Self {
        Self {
            context,
            name,
            effects: Effects::default(),
        }
    }

    /// Hands over what the transaction did
    pub(crate) fn into_effects(self) -> Effects {
        self.effects
    }

    /// Full name of the fix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context the fix runs in
    pub fn context(&self) -> &'c PatchContext {
        self.context
    }

    /// Writes made so far
    pub fn records(&self) -> &[PatchRecord] {
        &self.effects.records
    }

    /// Compiles `signature` against the context's region
    pub fn pattern(&self, signature: &str) -> Result<Pattern> {
        Pattern::new(signature, self.context.region())
    }

    /// Address `offset` bytes from the first match of `signature`
    pub fn first(&self, signature: &str, offset: isize) -> Result<Address> {
        let address = self.pattern(signature)?.first()?.resolve(offset);
        self.resolved(signature, address);
        Ok(address)
    }

    /// Address `offset` bytes from the only match of `signature`
    pub fn get_one(&self, signature: &str, offset: isize) -> Result<Address> {
        let address = self.pattern(signature)?.get_one()?.resolve(offset);
        self.resolved(signature, address);
        Ok(address)
    }

    /// Addresses `offset` bytes from each of exactly `count` matches
    pub fn count(&self, signature: &str, count: usize, offset: isize) -> Result<Vec<Address>> {
        let pattern = self.pattern(signature)?;
        let addresses: Vec<_> = pattern
            .count(count)?
            .iter()
            .map(|m| m.resolve(offset))
            .collect();
        addresses.iter().for_each(|a| self.resolved(signature, *a));
        Ok(addresses)
    }

    /// Addresses `offset` bytes from each of at least `minimum` matches
    pub fn count_hint(&self, signature: &str, minimum: usize, offset: isize) -> Result<Vec<Address>> {
        let pattern = self.pattern(signature)?;
        let addresses: Vec<_> = pattern
            .count_hint(minimum)?
            .iter()
            .map(|m| m.resolve(offset))
            .collect();
        addresses.iter().for_each(|a| self.resolved(signature, *a));
        Ok(addresses)
    }

    /// Logs a resolved address
    fn resolved(&self, signature: &str, address: Address) {
        tracing::debug!(fix = %self.name, signature, %address, "resolved");
    }

    /// Keeps a write in the history
    fn record(&mut self, record: PatchRecord) -> &PatchRecord {
        self.effects.records.push(record);
        &self.effects.records[self.effects.records.len() - 1]
    }

    /// Writes raw bytes
    ///
    /// # Safety
    ///
    /// See [`MemoryWriter::write`](crate::patcher::MemoryWriter::write)
    pub unsafe fn write(&mut self, address: Address, bytes: &[u8]) -> Result<&PatchRecord> {
        let record = self.context.writer().write(address, bytes)?;
        Ok(self.record(record))
    }

    /// Writes a value in native byte order
    ///
    /// # Safety
    ///
    /// See [`MemoryWriter::write`](crate::patcher::MemoryWriter::write)
    pub unsafe fn write_value<T: Copy>(&mut self, address: Address, value: T) -> Result<&PatchRecord> {
        let record = self.context.writer().write_value(address, value)?;
        Ok(self.record(record))
    }

    /// Overwrites `count` bytes with `nop`
    ///
    /// # Safety
    ///
    /// See [`MemoryWriter::write`](crate::patcher::MemoryWriter::write)
    pub unsafe fn nop(&mut self, address: Address, count: usize) -> Result<&PatchRecord> {
        let record = self.context.writer().nop(address, count)?;
        Ok(self.record(record))
    }

    /// Writes a short `jmp` from `site` to `destination`
    ///
    /// # Safety
    ///
    /// See [`MemoryWriter::write`](crate::patcher::MemoryWriter::write)
    pub unsafe fn jmp_rel8(&mut self, site: Address, destination: Address) -> Result<&PatchRecord> {
        let code = code::jmp_rel8(site, destination)?;
        self.write(site, &code)
    }

    /// Writes a fresh call or jump to `destination` at `site`
    ///
    /// # Safety
    ///
    /// See [`hook::inject`]
    pub unsafe fn inject(&mut self, site: Address, destination: Address, kind: BranchKind) -> Result<()> {
        let injection = hook::inject(self.context.writer(), self.context.stubs(), site, destination, kind)?;
        self.effects.records.push(injection.record().clone());
        self.effects.injections.push(injection);
        Ok(())
    }

    /// Redirects the call or jump at `site` to `replacement`, returning the original destination
    ///
    /// # Safety
    ///
    /// See [`hook::intercept`]
    pub unsafe fn intercept(&mut self, site: Address, replacement: Address) -> Result<Address> {
        let interception = hook::intercept(self.context.writer(), self.context.stubs(), site, replacement)?;
        let original = interception.original();
        self.effects.records.push(interception.record().clone());
        self.effects.interceptions.push(interception);
        Ok(original)
    }

    /// Places `code` in executable memory reachable from `near`, returning its entry point.
    ///
    /// The stub lives as long as the context.
    pub fn stub(&mut self, near: Address, code: &[u8]) -> Result<Address> {
        let stub = self.context.stubs().allocate(near, code)?;
        let entry = stub.address();
        self.effects.stubs.push(stub);
        Ok(entry)
    }

    /// Builds a wrapper stub near `near` calling `target`, returning its entry point
    ///
    /// # Safety
    ///
    /// See [`CallWrapper::wrap`]
    pub unsafe fn wrap<W>(&mut self, wrapper: &W, near: Address, target: Address) -> Result<Address>
    where
        W: CallWrapper,
        W::Error: Into<crate::error::PatchError>,
    {
        let stub = wrapper.wrap(near, target).map_err(Into::into)?;
        let entry = stub.address();
        self.effects.stubs.push(stub);
        Ok(entry)
    }

    /// Runs an optional step as its own transaction; its failure does not fail this one
    pub fn apply<F>(&mut self, name: &str, f: F) -> TxnState
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        let name = format!("{}/{}", self.name, name);
        self.context.run(name, f)
    }
}
