//! # Context
//!
//! Everything fixes share at attach time: the region they scan, the writer, the stub pool and the configuration.
//! It also keeps what every transaction did, because installed hooks and stubs must stay alive for as long as the
//! host runs: the attach code leaks the context once all fixes are applied.

use std::cell::{Ref, RefCell};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::alloc::StubPool;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::patcher::{MemoryWriter, PatchRecord};
use crate::pattern::Region;
use crate::txn::{Effects, Outcome, Transaction, TxnState};

/// Shared state of one attach
pub struct PatchContext {
    /// Memory fixes scan
    region: Region,
    /// Writer all patches go through
    writer: MemoryWriter,
    /// Executable memory for relays and wrappers
    stubs: StubPool,
    /// INI store, when its path could be resolved
    config: Option<ConfigStore>,
    /// Directory game data paths are relative to
    game_dir: PathBuf,
    /// What transactions did
    effects: RefCell<Effects>,
    /// One entry per finished transaction, in completion order
    outcomes: RefCell<Vec<Outcome>>,
}

impl PatchContext {
    /// Creates a context scanning `region`, with no configuration and the working directory as game directory
    pub fn new(region: Region) -> Self {
        Self {
            region,
            writer: MemoryWriter::new(),
            stubs: StubPool::default(),
            config: None,
            game_dir: PathBuf::from("."),
            effects: RefCell::default(),
            outcomes: RefCell::default(),
        }
    }

    /// Uses `config` for fix switches and values
    pub fn with_config(mut self, config: ConfigStore) -> Self {
        self.config = Some(config);
        self
    }

    /// Resolves game data paths against `dir`
    pub fn with_game_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.game_dir = dir.into();
        self
    }

    /// Memory fixes scan
    pub fn region(&self) -> Region {
        self.region
    }

    /// Writer all patches go through
    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    /// Stub pool
    pub fn stubs(&self) -> &StubPool {
        &self.stubs
    }

    /// INI store, if any
    pub fn config(&self) -> Option<&ConfigStore> {
        self.config.as_ref()
    }

    /// Switch `section`/`key` from the INI store, off without one
    pub fn enabled(&self, section: &str, key: &str) -> bool {
        self.config
            .as_ref()
            .is_some_and(|config| config.get_bool(section, key, false))
    }

    /// A game data file
    pub fn game_file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.game_dir.join(relative)
    }

    /// Whether every one of `relative` exists in the game directory
    pub fn game_files_exist(&self, relative: &[&str]) -> bool {
        relative.iter().all(|path| self.game_file(path).is_file())
    }

    /// Runs fix `name` as a transaction; errors are logged, never propagated
    pub fn apply<F>(&self, name: &str, f: F) -> TxnState
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        self.run(name.to_owned(), f)
    }

    /// Runs a transaction under its full name
    pub(crate) fn run<F>(&self, name: String, f: F) -> TxnState
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        let mut txn = Transaction::new(self, name);
        let result = f(&mut txn);
        let name = txn.name().to_owned();
        let effects = txn.into_effects();
        let writes = effects.records.len();

        let (state, error) = match result {
            Ok(()) => {
                info!(fix = %name, writes, "applied");
                (TxnState::Applied, None)
            }
            Err(e) => {
                warn!(fix = %name, writes, error = %e, "failed");
                (TxnState::Failed, Some(e.to_string()))
            }
        };

        {
            let mut kept = self.effects.borrow_mut();
            kept.records.extend(effects.records);
            kept.injections.extend(effects.injections);
            kept.interceptions.extend(effects.interceptions);
            kept.stubs.extend(effects.stubs);
        }
        self.outcomes.borrow_mut().push(Outcome {
            name,
            state,
            error,
            writes,
        });
        state
    }

    /// Every write made so far, in order
    pub fn history(&self) -> Ref<'_, [PatchRecord]> {
        Ref::map(self.effects.borrow(), |effects| effects.records.as_slice())
    }

    /// Finished transactions, in completion order
    pub fn outcomes(&self) -> Ref<'_, [Outcome]> {
        Ref::map(self.outcomes.borrow(), Vec::as_slice)
    }

    /// Outcome of fix `name`, if it ran
    pub fn outcome(&self, name: &str) -> Option<Outcome> {
        self.outcomes
            .borrow()
            .iter()
            .find(|outcome| outcome.name == name)
            .cloned()
    }

    /// Logs a one-line summary of the attach
    pub fn log_report(&self) {
        let outcomes = self.outcomes.borrow();
        let applied = outcomes
            .iter()
            .filter(|outcome| outcome.state == TxnState::Applied)
            .count();
        info!(
            applied,
            failed = outcomes.len() - applied,
            writes = self.effects.borrow().records.len(),
            "patching finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cars")).unwrap();
        std::fs::write(dir.path().join("cars/mr2.dat"), b"").unwrap();

        let data = [0u8; 4];
        let ctx = PatchContext::new(unsafe { Region::from_slice(&data) }).with_game_dir(dir.path());
        assert!(ctx.game_files_exist(&["cars/mr2.dat"]));
        assert!(!ctx.game_files_exist(&["cars/mr2.dat", "cars/mr2_ui.dat"]));
    }

    #[test]
    fn test_switches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.ini");
        std::fs::write(&path, "[THQ]\nEndlessDemo=1\n").unwrap();

        let data = [0u8; 4];
        let region = unsafe { Region::from_slice(&data) };
        assert!(!PatchContext::new(region).enabled("THQ", "EndlessDemo"));

        let ctx = PatchContext::new(region).with_config(ConfigStore::new(path));
        assert!(ctx.enabled("THQ", "EndlessDemo"));
        assert!(!ctx.enabled("Acclaim", "UnlockDemoContent"));
    }

    #[test]
    fn test_outcome_lookup() {
        let data = [0x90u8; 4];
        let ctx = PatchContext::new(unsafe { Region::from_slice(&data) });
        ctx.apply("ok", |_| Ok(()));
        ctx.apply("missing", |txn| txn.get_one("CC", 0).map(drop));

        assert_eq!(ctx.outcome("ok").unwrap().state, TxnState::Applied);
        assert_eq!(ctx.outcome("missing").unwrap().state, TxnState::Failed);
        assert!(ctx.outcome("never").is_none());
        ctx.log_report();
    }
}
