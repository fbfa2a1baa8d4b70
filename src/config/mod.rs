//! # Config
//!
//! INI-backed key/value store. It replaces the registry for the host and holds the switches for optional fixes.
//!
//! Every read goes back to the file and every write updates it immediately, so edits made while the game runs are
//! picked up. A missing file reads as empty.

pub mod guid;
pub mod ini;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{trace, warn};

pub use guid::{format_braced, parse_braced, Guid, GUID_LEN};
pub use ini::Document;

/// Errors from the configuration store
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("failed to access {}", path.display())]
    Io {
        /// The INI file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// A value is not a GUID in registry form
    #[error("invalid GUID `{0}`")]
    InvalidGuid(String),
}

/// An INI file on disk
#[derive(Clone, Debug)]
pub struct ConfigStore {
    /// The INI file
    path: PathBuf,
}

impl ConfigStore {
    /// Creates a store for `path`; the file does not need to exist
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store for a module at `module`: same path, `.ini` extension
    pub fn beside(module: impl AsRef<Path>) -> Self {
        Self::new(module.as_ref().with_extension("ini"))
    }

    /// The INI file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the file
    pub fn load(&self) -> Result<Document, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Document::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Document::default()),
            Err(source) => Err(ConfigError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Raw value, trimmed, with one pair of surrounding double quotes removed
    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        let document = match self.load() {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "reading configuration failed");
                return None;
            }
        };
        let value = document.get(section, key)?;
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some(value.to_owned())
    }

    /// Signed integer value
    ///
    /// Parsed like the Win32 profile API: optional sign, then decimal digits or a `0x` hex number, stopping at the
    /// first character that does not fit. A value with no digits at all reads as 0.
    pub fn get_int(&self, section: &str, key: &str) -> Option<i32> {
        self.get_string(section, key).map(|value| parse_int(&value))
    }

    /// Unsigned integer value; negative values read as absent
    pub fn get_dword(&self, section: &str, key: &str) -> Option<u32> {
        self.get_int(section, key)
            .and_then(|value| u32::try_from(value).ok())
    }

    /// Switch value: nonzero integers are on, anything missing is `default`
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_dword(section, key)
            .map_or(default, |value| value != 0)
    }

    /// GUID value; malformed GUIDs read as absent
    pub fn get_guid(&self, section: &str, key: &str) -> Option<Guid> {
        let value = self.get_string(section, key)?;
        match parse_braced(&value) {
            Ok(guid) => Some(guid),
            Err(e) => {
                trace!(section, key, error = %e, "ignoring malformed value");
                None
            }
        }
    }

    /// Writes a raw value
    pub fn set_string(&self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut document = self.load()?;
        document.set(section, key, value);
        fs::write(&self.path, document.to_string()).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        trace!(section, key, value, "updated configuration");
        Ok(())
    }

    /// Writes an unsigned integer in decimal
    pub fn set_dword(&self, section: &str, key: &str, value: u32) -> Result<(), ConfigError> {
        self.set_string(section, key, &value.to_string())
    }

    /// Writes a GUID in registry form
    pub fn set_guid(&self, section: &str, key: &str, value: &Guid) -> Result<(), ConfigError> {
        self.set_string(section, key, &format_braced(value))
    }
}

/// Integer prefix of `text`, wrapping on overflow
fn parse_int(text: &str) -> i32 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => (16, hex),
        None => (10, digits),
    };

    let magnitude = digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0u32, |acc, digit| acc.wrapping_mul(radix).wrapping_add(digit));

    let value = magnitude as i32;
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}
