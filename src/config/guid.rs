//! GUIDs in registry form, `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
//!
//! The binary form handed to the host is the Windows in-memory layout, which is what [`Guid::to_bytes`] produces.

pub use uguid::Guid;

use super::ConfigError;

/// Size of the binary form
pub const GUID_LEN: usize = 16;

/// Parses the braced registry form
pub fn parse_braced(text: &str) -> Result<Guid, ConfigError> {
    let invalid = || ConfigError::InvalidGuid(text.to_owned());
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(invalid)?;
    Guid::try_parse(inner).map_err(|_| invalid())
}

/// Braced registry form, uppercase
pub fn format_braced(guid: &Guid) -> String {
    format!("{{{}}}", guid.to_string().to_ascii_uppercase())
}
