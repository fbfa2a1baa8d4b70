//! Compiled byte signatures

use std::fmt;
use std::str::FromStr;

use crate::error::{PatchError, Result};

/// A compiled wildcard byte signature.
///
/// Built from text such as `"56 0F 85 ? ? ? ? FF D7"`: two-digit hex tokens are exact bytes, `?` and `??` match any
/// byte. A signature always has at least one exact byte, which the scanner uses as its search anchor.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    /// Expected bytes; the value under a wildcard is unused
    bytes: Vec<u8>,
    /// `true` where the byte must match exactly
    mask: Vec<bool>,
    /// Index of the first exact byte
    anchor: usize,
}

impl Signature {
    /// Compiles signature text
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason| PatchError::InvalidSignature {
            text: text.to_owned(),
            reason,
        };

        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        for token in text.split_whitespace() {
            if token == "?" || token == "??" {
                bytes.push(0);
                mask.push(false);
                continue;
            }
            if token.len() != 2 {
                return Err(invalid("tokens must be two hex digits or a wildcard"));
            }
            // from_str_radix alone would take a sign
            if !token.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("token is not a hex byte"));
            }
            let byte =
                u8::from_str_radix(token, 16).map_err(|_| invalid("token is not a hex byte"))?;
            bytes.push(byte);
            mask.push(true);
        }

        if bytes.is_empty() {
            return Err(invalid("signature is empty"));
        }
        let anchor = mask
            .iter()
            .position(|&exact| exact)
            .ok_or_else(|| invalid("signature has no exact bytes"))?;

        Ok(Self {
            bytes,
            mask,
            anchor,
        })
    }

    /// Number of bytes the signature spans
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`; compiled signatures are never empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of the byte used to anchor the search, and its value
    pub(crate) fn anchor(&self) -> (usize, u8) {
        (self.anchor, self.bytes[self.anchor])
    }

    /// Tests whether `window` starts with this signature
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(&self.mask)
                .zip(window)
                .all(|((expected, exact), actual)| !exact || expected == actual)
    }
}

impl FromStr for Signature {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (byte, exact)) in self.bytes.iter().zip(&self.mask).enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            if *exact {
                write!(f, "{byte:02X}")?;
            } else {
                f.write_str("??")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}
