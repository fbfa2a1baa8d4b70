//! # Error
//!
//! Failure kinds of the patching engine. Every fix is isolated at its transaction boundary, so these
//! errors are logged and swallowed there rather than propagated to the host.

use thiserror::Error;

use crate::address::Address;
use crate::alloc::StubError;
use crate::patcher::mem::PermissionError;

/// Errors produced while scanning, resolving or writing a patch
#[derive(Debug, Error)]
pub enum PatchError {
    /// The signature text could not be compiled
    #[error("invalid signature `{text}`: {reason}")]
    InvalidSignature {
        /// Signature text as supplied by the patch author
        text: String,
        /// What was wrong with it
        reason: &'static str,
    },
    /// Zero matches where at least one was required
    #[error("signature `{signature}` not found")]
    NotFound {
        /// Canonical form of the signature
        signature: String,
    },
    /// More matches than the caller allows
    #[error("signature `{signature}` matched {found} times, expected {expected}")]
    AmbiguousMatch {
        /// Canonical form of the signature
        signature: String,
        /// Number of matches required
        expected: usize,
        /// Number of matches found
        found: usize,
    },
    /// Some matches, but fewer than the caller requires
    #[error("signature `{signature}` matched {found} times, expected at least {required}")]
    TooFewMatches {
        /// Canonical form of the signature
        signature: String,
        /// Minimum number of matches
        required: usize,
        /// Number of matches found
        found: usize,
    },
    /// Interception site does not hold a near call or jump
    #[error("unsupported instruction at {address}: {mnemonic}")]
    UnsupportedOpcode {
        /// Address of the offending instruction
        address: Address,
        /// Decoded mnemonic, or `invalid` if decoding failed
        mnemonic: String,
    },
    /// Page protection could not be changed around a write
    #[error("failed to change protection at {address} ({len} bytes)")]
    ProtectionChangeFailed {
        /// Start of the write
        address: Address,
        /// Length of the write
        len: usize,
        /// Underlying OS error
        #[source]
        source: region::Error,
    },
    /// A relative displacement cannot reach its destination
    #[error("{to} is out of range of a {width}-bit displacement from {from}")]
    OutOfRange {
        /// Address of the instruction
        from: Address,
        /// Destination it should reach
        to: Address,
        /// Displacement width in bits
        width: u8,
    },
    /// The image headers are not what the import walker expects
    #[error("malformed image at {base}: {reason}")]
    MalformedImage {
        /// Image base
        base: Address,
        /// What failed validation
        reason: &'static str,
    },
    /// No executable memory could be allocated for a stub
    #[error("failed to allocate stub memory: {0}")]
    StubAllocation(#[from] StubError),
}

impl PatchError {
    /// Converts a protection wrapper error into the engine's taxonomy
    pub(crate) fn from_permission<E>(
        address: Address,
        len: usize,
        error: PermissionError<E>,
    ) -> Self
    where
        E: Into<PatchError>,
    {
        match error {
            PermissionError::ProtectionError(source) => Self::ProtectionChangeFailed {
                address,
                len,
                source,
            },
            PermissionError::CustomError(e) => e.into(),
        }
    }

    /// Whether the failure is a scan miss, the normal case for signatures of another build
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::TooFewMatches { .. })
    }
}

impl From<std::convert::Infallible> for PatchError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

/// Result alias for the engine
pub type Result<T> = std::result::Result<T, PatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = PatchError::NotFound {
            signature: "90 90".into(),
        };
        assert!(err.is_not_found());

        let err = PatchError::AmbiguousMatch {
            signature: "90 90".into(),
            expected: 1,
            found: 2,
        };
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "signature `90 90` matched 2 times, expected 1"
        );
    }
}
