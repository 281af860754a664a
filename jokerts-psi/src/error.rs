//! Error types for section decoding.

use thiserror::Error;

/// Errors raised while decoding packets, sections and tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PsiError {
    /// Input is shorter than the structure being decoded.
    #[error("{what} too short: need {need} bytes, got {got}")]
    TooShort {
        what: &'static str,
        need: usize,
        got: usize,
    },

    /// Packet does not start with the sync byte.
    #[error("Invalid sync byte: 0x{0:02X}")]
    InvalidSync(u8),

    /// Section carries a different table than expected.
    #[error("Unexpected table id 0x{actual:02X} (expected {expected})")]
    UnexpectedTable { expected: &'static str, actual: u8 },

    /// A length field points past the end of its container.
    #[error("Invalid {0} length")]
    InvalidLength(&'static str),

    /// Section CRC does not match its content.
    #[error("CRC mismatch: calculated 0x{calculated:08X}, carried 0x{carried:08X}")]
    CrcMismatch { calculated: u32, carried: u32 },
}

impl PsiError {
    pub(crate) fn too_short(what: &'static str, need: usize, got: usize) -> Self {
        PsiError::TooShort { what, need, got }
    }
}
