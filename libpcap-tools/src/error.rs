use std::io;
use thiserror::Error;

/// Structural problems of a capture file. These are the only fatal parse errors:
/// everything else is recovered and reported on the affected packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unrecognized capture format (magic 0x{0:08x})")]
    UnknownMagic(u32),
    #[error("capture header too short: need {needed} bytes, got {available}")]
    HeaderTooShort { needed: usize, available: usize },
    #[error("invalid pcapng section header block")]
    InvalidSectionHeader,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Generic(&'static str),
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Error::Generic(s)
    }
}

impl Error {
    /// Returns the format error, if this error is fatal to a capture parse
    pub fn as_format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}
