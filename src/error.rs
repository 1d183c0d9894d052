//! Error types for LetheCache

use thiserror::Error;

/// Main error type for LetheCache
#[derive(Error, Debug)]
pub enum LetheError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Protocol parsing and framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid exptime")]
    InvalidExptime,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid cas unique")]
    InvalidCasUnique,

    #[error("Key too long (max 250 bytes)")]
    KeyTooLong,

    #[error("Empty argument")]
    EmptyArgument,

    #[error("Unexpected trailing argument")]
    UnexpectedArgument,

    #[error("header length exceeded")]
    HeaderTooLong,

    #[error("length achieved but terminator not met")]
    BadDataChunk,

    #[error("declared data length exceeds the item size limit")]
    DataTooLarge,
}

impl ProtocolError {
    /// Framing failures terminate the connection; everything else is
    /// answered with an error line and the connection stays open. An
    /// over-limit declared length is fatal because resynchronizing would
    /// require buffering the oversized block anyway.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HeaderTooLong | Self::BadDataChunk | Self::DataTooLarge
        )
    }

    /// Errors that get the bare `ERROR\r\n` reply instead of a
    /// `CLIENT_ERROR <reason>` line (unknown verb, wrong arity).
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::InvalidCommand(_) | Self::EmptyArgument)
    }
}

/// Crawler control errors, surfaced as `CLIENT_ERROR` to the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlerError {
    #[error("items per run must be greater than zero")]
    ItemsPerRunZero,

    #[error("sleep must be between 0 and 1000000 microseconds")]
    SleepOutOfRange,

    #[error("unknown lru_crawler subcommand: {0}")]
    UnknownSubcommand(String),
}

pub type Result<T> = std::result::Result<T, LetheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(ProtocolError::HeaderTooLong.is_fatal());
        assert!(ProtocolError::BadDataChunk.is_fatal());
        assert!(!ProtocolError::InvalidFlags.is_fatal());
        assert!(!ProtocolError::KeyTooLong.is_fatal());
    }

    #[test]
    fn test_generic_errors() {
        assert!(ProtocolError::InvalidCommand("nope".to_string()).is_generic());
        assert!(!ProtocolError::InvalidExptime.is_generic());
    }
}
