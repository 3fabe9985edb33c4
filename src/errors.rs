//! Error types for the wanchat room
//!
//! User-facing failures (bad arguments, wrong turn, no funds) are modelled as
//! `CommandError` and are only ever rendered back to the connection that caused
//! them. Infrastructure failures (storage, text generation, configuration) get
//! their own enums and are recovered locally by the room.

use crate::games::GameKind;
use thiserror::Error;

/// Root error type for all wanchat operations
#[derive(Debug, Error)]
pub enum WanchatError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Appraisal text generation errors
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// Transport and socket errors
    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Failures of the external text generator
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator request failed: {0}")]
    RequestFailed(String),
    #[error("Generator timed out after {0}s")]
    Timeout(u64),
    #[error("Generator returned an unusable response: {0}")]
    Malformed(String),
    #[error("Generator is disabled")]
    Disabled,
}

/// Validation and precondition failures reported to the acting user only.
///
/// Every variant is produced before the first mutation of the operation that
/// rejected it, so returning one never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}. Type /help for available commands.")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("Amount must be a positive number")]
    InvalidAmount,
    #[error("Insufficient funds. You have ${balance}")]
    InsufficientFunds { balance: u64 },
    #[error("Error: You must join first")]
    NotJoined,
    #[error("User \"{0}\" not found or not online")]
    UnknownUser(String),
    #[error("Item not found: {0}")]
    UnknownItem(String),
    #[error("You already own {0}!")]
    AlreadyOwned(String),
    #[error("{name} has already been purchased by {owner}!")]
    OwnedByOther { name: String, owner: String },
    #[error("Cannot start {wanted} - {active} is already in progress")]
    GameActive { wanted: GameKind, active: GameKind },
    #[error("{0}")]
    WrongPhase(&'static str),
    #[error("It's not your turn")]
    NotYourTurn,
    #[error("You have already placed a bet")]
    AlreadyResponded,
    #[error("Only the host can do that!")]
    NotHost,
}

/// Convenience type alias for Results
pub type WanchatResult<T> = Result<T, WanchatError>;

/// Result alias for room commands
pub type CommandResult<T = ()> = Result<T, CommandError>;

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::ReadFailed(e.to_string()),
            _ => StorageError::WriteFailed(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

impl From<std::io::Error> for WanchatError {
    fn from(e: std::io::Error) -> Self {
        WanchatError::Server(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = WanchatError::from(ConfigurationError::ValidationFailed("port".to_string()));
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("port"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_command_error_messages() {
        let err = CommandError::GameActive {
            wanted: GameKind::Race,
            active: GameKind::Blackjack,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start race - blackjack is already in progress"
        );
        assert_eq!(
            CommandError::InsufficientFunds { balance: 7 }.to_string(),
            "Insufficient funds. You have $7"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(StorageError::from(io), StorageError::ReadFailed(_)));
    }
}
