//! Error types for the eISCP client.

use std::io;

use thiserror::Error;

use eiscp_protocol::ProtocolError;

/// Errors raised by a device session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// TCP connection could not be established.
    #[error("Connection failed: {0}")]
    Connect(#[source] io::Error),

    /// TCP connection was not established in time.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// Writing a command to the device failed.
    #[error("Failed to send command: {0}")]
    Write(#[source] io::Error),

    /// The read loop has ended and every queued message was consumed.
    #[error("Session closed")]
    Closed,
}

/// Errors raised during discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Socket setup, send or receive failed.
    #[error("Discovery I/O error: {0}")]
    Io(#[from] io::Error),

    /// Discovery range is neither an IP address nor a CIDR block.
    #[error("Invalid discovery target {0:?}")]
    InvalidTarget(String),

    /// A reply could not be decoded.
    #[error("Invalid discovery reply from {from}: {source}")]
    Protocol {
        from: std::net::SocketAddr,
        #[source]
        source: ProtocolError,
    },

    /// Connecting to a discovered device failed.
    #[error("Failed to connect to discovered device: {0}")]
    Session(#[from] SessionError),
}

/// Errors raised while building a command registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A value pattern is not a valid regular expression.
    #[error("Invalid value pattern {pattern:?} for command {code}: {source}")]
    InvalidPattern {
        code: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Two commands share the same code.
    #[error("Duplicate command code {0}")]
    DuplicateCode(String),

    /// Command code is not three characters.
    #[error("Invalid command code {0:?}")]
    InvalidCode(String),

    /// Catalogue file could not be parsed.
    #[error("Failed to parse command catalogue: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while resolving a message against the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// No command with this code is registered.
    #[error("Command {0:?} not found")]
    UnknownCommand(String),
}
