//! Error types for mqttqos.

use std::io;

use crate::types::PacketId;

/// Result type alias for mqttqos.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mqttqos operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Variable byte integer longer than 4 bytes or out of range.
    #[error("malformed variable byte integer")]
    MalformedVarInt,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Packet exceeds the configured maximum size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// All 65535 packet identifiers are in flight.
    #[error("packet identifiers exhausted")]
    IdentifierExhausted,

    /// The packet identifier is already in use.
    #[error("packet identifier {0} already in use")]
    PacketIdInUse(PacketId),

    /// The packet identifier was not acquired from this connection.
    #[error("packet identifier {0} is not held")]
    PacketIdNotHeld(PacketId),

    /// An acknowledgment referenced no in-flight operation, or arrived at the
    /// wrong stage of one.
    #[error("unexpected {packet} for packet identifier {id}")]
    UnexpectedAck { packet: &'static str, id: u16 },

    /// Connection refused by broker.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection closed by peer or by disconnect.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pending operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The completion was dropped before a result was delivered.
    #[error("operation abandoned")]
    Abandoned,

    /// A completion was fired twice.
    #[error("completion already fired")]
    AlreadyCompleted,

    /// Unexpected packet received.
    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket { expected: String, got: String },

    /// Timeout error.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::MalformedVarInt
                | Error::PacketTooLarge { .. }
                | Error::ConnectionClosed
        )
    }
}
