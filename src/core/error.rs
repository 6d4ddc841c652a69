//! Error types for authping.

use std::io;

use thiserror::Error;

use crate::transport::IpFamily;

/// Errors from the random source.
#[derive(Debug, Error)]
pub enum RandomError {
    /// The operating system entropy source failed.
    #[error("failed to generate random numbers: {0}")]
    Entropy(#[from] rand::Error),
}

/// Errors in probe encoding.
///
/// Decoding never errors: a reply that does not authenticate is simply not
/// ours.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Probe size outside the representable range.
    #[error("invalid probe size {size}: must be between {min} and {max} bytes")]
    InvalidPacketSize {
        /// Requested body size.
        size: usize,
        /// Smallest allowed size.
        min: usize,
        /// Largest allowed size.
        max: usize,
    },

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,
}

/// Errors parsing an ICMP message off the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Message shorter than the header it claims to carry.
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes needed.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },

    /// IPv4 header that is not version 4 or has a bad header length.
    #[error("malformed IPv4 header")]
    MalformedIpHeader,
}

/// Errors in configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Interval not a number or below the minimum.
    #[error("invalid interval for option -i: {0:?}")]
    InvalidInterval(String),

    /// Size not a number or out of range.
    #[error("invalid size for option -s: {0}")]
    InvalidSize(String),

    /// Source address that is not an IP literal.
    #[error("invalid source address for option -I: {0:?}")]
    InvalidSource(String),

    /// Options given after the last destination.
    #[error("the last command line argument must be a destination.")]
    TrailingOptions,

    /// No destination given.
    #[error("you must specify at least one destination.")]
    NoDestinations,
}

/// Top-level authping errors.
#[derive(Debug, Error)]
pub enum PingError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session identity could not be issued at startup.
    #[error("failed to initialize destination {destination}: {source}")]
    SessionInit {
        /// Destination host.
        destination: String,
        /// Underlying entropy failure.
        source: RandomError,
    },

    /// Key rotation could not draw a fresh key.
    #[error("failed to rotate key for destination {destination}: {source}")]
    KeyRotation {
        /// Destination host.
        destination: String,
        /// Underlying entropy failure.
        source: RandomError,
    },

    /// A raw socket for a destination could not be opened.
    #[error("failed to create {family} socket for destination {destination}: {source}")]
    SocketSetup {
        /// Address family of the socket.
        family: IpFamily,
        /// Destination host.
        destination: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A receiver socket could not be opened.
    #[error("failed to listen on {family} protocol: {source}")]
    Listen {
        /// Address family of the socket.
        family: IpFamily,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A receiver socket read failed.
    #[error("failed to receive {family} message: {source}")]
    ReceiveFailed {
        /// Address family of the socket.
        family: IpFamily,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Every sender task has stopped.
    #[error("all destinations stopped")]
    AllSendersStopped,
}

impl PingError {
    /// Check if this error ends the process rather than one destination.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PingError::SocketSetup { .. })
    }
}

/// Result type for authping operations.
pub type PingResult<T> = Result<T, PingError>;
