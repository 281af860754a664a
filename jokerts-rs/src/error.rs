//! Error types for the streaming engine and its collaborators.

use std::io;

use thiserror::Error;

use crate::engine::EngineState;

/// Errors that cross the engine boundary.
///
/// Resync losses and queue overflow never show up here; they are visible
/// only through [`crate::StatsSnapshot`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Buffer pool or packet arena could not be allocated.
    #[error("Failed to allocate {what} ({bytes} bytes)")]
    Allocation { what: &'static str, bytes: usize },

    /// A transfer failed twice in a row on the same buffer.
    #[error("Device lost: transfer slot {slot} failed twice: {source}")]
    DeviceLost {
        slot: usize,
        #[source]
        source: TransportError,
    },

    /// The transport failed outside a transfer completion.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation not allowed in the current lifecycle state.
    #[error("Cannot {op} while {from:?}")]
    InvalidState { from: EngineState, op: &'static str },

    /// PID outside 0..=0x1FFF.
    #[error("Invalid PID: 0x{0:04X}")]
    InvalidPid(u16),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn producer thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("Producer thread panicked")]
    ProducerPanicked,
}

/// Errors reported by a transport for a single transfer or submission.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transfer did not complete in time.
    #[error("Transfer stalled")]
    Stall,

    /// The device went away.
    #[error("Device disconnected")]
    Disconnected,

    /// Submission refused because the transport is shutting down.
    #[error("Transport cancelled")]
    Cancelled,

    /// No transfer can ever complete again.
    #[error("Transport closed")]
    Closed,
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
