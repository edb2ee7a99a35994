// src/io/mod.rs
//
// Transport abstraction and session engine for nfc> devices.
// The session loop owns the transport's read side, correlates reply blocks
// with the single in-flight command, and reports state changes to callers.

mod channel;
mod error;
pub mod serial; // pub for port enumeration from the CLI
mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use channel::{ChannelState, CommandChannel, Delivery, PendingCommand, Reply};
pub use error::IoError;
pub use serial::{list_serial_ports, Parity, SerialConfig, SerialPortInfo, SerialTransport};
pub use session::{CommandRequest, NfcSession, SessionOptions, TransportLoop};

use async_trait::async_trait;
use std::fmt;

// ============================================================================
// Transport Trait
// ============================================================================

/// Full-duplex text stream to a device.
///
/// Byte decoding happens inside the transport; the engine only deals with
/// text chunks whose boundaries carry no meaning.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next chunk. `Ok(None)` means end of stream.
    ///
    /// Must be cancel-safe: the session loop selects over it and drops the
    /// future whenever a command or a stop request arrives first.
    async fn read(&mut self) -> Result<Option<String>, IoError>;

    /// Write raw bytes to the device
    async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError>;

    /// Release the underlying channel. Called once when the loop exits.
    async fn close(&mut self) -> Result<(), IoError>;

    /// Short description used in log lines and errors, e.g. `serial(/dev/ttyACM0)`
    fn describe(&self) -> String;
}

// ============================================================================
// Session State
// ============================================================================

/// Transport lifecycle as seen by callers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Why a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Close was requested, or every session handle was dropped
    Stopped,
    /// The device side ended the stream
    EndOfStream,
    /// The transport failed
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => write!(f, "stopped"),
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::Error(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Snapshot published by the session loop on every state change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: TransportState,
    /// Set once the session has reached `Closing` or `Closed`
    pub reason: Option<CloseReason>,
}

impl SessionStatus {
    pub fn opening() -> Self {
        SessionStatus {
            state: TransportState::Opening,
            reason: None,
        }
    }
}
