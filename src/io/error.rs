// src/io/error.rs
//
// Error taxonomy for the nfc> driver.
//
// Device errors (ERROR:<payload>) and closures are kept apart so callers can
// decide between retrying a command and reopening the session. Nothing in the
// driver retries on its own.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// The device answered with an ERROR: block
    #[error("{message}")]
    Device { message: String },

    /// The session ended before the command completed
    #[error("connection closed: {reason}")]
    Closed { reason: String },

    /// A command was issued while another one is still waiting for its reply
    #[error("command already pending: {pending}")]
    Busy { pending: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("{device}: timed out: {message}")]
    Timeout { device: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IoError {
    pub fn device(message: impl Into<String>) -> Self {
        IoError::Device {
            message: message.into(),
        }
    }

    pub fn closed(reason: impl ToString) -> Self {
        IoError::Closed {
            reason: reason.to_string(),
        }
    }

    pub fn busy(pending: impl Into<String>) -> Self {
        IoError::Busy {
            pending: pending.into(),
        }
    }

    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, message: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }

    /// The session is gone; the command may be retried on a new one
    pub fn is_closed(&self) -> bool {
        matches!(self, IoError::Closed { .. })
    }

    /// The device rejected the command; the session is still usable
    pub fn is_device_error(&self) -> bool {
        matches!(self, IoError::Device { .. })
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_displays_payload_verbatim() {
        let e = IoError::device("bad uid");
        assert_eq!(e.to_string(), "bad uid");
        assert!(e.is_device_error());
        assert!(!e.is_closed());
    }

    #[test]
    fn test_closed_is_distinct_from_device_error() {
        let e = IoError::closed("end of stream");
        assert!(e.is_closed());
        assert!(!e.is_device_error());
        assert_eq!(e.to_string(), "connection closed: end of stream");
    }

    #[test]
    fn test_into_string() {
        let s: String = IoError::connection("serial(/dev/ttyACM0)", "no such file").into();
        assert_eq!(s, "serial(/dev/ttyACM0): connection failed: no such file");
    }
}
