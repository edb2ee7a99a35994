// Log macro first so every module below can use tlog!
#[macro_use]
pub mod logging;

pub mod io;
pub mod protocol;
pub mod settings;

pub use io::{
    list_serial_ports, CloseReason, IoError, NfcSession, SerialConfig, SessionOptions,
    SessionStatus, Transport, TransportState,
};
pub use settings::Settings;
