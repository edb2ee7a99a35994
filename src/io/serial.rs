// src/io/serial.rs
//
// Serial port transport for nfc> devices.
//
// serialport is blocking, so the port lives on a spawn_blocking thread that
// polls with a short read timeout. Between reads it services queued writes
// and checks the stop flag; decoded text is forwarded to the async side over
// a tokio channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{IoError, Transport};

// ============================================================================
// Types and Configuration
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Serial link parameters
#[derive(Clone, Debug, PartialEq)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "/dev/cu.usbmodem1101", "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// 5, 6, 7 or 8
    pub data_bits: u8,
    /// 1 or 2
    pub stop_bits: u8,
    pub parity: Parity,
    /// Poll interval of the port thread; bounds write and stop latency
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: Duration::from_millis(50),
        }
    }

    fn data_bits(&self) -> Result<serialport::DataBits, IoError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            n => Err(IoError::configuration(format!("invalid data bits {}", n))),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, IoError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            n => Err(IoError::configuration(format!("invalid stop bits {}", n))),
        }
    }

    /// Frame format in the usual shorthand, e.g. `8N1`
    pub fn frame_format(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }
}

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// Enumerate serial ports.
/// On macOS only the /dev/cu.* (calling unit) side of each device is listed.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::connection("serial", format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let mut info = SerialPortInfo {
                port_name: p.port_name,
                port_type: String::new(),
                manufacturer: None,
                product: None,
                serial_number: None,
                vid: None,
                pid: None,
            };
            match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    info.port_type = "USB".to_string();
                    info.manufacturer = usb.manufacturer;
                    info.product = usb.product;
                    info.serial_number = usb.serial_number;
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                }
                serialport::SerialPortType::BluetoothPort => info.port_type = "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => info.port_type = "PCI".to_string(),
                serialport::SerialPortType::Unknown => info.port_type = "Unknown".to_string(),
            }
            info
        })
        .collect())
}

// ============================================================================
// Streaming UTF-8 Decoding
// ============================================================================

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two reads is held back until its
/// remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut pos = 0;
        let rest_start = loop {
            match std::str::from_utf8(&self.pending[pos..]) {
                Ok(s) => {
                    out.push_str(s);
                    break self.pending.len();
                }
                Err(e) => {
                    let valid_end = pos + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[pos..valid_end]));
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            pos = valid_end + n;
                        }
                        // Truncated sequence at the end: wait for more bytes
                        None => break valid_end,
                    }
                }
            }
        };

        self.pending.drain(..rest_start);
        out
    }

    /// Flush a dangling partial sequence at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.clear();
        Some(char::REPLACEMENT_CHARACTER.to_string())
    }
}

// ============================================================================
// Serial Transport
// ============================================================================

/// Message from the port thread to the async side
enum PortEvent {
    Chunk(String),
    Eof,
    Error(String),
}

/// Write request serviced by the port thread between reads
struct TransmitRequest {
    data: Vec<u8>,
    result_tx: oneshot::Sender<Result<(), String>>,
}

pub struct SerialTransport {
    device: String,
    events: mpsc::Receiver<PortEvent>,
    transmit_tx: std_mpsc::SyncSender<TransmitRequest>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open the port and start its I/O thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &SerialConfig) -> Result<Self, IoError> {
        let device = format!("serial({})", config.port);

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(config.data_bits()?)
            .stop_bits(config.stop_bits()?)
            .parity(config.parity.into())
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        tlog!(
            "[serial] Opened {} at {} baud ({})",
            config.port,
            config.baud_rate,
            config.frame_format()
        );

        Ok(Self::from_port(port, device))
    }

    /// Start the I/O thread on an already opened port
    fn from_port<P>(port: P, device: String) -> Self
    where
        P: Read + Write + Send + 'static,
    {
        let (event_tx, events) = mpsc::channel(64);
        let (transmit_tx, transmit_rx) = std_mpsc::sync_channel::<TransmitRequest>(8);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread_device = device.clone();
        let thread_stop = stop_flag.clone();
        let thread = tokio::task::spawn_blocking(move || {
            run_port_blocking(port, thread_device, thread_stop, transmit_rx, event_tx)
        });

        SerialTransport {
            device,
            events,
            transmit_tx,
            stop_flag,
            thread: Some(thread),
        }
    }
}

/// Blocking port loop: reads until stopped, disconnected, or failed
fn run_port_blocking<P: Read + Write>(
    mut port: P,
    device: String,
    stop_flag: Arc<AtomicBool>,
    transmit_rx: std_mpsc::Receiver<TransmitRequest>,
    event_tx: mpsc::Sender<PortEvent>,
) {
    let mut buf = [0u8; 256];
    let mut decoder = Utf8Decoder::new();

    let end_event = loop {
        if stop_flag.load(Ordering::Relaxed) {
            break None;
        }

        while let Ok(req) = transmit_rx.try_recv() {
            let result = port
                .write_all(&req.data)
                .and_then(|_| port.flush())
                .map_err(|e| e.to_string());
            let _ = req.result_tx.send(result);
        }

        match port.read(&mut buf) {
            Ok(0) => break Some(PortEvent::Eof),
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && event_tx.blocking_send(PortEvent::Chunk(text)).is_err() {
                    // Transport dropped
                    break None;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => break Some(PortEvent::Error(e.to_string())),
        }
    };

    if let Some(tail) = decoder.finish() {
        let _ = event_tx.blocking_send(PortEvent::Chunk(tail));
    }
    if let Some(event) = end_event {
        let _ = event_tx.blocking_send(event);
    }

    tlog!("[serial] {} port thread exiting", device);
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&mut self) -> Result<Option<String>, IoError> {
        match self.events.recv().await {
            Some(PortEvent::Chunk(text)) => Ok(Some(text)),
            Some(PortEvent::Error(e)) => Err(IoError::read(&self.device, e)),
            Some(PortEvent::Eof) | None => Ok(None),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.transmit_tx
            .try_send(TransmitRequest {
                data: bytes.to_vec(),
                result_tx,
            })
            .map_err(|e| IoError::write(&self.device, format!("failed to queue write: {}", e)))?;

        result_rx
            .await
            .map_err(|_| IoError::write(&self.device, "port thread exited"))?
            .map_err(|e| IoError::write(&self.device, e))
    }

    async fn close(&mut self) -> Result<(), IoError> {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Unblocks a port thread waiting on a full event queue
        self.events.close();
        if let Some(thread) = self.thread.take() {
            thread
                .await
                .map_err(|e| IoError::connection(&self.device, format!("port thread panicked: {}", e)))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.device.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

// ============================================================================
// Tests
// ============================================================================
