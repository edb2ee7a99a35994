// src/io/session.rs
//
// Session loop and caller handle for nfc> devices.
//
// One task owns everything mutable: the transport, the receive buffer, the
// command slot and the published state. Callers talk to it over channels, so
// commands, stop requests and incoming chunks are all handled on the same
// loop turn and nothing needs a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelState, CommandChannel, Delivery, Reply};
use super::error::IoError;
use super::serial::{SerialConfig, SerialTransport};
use super::{CloseReason, SessionStatus, Transport, TransportState};
use crate::protocol::{self, first_marker, Block, ChunkAccumulator, StreamItem};

/// Commands queued between callers and the loop. Anything beyond the one in
/// flight is rejected as busy once the loop reads it.
const REQUEST_QUEUE_DEPTH: usize = 8;

// ============================================================================
// Types and Configuration
// ============================================================================

/// A command on its way to the loop
#[derive(Debug)]
pub struct CommandRequest {
    pub command: String,
    pub reply: Reply,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Name used in log lines; defaults to the transport description
    pub label: Option<String>,
    /// Echo device log lines through tlog!
    pub echo_device_log: bool,
    /// Receives every device log line
    pub log_sink: Option<mpsc::UnboundedSender<String>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            label: None,
            echo_device_log: true,
            log_sink: None,
        }
    }
}

// ============================================================================
// Transport Loop
// ============================================================================

/// Read cycle for one transport session
pub struct TransportLoop<T: Transport> {
    transport: T,
    label: String,
    accumulator: ChunkAccumulator,
    channel: CommandChannel,
    /// Blocks that arrived right behind a delivered one, oldest first
    held: VecDeque<Block>,
    requests: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
    status: watch::Sender<SessionStatus>,
    echo_device_log: bool,
    log_sink: Option<mpsc::UnboundedSender<String>>,
}

impl<T: Transport> TransportLoop<T> {
    /// Run until the transport ends, fails, or a stop is requested.
    ///
    /// The buffer is processed completely after every chunk and every issued
    /// command, so a stop request never races a reply that has already
    /// arrived for the pending command. Requests are polled ahead of reads
    /// so a chatty device cannot hold a command back.
    pub async fn run(mut self) -> CloseReason {
        self.publish(TransportState::Open, None);
        tlog!("[nfc:{}] Session open", self.label);

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break CloseReason::Stopped,

                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Err(reason) = self.issue(request).await {
                            break reason;
                        }
                    }
                    // Every handle is gone
                    None => break CloseReason::Stopped,
                },

                chunk = self.transport.read() => match chunk {
                    Ok(Some(text)) => self.on_chunk(&text),
                    Ok(None) => break CloseReason::EndOfStream,
                    Err(e) => break CloseReason::Error(e.to_string()),
                },
            }
        };

        self.shutdown(reason).await
    }

    fn on_chunk(&mut self, text: &str) {
        self.accumulator.append(text);
        self.process_buffer();
    }

    /// Echo log lines and hand complete blocks to the pending command.
    ///
    /// A block that completes while no command is pending is discarded.
    /// Blocks that arrive in the same pass right behind a delivered one are
    /// held, in order, for the commands issued next.
    fn process_buffer(&mut self) {
        let mut delivered = false;
        if self.channel.state() == ChannelState::Armed {
            if let Some(block) = self.held.pop_front() {
                delivered = self.deliver(block);
            }
        }

        for item in protocol::drain(&mut self.accumulator) {
            match item {
                StreamItem::Log(line) => self.emit_log(line),
                StreamItem::Block(block) => {
                    if delivered && self.channel.state() == ChannelState::Idle {
                        self.held.push_back(block);
                    } else {
                        delivered |= self.deliver(block);
                    }
                }
            }
        }
    }

    /// Returns false if there was no command to deliver to
    fn deliver(&mut self, block: Block) -> bool {
        let kind = block.kind;
        match self.channel.deliver(block) {
            Delivery::Resolved(_) => true,
            Delivery::Rejected(command) => {
                tlog!("[nfc:{}] Device rejected {:?}", self.label, command);
                true
            }
            Delivery::Discarded => {
                tlog!(
                    "[nfc:{}] Discarding unsolicited {:?} block (no command pending)",
                    self.label,
                    kind
                );
                false
            }
        }
    }

    async fn issue(&mut self, request: CommandRequest) -> Result<(), CloseReason> {
        let CommandRequest { command, reply } = request;

        let bytes = match self.channel.issue(command, reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                tlog!("[nfc:{}] Command refused: {}", self.label, e);
                return Ok(());
            }
        };

        if let Err(e) = self.transport.write(&bytes).await {
            tlog!("[nfc:{}] {}", self.label, e);
            return Err(CloseReason::Error(e.to_string()));
        }

        // A held reply answers this command straight away
        self.process_buffer();
        Ok(())
    }

    fn emit_log(&mut self, line: String) {
        if self.echo_device_log {
            tlog!("[nfc:{}] device: {}", self.label, line);
        }
        let sink_gone = self
            .log_sink
            .as_ref()
            .map_or(false, |sink| sink.send(line).is_err());
        if sink_gone {
            self.log_sink = None;
        }
    }

    async fn shutdown(mut self, reason: CloseReason) -> CloseReason {
        self.publish(TransportState::Closing, Some(reason.clone()));

        let leftover = self.accumulator.take();
        if first_marker(&leftover).is_some() {
            tlog!(
                "[nfc:{}] Discarding {} bytes of undelivered reply data: {:?}",
                self.label,
                leftover.len(),
                leftover
            );
        } else if !leftover.trim().is_empty() {
            self.emit_log(leftover.trim().to_string());
        }

        if !self.held.is_empty() {
            tlog!("[nfc:{}] Discarding {} held replies", self.label, self.held.len());
            self.held.clear();
        }

        if let Some(command) = self.channel.abort(&reason.to_string()) {
            tlog!("[nfc:{}] Aborted {:?}: {}", self.label, command, reason);
        }

        // Fail anything that was queued behind the pending command
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(IoError::closed(&reason)));
        }

        if let Err(e) = self.transport.close().await {
            tlog!("[nfc:{}] Close failed: {}", self.label, e);
        }

        self.publish(TransportState::Closed, Some(reason.clone()));
        tlog!("[nfc:{}] Session closed ({})", self.label, reason);
        reason
    }

    fn publish(&self, state: TransportState, reason: Option<CloseReason>) {
        self.status.send_replace(SessionStatus { state, reason });
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Caller-side handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct NfcSession {
    label: Arc<str>,
    requests: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl NfcSession {
    /// Build the handle and its loop without starting it.
    ///
    /// The loop does nothing until `run` is awaited, which lets callers pick
    /// the task or `LocalSet` it lives on.
    pub fn new<T: Transport>(transport: T, options: SessionOptions) -> (Self, TransportLoop<T>) {
        let label = options.label.unwrap_or_else(|| transport.describe());
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SessionStatus::opening());
        let cancel = CancellationToken::new();

        let transport_loop = TransportLoop {
            transport,
            label: label.clone(),
            accumulator: ChunkAccumulator::new(),
            channel: CommandChannel::new(),
            held: VecDeque::new(),
            requests: request_rx,
            cancel: cancel.clone(),
            status: status_tx,
            echo_device_log: options.echo_device_log,
            log_sink: options.log_sink,
        };

        let session = NfcSession {
            label: label.into(),
            requests: request_tx,
            cancel,
            status: status_rx,
        };

        (session, transport_loop)
    }

    /// Start the session loop on a tokio task
    pub fn spawn<T: Transport + 'static>(transport: T, options: SessionOptions) -> Self {
        let (session, transport_loop) = Self::new(transport, options);
        tokio::spawn(transport_loop.run());
        session
    }

    /// Open a serial port and start a session on it
    pub fn open_serial(config: &SerialConfig, options: SessionOptions) -> Result<Self, IoError> {
        let transport = SerialTransport::open(config)?;
        Ok(Self::spawn(transport, options))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send one command and wait for its reply.
    ///
    /// Resolves with the RESPONSE: payload. Fails with `IoError::Device` on
    /// an ERROR: reply, `IoError::Busy` if another command is still in flight,
    /// and `IoError::Closed` if the session ends first.
    pub async fn send_command(&self, command: &str) -> Result<String, IoError> {
        if let Some(reason) = self.closing_reason() {
            return Err(IoError::closed(reason));
        }

        let (reply, response) = oneshot::channel();
        self.requests
            .send(CommandRequest {
                command: command.to_string(),
                reply,
            })
            .await
            .map_err(|_| IoError::closed("session ended"))?;

        response
            .await
            .map_err(|_| IoError::closed("session ended"))?
    }

    pub fn state(&self) -> TransportState {
        self.status.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Watch state changes as they happen
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the session has fully closed and return why
    pub async fn closed(&self) -> CloseReason {
        let mut status = self.status.clone();
        if let Ok(current) = status.wait_for(|s| s.state == TransportState::Closed).await {
            return current.reason.clone().unwrap_or(CloseReason::Stopped);
        }
        // Loop task went away without publishing Closed
        let reason = status.borrow().reason.clone();
        reason.unwrap_or(CloseReason::Stopped)
    }

    /// Ask the loop to stop and wait for it to finish closing
    pub async fn close(&self) -> CloseReason {
        self.cancel.cancel();
        self.closed().await
    }

    fn closing_reason(&self) -> Option<CloseReason> {
        let status = self.status.borrow();
        match status.state {
            TransportState::Closing | TransportState::Closed => {
                Some(status.reason.clone().unwrap_or(CloseReason::Stopped))
            }
            TransportState::Opening | TransportState::Open => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
