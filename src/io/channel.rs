// src/io/channel.rs
//
// Single-slot command correlation.
//
// The firmware cannot pipeline commands, so there is no request ID on the
// wire: the next block to arrive answers the one command in flight. The
// channel enforces that there is never more than one.
//
//   Idle --issue--> Armed --deliver/abort--> Idle

use tokio::sync::oneshot;

use super::error::IoError;
use crate::protocol::{encode_command, Block, BlockKind};

/// Completion handle for a command: payload on success, `IoError` otherwise
pub type Reply = oneshot::Sender<Result<String, IoError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Armed,
}

/// The command currently waiting for a block
#[derive(Debug)]
pub struct PendingCommand {
    pub command: String,
    reply: Reply,
}

/// What `deliver` did with a block
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// RESPONSE: completed the pending command (command text attached)
    Resolved(String),
    /// ERROR: failed the pending command (command text attached)
    Rejected(String),
    /// No command was pending; the block was dropped
    Discarded,
}

#[derive(Debug, Default)]
pub struct CommandChannel {
    pending: Option<PendingCommand>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ChannelState {
        if self.pending.is_some() {
            ChannelState::Armed
        } else {
            ChannelState::Idle
        }
    }

    pub fn pending_command(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.command.as_str())
    }

    /// Arm the channel for `command`.
    ///
    /// Returns the bytes to write to the device. If a command is already
    /// pending, or the text cannot be encoded, `reply` is failed right away
    /// and the channel is left exactly as it was.
    pub fn issue(&mut self, command: String, reply: Reply) -> Result<Vec<u8>, IoError> {
        if let Some(pending) = &self.pending {
            let err = IoError::busy(&pending.command);
            let _ = reply.send(Err(err.clone()));
            return Err(err);
        }

        let bytes = match encode_command(&command) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = reply.send(Err(err.clone()));
                return Err(err);
            }
        };

        self.pending = Some(PendingCommand { command, reply });
        Ok(bytes)
    }

    /// Complete the pending command with `block`
    pub fn deliver(&mut self, block: Block) -> Delivery {
        let Some(pending) = self.pending.take() else {
            return Delivery::Discarded;
        };

        // A dropped receiver means the caller stopped waiting; the slot is
        // freed either way.
        match block.kind {
            BlockKind::Response => {
                let _ = pending.reply.send(Ok(block.payload));
                Delivery::Resolved(pending.command)
            }
            BlockKind::Error => {
                let _ = pending.reply.send(Err(IoError::device(block.payload)));
                Delivery::Rejected(pending.command)
            }
        }
    }

    /// Fail the pending command with a closure error.
    ///
    /// Returns the aborted command text, if there was one.
    pub fn abort(&mut self, reason: &str) -> Option<String> {
        let pending = self.pending.take()?;
        let _ = pending.reply.send(Err(IoError::closed(reason)));
        Some(pending.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(payload: &str) -> Block {
        Block {
            kind: BlockKind::Response,
            payload: payload.to_string(),
        }
    }

    fn error(payload: &str) -> Block {
        Block {
            kind: BlockKind::Error,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_issue_arms_and_returns_wire_bytes() {
        let mut channel = CommandChannel::new();
        let (tx, _rx) = oneshot::channel();
        let bytes = channel.issue("read_tag_raw".to_string(), tx).unwrap();
        assert_eq!(bytes, b"read_tag_raw\r".to_vec());
        assert_eq!(channel.state(), ChannelState::Armed);
        assert_eq!(channel.pending_command(), Some("read_tag_raw"));
    }

    #[test]
    fn test_response_resolves() {
        let mut channel = CommandChannel::new();
        let (tx, mut rx) = oneshot::channel();
        channel.issue("read_tag_raw".to_string(), tx).unwrap();

        let delivery = channel.deliver(response("ABCDEF123"));
        assert_eq!(delivery, Delivery::Resolved("read_tag_raw".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Ok("ABCDEF123".to_string()));
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_error_rejects_with_payload() {
        let mut channel = CommandChannel::new();
        let (tx, mut rx) = oneshot::channel();
        channel.issue("write_tag_raw 00".to_string(), tx).unwrap();

        assert_eq!(
            channel.deliver(error("bad uid")),
            Delivery::Rejected("write_tag_raw 00".to_string())
        );
        assert_eq!(rx.try_recv().unwrap(), Err(IoError::device("bad uid")));
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_block_without_pending_is_discarded() {
        let mut channel = CommandChannel::new();
        assert_eq!(channel.deliver(response("AA")), Delivery::Discarded);
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_second_issue_fails_fast_and_keeps_first() {
        let mut channel = CommandChannel::new();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        channel.issue("first".to_string(), first_tx).unwrap();

        let err = channel.issue("second".to_string(), second_tx).unwrap_err();
        assert_eq!(err, IoError::busy("first"));
        assert_eq!(second_rx.try_recv().unwrap(), Err(IoError::busy("first")));
        assert_eq!(channel.pending_command(), Some("first"));

        channel.deliver(response("AA"));
        assert_eq!(first_rx.try_recv().unwrap(), Ok("AA".to_string()));
    }

    #[test]
    fn test_invalid_command_leaves_channel_idle() {
        let mut channel = CommandChannel::new();
        let (tx, mut rx) = oneshot::channel();
        assert!(channel.issue("a\nb".to_string(), tx).is_err());
        assert!(matches!(rx.try_recv().unwrap(), Err(IoError::InvalidCommand(_))));
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_abort_fails_pending_with_closure() {
        let mut channel = CommandChannel::new();
        let (tx, mut rx) = oneshot::channel();
        channel.issue("read_tag_raw".to_string(), tx).unwrap();

        assert_eq!(channel.abort("end of stream"), Some("read_tag_raw".to_string()));
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(channel.abort("again"), None);
    }

    #[test]
    fn test_channel_is_reusable() {
        let mut channel = CommandChannel::new();
        for payload in ["AA", "BB", "CC"] {
            let (tx, mut rx) = oneshot::channel();
            channel.issue("read_tag_raw".to_string(), tx).unwrap();
            channel.deliver(response(payload));
            assert_eq!(rx.try_recv().unwrap(), Ok(payload.to_string()));
        }
    }

    #[test]
    fn test_dropped_receiver_still_frees_slot() {
        let mut channel = CommandChannel::new();
        let (tx, rx) = oneshot::channel();
        channel.issue("read_tag_raw".to_string(), tx).unwrap();
        drop(rx);
        assert_eq!(
            channel.deliver(response("AA")),
            Delivery::Resolved("read_tag_raw".to_string())
        );
        assert_eq!(channel.state(), ChannelState::Idle);
    }
}
