// src/protocol/mod.rs
//
// Wire-level pieces of the nfc> line protocol.
//
// The reader firmware takes one ASCII command terminated by a carriage return
// and answers with a tagged block followed by its prompt:
//
//   -> read_tag_raw\r
//   <- boot ok\r\n                 (free-form log line, informational only)
//   <- RESPONSE:ABCDEF123\r\nnfc>  (or ERROR:<message>\r\nnfc> )
//
// Everything in here is synchronous and allocation-light so the session loop
// can run it on every chunk without suspending.

pub mod accumulator;
pub mod log_lines;
pub mod matcher;

pub use accumulator::ChunkAccumulator;
pub use log_lines::LogLineSplitter;
pub use matcher::{first_marker, Block, BlockKind, BlockMatch, ResponseMatcher};

use crate::io::IoError;

// ============================================================================
// Constants
// ============================================================================

/// Marker opening a successful reply block
pub const RESPONSE_MARKER: &str = "RESPONSE:";

/// Marker opening a failed reply block
pub const ERROR_MARKER: &str = "ERROR:";

/// Device prompt that follows every reply block
pub const PROMPT: &str = "nfc> ";

/// Outbound command terminator (0x0D, no line feed)
pub const COMMAND_TERMINATOR: u8 = b'\r';

// ============================================================================
// Command Encoding
// ============================================================================

/// Encode a command for transmission.
///
/// Returns the ASCII command bytes followed by a single `\r`. Commands that
/// are empty or contain a line break are rejected since the firmware would
/// treat every line break as the end of a separate command.
pub fn encode_command(command: &str) -> Result<Vec<u8>, IoError> {
    if command.is_empty() {
        return Err(IoError::InvalidCommand("command is empty".to_string()));
    }
    if command.contains(['\r', '\n']) {
        return Err(IoError::InvalidCommand(format!(
            "command {:?} contains a line break",
            command
        )));
    }

    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(COMMAND_TERMINATOR);
    Ok(bytes)
}

// ============================================================================
// Stream Draining
// ============================================================================

/// Something taken off the front of the receive buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// Free-form device output
    Log(String),
    /// A complete reply
    Block(Block),
}

/// Take complete log lines and every complete block out of `acc`, in stream
/// order.
///
/// Re-scans after each block, so back-to-back blocks in one chunk all come
/// out. Whatever remains is an incomplete line or block.
pub fn drain(acc: &mut ChunkAccumulator) -> Vec<StreamItem> {
    let mut items = Vec::new();

    loop {
        items.extend(LogLineSplitter::split(acc).into_iter().map(StreamItem::Log));

        let Some(found) = ResponseMatcher::find(acc.buffer()) else {
            break;
        };
        if let Some(text) = LogLineSplitter::leading_text(acc.buffer(), found.start) {
            items.push(StreamItem::Log(text));
        }
        acc.consume_through(found.consumed_through);
        items.push(StreamItem::Block(found.block));
    }

    items
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_single_cr() {
        assert_eq!(encode_command("read_tag_raw").unwrap(), b"read_tag_raw\r".to_vec());
    }

    #[test]
    fn test_encode_keeps_arguments() {
        let encoded = encode_command("write_tag_raw 0011AABB").unwrap();
        assert_eq!(encoded.last(), Some(&0x0D));
        assert!(!encoded.contains(&b'\n'));
        assert!(encoded.starts_with(b"write_tag_raw 0011AABB"));
    }

    fn feed(chunks: &[&str]) -> (Vec<StreamItem>, String) {
        let mut acc = ChunkAccumulator::new();
        let mut items = Vec::new();
        for chunk in chunks {
            acc.append(chunk);
            items.extend(drain(&mut acc));
        }
        (items, acc.take())
    }

    fn log(text: &str) -> StreamItem {
        StreamItem::Log(text.to_string())
    }

    fn block(kind: BlockKind, payload: &str) -> StreamItem {
        StreamItem::Block(Block {
            kind,
            payload: payload.to_string(),
        })
    }

    const WIRE: &str = "boot ok\r\ndebug: ready\r\nnfc> read_tag_raw\r\n\
                        RESPONSE:AA\r\nnfc> field off\r\n\
                        ERROR:bad uid\nnfc> RESPONSE:multi\r\nline\r\nnfc> tail";

    #[test]
    fn test_drain_orders_logs_and_blocks() {
        let (items, rest) = feed(&[WIRE]);
        assert_eq!(
            items,
            vec![
                log("boot ok"),
                log("debug: ready"),
                log("nfc> read_tag_raw"),
                block(BlockKind::Response, "AA"),
                log("field off"),
                block(BlockKind::Error, "bad uid"),
                block(BlockKind::Response, "multi\r\nline"),
            ]
        );
        assert_eq!(rest, "tail");
    }

    #[test]
    fn test_drain_is_independent_of_chunk_boundaries() {
        let (expected, expected_rest) = feed(&[WIRE]);

        // Every two-piece split
        for cut in 1..WIRE.len() {
            let (items, rest) = feed(&[&WIRE[..cut], &WIRE[cut..]]);
            assert_eq!(items, expected, "split at {}", cut);
            assert_eq!(rest, expected_rest, "split at {}", cut);
        }

        // One character per chunk
        let singles: Vec<String> = WIRE.chars().map(String::from).collect();
        let singles: Vec<&str> = singles.iter().map(String::as_str).collect();
        assert_eq!(feed(&singles), (expected.clone(), expected_rest.clone()));

        // Uneven pieces
        for size in [3, 7, 13] {
            let pieces: Vec<&str> = WIRE
                .as_bytes()
                .chunks(size)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();
            assert_eq!(feed(&pieces), (expected.clone(), expected_rest.clone()), "size {}", size);
        }
    }

    #[test]
    fn test_drain_leaves_incomplete_block() {
        let (items, rest) = feed(&["log\r\nRESPONSE:AB", "CD\r\n"]);
        assert_eq!(items, vec![log("log")]);
        assert_eq!(rest, "RESPONSE:ABCD\r\n");
    }

    #[test]
    fn test_drain_takes_every_complete_block() {
        let mut acc = ChunkAccumulator::new();
        acc.append("hi\r\nRESPONSE:AA\r\nnfc> RESPONSE:BB\r\nnfc> RESP");

        assert_eq!(
            drain(&mut acc),
            vec![
                log("hi"),
                block(BlockKind::Response, "AA"),
                block(BlockKind::Response, "BB"),
            ]
        );
        assert_eq!(acc.buffer(), "RESP");
    }

    #[test]
    fn test_drain_logs_error_text_ahead_of_response() {
        let (items, rest) = feed(&["i2c ERROR: nack\r\n", "RESPONSE:AA\r\nnfc> "]);
        assert_eq!(
            items,
            vec![log("i2c ERROR: nack"), block(BlockKind::Response, "AA")]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_encode_rejects_line_breaks() {
        assert!(matches!(encode_command("a\rb"), Err(IoError::InvalidCommand(_))));
        assert!(matches!(encode_command("a\nb"), Err(IoError::InvalidCommand(_))));
        assert!(matches!(encode_command(""), Err(IoError::InvalidCommand(_))));
    }
}
