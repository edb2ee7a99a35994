// src/protocol/matcher.rs
//
// Reply block detection.
//
// A block is a marker (RESPONSE: or ERROR:), a payload of any characters
// including line breaks, optional trailing CR/LF, and the device prompt:
//
//   RESPONSE:<payload>[\r\n]*nfc>
//   ERROR:<payload>[\r\n]*nfc>
//
// Matching is a two-phase scan per marker: find the earliest marker, then the
// earliest prompt after it. The payload is therefore the shortest one that
// ends in a prompt, and two concatenated blocks never merge into one.

use super::{ERROR_MARKER, PROMPT, RESPONSE_MARKER};

// ============================================================================
// Types
// ============================================================================

/// Which marker opened a block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Response,
    Error,
}

impl BlockKind {
    pub const ALL: [BlockKind; 2] = [BlockKind::Response, BlockKind::Error];

    pub fn marker(self) -> &'static str {
        match self {
            BlockKind::Response => RESPONSE_MARKER,
            BlockKind::Error => ERROR_MARKER,
        }
    }
}

/// A complete reply extracted from the receive buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Text between the marker and the prompt, trailing CR/LF removed
    pub payload: String,
}

/// A block together with where it sits in the buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMatch {
    pub block: Block,
    /// Byte offset of the marker
    pub start: usize,
    /// Byte offset just past the prompt; everything before it is consumed
    pub consumed_through: usize,
}

// ============================================================================
// Matcher
// ============================================================================

/// Scanner for the first complete block in a buffer
pub struct ResponseMatcher;

impl ResponseMatcher {
    /// Find the first complete block in `buffer`.
    ///
    /// Candidates for both markers are computed independently and the one
    /// whose prompt ends first wins. When both end at the same prompt the
    /// RESPONSE: candidate wins, since device log text can contain `ERROR:`
    /// ahead of a real reply. Returns `None` when no block is complete yet.
    pub fn find(buffer: &str) -> Option<BlockMatch> {
        BlockKind::ALL
            .iter()
            .filter_map(|&kind| Self::find_kind(buffer, kind))
            .min_by_key(|m| (m.consumed_through, m.block.kind != BlockKind::Response))
    }

    /// Find the first complete block opened by `kind`'s marker
    pub fn find_kind(buffer: &str, kind: BlockKind) -> Option<BlockMatch> {
        let marker = kind.marker();
        let start = buffer.find(marker)?;
        let payload_start = start + marker.len();
        let prompt_start = payload_start + buffer[payload_start..].find(PROMPT)?;

        let payload = buffer[payload_start..prompt_start].trim_end_matches(['\r', '\n']);

        Some(BlockMatch {
            block: Block {
                kind,
                payload: payload.to_string(),
            },
            start,
            consumed_through: prompt_start + PROMPT.len(),
        })
    }
}

/// Offset of the earliest marker of either kind, complete or not
pub fn first_marker(buffer: &str) -> Option<usize> {
    BlockKind::ALL
        .iter()
        .filter_map(|kind| buffer.find(kind.marker()))
        .min()
}

// ============================================================================
// Tests
// ============================================================================
