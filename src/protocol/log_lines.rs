// src/protocol/log_lines.rs
//
// Extraction of free-form device log lines.
//
// The firmware prints diagnostics on the same stream as its replies. Only
// text ahead of the first marker is a log line candidate; anything from a
// marker onwards belongs to a (possibly still incomplete) block and is left
// for the matcher.

use super::accumulator::ChunkAccumulator;
use super::matcher::first_marker;

/// Splits complete log lines off the front of the receive buffer
pub struct LogLineSplitter;

impl LogLineSplitter {
    /// Remove every complete line that precedes the first marker.
    ///
    /// Lines end at `\n`; a preceding `\r` is stripped. Blank lines are
    /// consumed but not returned. A trailing partial line stays in the buffer
    /// until the rest of it arrives.
    pub fn split(acc: &mut ChunkAccumulator) -> Vec<String> {
        let buffer = acc.buffer();
        let region_end = first_marker(buffer).unwrap_or(buffer.len());
        let region = &buffer[..region_end];

        let Some(last_newline) = region.rfind('\n') else {
            return Vec::new();
        };

        let lines: Vec<String> = region[..last_newline]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();

        acc.consume_through(last_newline + 1);
        lines
    }

    /// Text sharing a line with a block marker, e.g. an echoed prompt.
    ///
    /// Returns `None` when the text before `marker_start` is blank.
    pub fn leading_text(buffer: &str, marker_start: usize) -> Option<String> {
        let text = buffer[..marker_start].trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}
