//! Newline-delimited record decoding.
//!
//! The upstream body arrives as arbitrary byte chunks: a JSON record
//! can be split across two (or more) chunks, and so can a multi-byte
//! UTF-8 character. [`LineDecoder`] carries both kinds of partial
//! state between `push` calls so records come out whole, exactly
//! once, and in arrival order regardless of where the transport cut
//! the stream.

use tracing::warn;

use crate::types::GenerateRecord;

/// Incremental decoder from raw byte chunks to parsed records.
///
/// One decoder instance belongs to one stream. A line that fails to
/// parse is logged and skipped rather than failing the stream; blank
/// and whitespace-only lines are skipped silently.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    utf8_carry: Vec<u8>,
    /// Text of the current unterminated line.
    pending: String,
    /// Count of malformed lines skipped so far.
    skipped: u64,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of raw bytes, returning every record it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<GenerateRecord> {
        let text = self.decode_utf8(chunk);
        self.pending.push_str(&text);

        let mut records = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(record) = self.parse_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Drain the final unterminated line at end-of-stream, if any.
    ///
    /// Ollama terminates every record with a newline, but a truncated
    /// stream can still leave a parseable tail behind.
    pub fn finish(&mut self) -> Option<GenerateRecord> {
        if !self.utf8_carry.is_empty() {
            warn!(
                "discarding {} bytes of incomplete UTF-8 at end of stream",
                self.utf8_carry.len()
            );
            self.utf8_carry.clear();
        }
        let line = std::mem::take(&mut self.pending);
        self.parse_line(&line)
    }

    /// Number of malformed lines skipped since the decoder was created.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }

    fn parse_line(&mut self, line: &str) -> Option<GenerateRecord> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<GenerateRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                // One bad line must not kill an otherwise healthy stream.
                self.skipped += 1;
                warn!("skipping malformed record: {e}");
                None
            }
        }
    }

    /// Decode as much of the buffered bytes as is valid UTF-8,
    /// retaining a trailing incomplete multi-byte sequence for the
    /// next call. Genuinely invalid bytes become U+FFFD.
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.utf8_carry.extend_from_slice(chunk);
        let mut result = String::new();

        loop {
            match std::str::from_utf8(&self.utf8_carry) {
                Ok(s) => {
                    result.push_str(s);
                    self.utf8_carry.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if valid_up_to > 0 {
                        // Safety: from_utf8 validated these bytes
                        result.push_str(std::str::from_utf8(&self.utf8_carry[..valid_up_to]).unwrap());
                    }

                    match e.error_len() {
                        None => {
                            // Incomplete sequence at end — keep for next chunk
                            self.utf8_carry.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            result.push('\u{FFFD}');
                            self.utf8_carry.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }

        result
    }
}
