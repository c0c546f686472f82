//! Incremental extraction of JSON values from an append-only byte stream
//!
//! The agent writes one JSON object per line, but pipes deliver arbitrary
//! chunks and the CLI occasionally interleaves non-JSON noise. The decoder
//! tracks bracket depth and string state across calls so a value split over
//! several reads still decodes, and anything outside a balanced value is
//! skipped.

/// Default maximum size of one pending value (1MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Restartable JSON value extractor
///
/// Structural characters are ASCII, so scanning bytes is safe even when a
/// chunk boundary splits a multi-byte UTF-8 sequence.
#[derive(Debug)]
pub struct StreamDecoder {
    /// Bytes of the candidate being assembled (empty when idle)
    pending: Vec<u8>,
    depth: usize,
    in_string: bool,
    escape: bool,
    /// The current value overflowed; scan it to its end without buffering
    skipping: bool,
    max_buffer_size: usize,
    discarded: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl StreamDecoder {
    /// Create a decoder that drops any single value larger than `max_buffer_size`
    #[must_use]
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            depth: 0,
            in_string: false,
            escape: false,
            skipping: false,
            max_buffer_size,
            discarded: 0,
        }
    }

    /// Feed a chunk and return every value completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        let mut values = Vec::new();

        for &byte in chunk {
            if self.depth == 0 {
                // Idle: skip noise until a value opens
                if byte == b'{' || byte == b'[' {
                    self.pending.push(byte);
                    self.depth = 1;
                }
                continue;
            }

            if !self.skipping {
                self.pending.push(byte);
                if self.pending.len() > self.max_buffer_size {
                    log::warn!(
                        "Dropping JSON value exceeding maximum buffer size of {} bytes",
                        self.max_buffer_size
                    );
                    self.discarded += 1;
                    self.pending.clear();
                    self.skipping = true;
                }
            }

            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if byte == b'\\' {
                    self.escape = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if self.skipping {
                            self.reset();
                        } else {
                            self.complete(&mut values);
                        }
                    }
                }
                _ => {}
            }
        }

        values
    }

    /// Convenience wrapper over [`push`](Self::push) for text input
    pub fn push_str(&mut self, chunk: &str) -> Vec<serde_json::Value> {
        self.push(chunk.as_bytes())
    }

    /// Discard any unbalanced remainder, returning it for diagnostics
    ///
    /// Called on teardown; a value that never balanced is never delivered.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            self.reset();
            return None;
        }
        let leftover = String::from_utf8_lossy(&self.pending).into_owned();
        self.reset();
        Some(leftover)
    }

    /// Whether a partial value is currently buffered or being skipped
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.skipping
    }

    /// Number of candidates dropped as malformed or oversized
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn complete(&mut self, values: &mut Vec<serde_json::Value>) {
        match serde_json::from_slice::<serde_json::Value>(&self.pending) {
            Ok(value) => values.push(value),
            Err(e) => {
                log::debug!("Discarding malformed JSON candidate: {}", e);
                self.discarded += 1;
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.depth = 0;
        self.in_string = false;
        self.escape = false;
        self.skipping = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_value_split_across_chunks() {
        let mut decoder = StreamDecoder::default();
        assert!(decoder.push_str(r#"{"type":"assis"#).is_empty());
        assert!(decoder.has_pending());
        let values = decoder.push_str(r#"tant","n":[1,2]}"#);
        assert_eq!(values, vec![json!({"type": "assistant", "n": [1, 2]})]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let mut decoder = StreamDecoder::default();
        let values = decoder.push_str(r#"{"text":"a } ] { [ \" \\"}"#);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["text"], "a } ] { [ \" \\");
    }

    #[test]
    fn skips_noise_between_values() {
        let mut decoder = StreamDecoder::default();
        let values = decoder.push_str("warning: x\n{\"a\":1}\n} stray ]\n[true]\n");
        assert_eq!(values, vec![json!({"a": 1}), json!([true])]);
    }

    #[test]
    fn malformed_candidate_is_discarded_and_scanning_resumes() {
        let mut decoder = StreamDecoder::default();
        let values = decoder.push_str("{bad: value}{\"ok\":true}");
        assert_eq!(values, vec![json!({"ok": true})]);
        assert_eq!(decoder.discarded(), 1);
    }

    #[test]
    fn unbalanced_tail_is_only_returned_by_flush() {
        let mut decoder = StreamDecoder::default();
        assert!(decoder.push_str(r#"{"a":{"b":1}"#).is_empty());
        assert_eq!(decoder.flush().as_deref(), Some(r#"{"a":{"b":1}"#));
        assert!(decoder.flush().is_none());
        assert!(decoder.push_str("}").is_empty());
    }

    #[test]
    fn oversized_value_is_dropped() {
        let mut decoder = StreamDecoder::new(16);
        let values = decoder.push_str(r#"{"a":"0123456789abcdef"}{"b":1}"#);
        assert_eq!(values, vec![json!({"b": 1})]);
        assert_eq!(decoder.discarded(), 1);
    }

    #[test]
    fn oversized_value_does_not_leak_nested_values() {
        let mut decoder = StreamDecoder::new(24);
        let values =
            decoder.push_str(r#"{"pad":"0123456789abcdefgh","inner":{"type":"x"}}"#);
        assert!(values.is_empty());
        assert_eq!(decoder.discarded(), 1);
        assert!(!decoder.has_pending());

        // Overflow split across chunks, string braces included
        let mut decoder = StreamDecoder::new(8);
        assert!(decoder.push_str(r#"{"a":"}}}} ["#).is_empty());
        assert!(decoder.has_pending());
        assert!(decoder.push_str(r#"","b":[{"c":1}]}"#).is_empty());
        assert_eq!(decoder.push_str(r#"{"d":2}"#), vec![json!({"d": 2})]);
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let text = r#"{"t":"héllo ✓"}"#.as_bytes();
        let mut decoder = StreamDecoder::default();
        let mut values = Vec::new();
        for byte in text {
            values.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(values, vec![json!({"t": "héllo ✓"})]);
    }
}
