//! Incremental JSON field extractor.
//!
//! The generator emits a structured response like
//! `{"response": "spoken text", "command": "open_app", "args": {...}}`.
//! Waiting for the closing brace before synthesizing would add the model's
//! full generation latency to every utterance, so this extractor reveals the
//! `"response"` field character by character while tokens are still
//! arriving. The whole buffer is retained so a trailing `"command"` field
//! can still be parsed as full JSON after streaming ends.

use tracing::trace;

/// Key of the spoken-text field inside the structured response.
const TEXT_FIELD_KEY: &str = "\"response\"";

/// Key of the machine-actionable command field.
const COMMAND_FIELD_KEY: &str = "\"command\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// The field's key + opening quote has not been located yet.
    Searching,
    /// Inside the field value, decoding escapes.
    InField,
    /// The field's closing quote was seen; further feeds are no-ops.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Decode {
    Normal,
    /// A backslash was seen; the next character selects the escape.
    Escape,
    /// Inside a `\uXXXX` sequence, collecting hex digits.
    Unicode(String),
}

/// Streaming extractor for one generation turn. Not reusable across turns.
pub struct FieldExtractor {
    buffer: String,
    cursor: usize,
    state: ScanState,
    decode: Decode,
    /// A decoded high surrogate waiting for its low half.
    pending_high_surrogate: Option<u16>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            state: ScanState::Searching,
            decode: Decode::Normal,
            pending_high_surrogate: None,
        }
    }

    /// Feed a raw chunk, returning the newly revealed text (possibly empty).
    pub fn feed(&mut self, chunk: &str) -> String {
        if !chunk.is_empty() {
            self.buffer.push_str(chunk);
        }

        match self.state {
            ScanState::Done => String::new(),
            ScanState::Searching => {
                if self.locate_field() {
                    self.scan()
                } else {
                    String::new()
                }
            }
            ScanState::InField => self.scan(),
        }
    }

    /// Finish the turn: flush any unterminated remainder as text and report
    /// whether the whole buffer carries a non-null command field. The
    /// command check is independent of whether the text field completed.
    pub fn finalize(&mut self) -> (String, bool) {
        let remainder = match self.state {
            ScanState::Searching => {
                // The field never appeared. A buffer that does not read as
                // structured JSON is plain text; flush it verbatim.
                let trimmed = self.buffer.trim();
                if trimmed.starts_with('{') {
                    String::new()
                } else {
                    trimmed.to_string()
                }
            }
            // Mid-field content was already revealed by `feed`; a partial
            // trailing escape sequence is dropped.
            ScanState::InField | ScanState::Done => String::new(),
        };
        self.state = ScanState::Done;
        trace!(buffered = self.buffer.len(), "Extractor finalized");
        (remainder, self.has_command())
    }

    /// The full raw buffer, for the post-stream structured parse.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Locate the key, colon, and opening quote. Returns true once the
    /// cursor points at the first value character.
    fn locate_field(&mut self) -> bool {
        let Some(pos) = self.buffer.find(TEXT_FIELD_KEY) else {
            return false;
        };

        let bytes = self.buffer.as_bytes();
        let mut idx = pos + TEXT_FIELD_KEY.len();
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        if idx >= bytes.len() || bytes[idx] != b':' {
            // The colon may simply not have arrived yet.
            return false;
        }
        idx += 1;
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        if idx >= bytes.len() {
            return false;
        }
        if bytes[idx] != b'"' {
            // A non-string value (e.g. null) has no text to reveal.
            self.state = ScanState::Done;
            return false;
        }

        self.cursor = idx + 1;
        self.state = ScanState::InField;
        true
    }

    /// Decode value characters from the cursor onward.
    fn scan(&mut self) -> String {
        let tail = self.buffer[self.cursor..].to_string();
        let mut out = String::new();
        let mut consumed = 0;

        for (i, c) in tail.char_indices() {
            consumed = i + c.len_utf8();
            match &mut self.decode {
                Decode::Normal => {
                    if c == '\\' {
                        self.decode = Decode::Escape;
                    } else if c == '"' {
                        self.flush_pending_surrogate(&mut out);
                        self.state = ScanState::Done;
                        break;
                    } else {
                        self.flush_pending_surrogate(&mut out);
                        out.push(c);
                    }
                }
                Decode::Escape => {
                    if c == 'u' {
                        self.decode = Decode::Unicode(String::new());
                    } else {
                        self.flush_pending_surrogate(&mut out);
                        out.push(match c {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            'b' => '\u{0008}',
                            'f' => '\u{000C}',
                            // `\"`, `\\`, `\/` and anything unrecognized
                            // decode to the character itself.
                            other => other,
                        });
                        self.decode = Decode::Normal;
                    }
                }
                Decode::Unicode(hex) => {
                    hex.push(c);
                    if hex.len() == 4 {
                        let unit = u16::from_str_radix(hex, 16).ok();
                        self.decode = Decode::Normal;
                        self.push_code_unit(unit, &mut out);
                    }
                }
            }
        }

        self.cursor += consumed;
        out
    }

    fn push_code_unit(&mut self, unit: Option<u16>, out: &mut String) {
        let Some(unit) = unit else {
            self.flush_pending_surrogate(out);
            out.push('\u{FFFD}');
            return;
        };

        match unit {
            0xD800..=0xDBFF => {
                // A second high surrogate orphans the first.
                self.flush_pending_surrogate(out);
                self.pending_high_surrogate = Some(unit);
            }
            0xDC00..=0xDFFF => match self.pending_high_surrogate.take() {
                Some(high) => {
                    let combined = 0x10000
                        + ((u32::from(high) - 0xD800) << 10)
                        + (u32::from(unit) - 0xDC00);
                    out.push(char::from_u32(combined).unwrap_or('\u{FFFD}'));
                }
                None => out.push('\u{FFFD}'),
            },
            _ => {
                self.flush_pending_surrogate(out);
                out.push(char::from_u32(u32::from(unit)).unwrap_or('\u{FFFD}'));
            }
        }
    }

    fn flush_pending_surrogate(&mut self, out: &mut String) {
        if self.pending_high_surrogate.take().is_some() {
            out.push('\u{FFFD}');
        }
    }

    /// Whether the buffer contains a non-null `"command"` field. A cheap
    /// scan, not a parse — the buffer may be truncated mid-stream.
    fn has_command(&self) -> bool {
        let Some(pos) = self.buffer.find(COMMAND_FIELD_KEY) else {
            return false;
        };
        let bytes = self.buffer.as_bytes();
        let mut idx = pos + COMMAND_FIELD_KEY.len();
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        if idx >= bytes.len() || bytes[idx] != b':' {
            return false;
        }
        idx += 1;
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        !self.buffer[idx..].starts_with("null")
    }
}
