//! Sentence flush policy — decides when accumulated generated text is
//! ready to hand to speech synthesis.

use voxflow_core::config::SentenceConfig;

/// Accumulates revealed text and yields sentence units.
///
/// A flush happens when the buffer ends on sentence-terminating punctuation,
/// when it reaches both the character and word minimums, or when it exceeds
/// the force-flush ceiling (bounding one pathological run-on sentence). The
/// first sentence of a turn uses a lower word minimum to keep
/// time-to-first-audio low.
pub struct SentenceBuffer {
    config: SentenceConfig,
    buf: String,
    flushed_any: bool,
}

impl SentenceBuffer {
    pub fn new(config: SentenceConfig) -> Self {
        Self {
            config,
            buf: String::new(),
            flushed_any: false,
        }
    }

    /// Append revealed text, returning every sentence that became ready.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut ready = Vec::new();
        for c in text.chars() {
            self.buf.push(c);
            if self.should_flush() {
                if let Some(sentence) = self.take() {
                    ready.push(sentence);
                }
            }
        }
        ready
    }

    /// Drain whatever remains after the generator is exhausted.
    pub fn flush_remaining(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let sentence = self.buf.trim().to_string();
        self.buf.clear();
        if sentence.is_empty() {
            None
        } else {
            self.flushed_any = true;
            Some(sentence)
        }
    }

    fn should_flush(&self) -> bool {
        let chars = self.buf.trim().chars().count();
        if chars == 0 {
            return false;
        }
        if chars >= self.config.force_flush_chars {
            return true;
        }

        let words = self.buf.split_whitespace().count();
        let min_words = if self.flushed_any {
            self.config.min_words
        } else {
            self.config.first_sentence_min_words
        };

        if self.ends_on_terminator() && words >= min_words {
            return true;
        }

        // Length rule: only at a word boundary, so a long unpunctuated
        // stretch is cut between words rather than inside one.
        self.buf.ends_with(char::is_whitespace)
            && chars >= self.config.min_chars
            && words >= self.config.min_words
    }

    fn ends_on_terminator(&self) -> bool {
        let Some(last) = self.buf.trim_end().chars().last() else {
            return false;
        };
        match last {
            '.' | '!' | '?' => true,
            ';' | ':' => !self.config.strict_punctuation,
            _ => false,
        }
    }
}
