//! Incremental sentence segmentation
//!
//! Consumes response text as it streams in and emits complete, speakable
//! sentence units. Markup that cannot be spoken is rewritten first:
//! hyperlinks collapse to their label plus a spoken pointer, and fenced
//! or inline code is replaced by a fixed placeholder. No sentence
//! boundary is ever emitted inside an open code fence.

use std::sync::LazyLock;

use regex::Regex;

/// Spoken stand-in for a hyperlink target
pub const LINK_PLACEHOLDER: &str = "You can find the link in the text output.";

/// Spoken stand-in for code content
pub const CODE_PLACEHOLDER: &str = "You can find the source code in the text output.";

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(https?://[^\s)]+\)").expect("link regex"));

static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"``[^`]+``").expect("inline code regex"));

// Prices like "66.842 USD" or "1,299 EUR"; their internal punctuation
// must never be taken for a sentence boundary
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:[.,]\d{3})* (?:USD|EUR)\b").expect("price regex"));

/// One complete, speakable span of response text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    /// Gap-free, strictly increasing per turn
    pub sequence: u64,

    /// Sentence text after markup rewriting
    pub text: String,

    /// False when the trimmed text is empty; such units keep their
    /// place in the sequence but are never synthesized
    pub speakable: bool,
}

/// Incremental sentence segmenter carrying the text buffer and fence state
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    in_code_block: bool,
    next_sequence: u64,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return any sentence units it completes
    pub fn push(&mut self, fragment: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        loop {
            let buffer = std::mem::take(&mut self.buffer);
            let (sentence, rest, in_code) = next_sentence(&buffer, self.in_code_block);
            self.buffer = rest;
            self.in_code_block = in_code;

            match sentence {
                Some(text) => units.push(self.emit(text)),
                None => break,
            }
        }
        units
    }

    /// Flush any remaining partial text as a final unit
    #[must_use]
    pub fn finish(mut self) -> Option<SentenceUnit> {
        let buffer = std::mem::take(&mut self.buffer);
        let (processed, _) = rewrite_special(&buffer, self.in_code_block);
        let trimmed = processed.trim();
        if trimmed.is_empty() {
            return None;
        }
        let text = trimmed.to_string();
        Some(self.emit(text))
    }

    fn emit(&mut self, text: String) -> SentenceUnit {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let speakable = !text.trim().is_empty();
        tracing::debug!(sequence, speakable, text = %text, "sentence unit");
        SentenceUnit {
            sequence,
            text,
            speakable,
        }
    }
}

/// Extract the next complete sentence from the buffer
///
/// Returns `(sentence_or_none, remaining_buffer, in_code_block)`. While
/// a code fence is open no sentence is produced; consumed code content
/// has already been replaced by [`CODE_PLACEHOLDER`].
fn next_sentence(buffer: &str, in_code_block: bool) -> (Option<String>, String, bool) {
    let (processed, in_code) = rewrite_special(buffer, in_code_block);

    if in_code {
        return (None, processed, true);
    }

    match find_sentence_end(&processed) {
        Some(end) => {
            let sentence = processed[..end].trim().to_string();
            let rest = processed[end..].trim_start().to_string();
            (Some(sentence), rest, false)
        }
        None => (None, processed, false),
    }
}

/// Rewrite links and code spans into spoken placeholders
///
/// Handles at most one fence transition per call; the segmenter loops
/// until the buffer is stable.
fn rewrite_special(text: &str, in_code_block: bool) -> (String, bool) {
    let mut text = LINK_RE
        .replace_all(text, format!("$1 ({LINK_PLACEHOLDER})").as_str())
        .into_owned();
    let mut in_code = in_code_block;

    if in_code {
        match text.find("```") {
            Some(end) => {
                text = format!("{CODE_PLACEHOLDER}{}", &text[end + 3..]);
                in_code = false;
            }
            None => {
                text = CODE_PLACEHOLDER.to_string();
            }
        }
    } else if let Some(start) = text.find("```") {
        let after_open = &text[start + 3..];
        match after_open.find("```") {
            Some(end) => {
                text = format!(
                    "{}{CODE_PLACEHOLDER}{}",
                    &text[..start],
                    &after_open[end + 3..]
                );
            }
            None => {
                text = format!("{}{CODE_PLACEHOLDER}", &text[..start]);
                in_code = true;
            }
        }
    }

    if !in_code {
        text = INLINE_CODE_RE
            .replace_all(&text, CODE_PLACEHOLDER)
            .into_owned();
    }

    (text, in_code)
}

/// Byte index just past the first sentence-terminal mark, if any
///
/// A mark ends a sentence only when followed by whitespace or the end of
/// the buffer, and only when it does not sit inside a price span.
fn find_sentence_end(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let terminal = text[end..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if terminal && !inside_price(text, i) {
            return Some(end);
        }
    }
    None
}

fn inside_price(text: &str, index: usize) -> bool {
    PRICE_RE
        .find_iter(text)
        .any(|m| m.start() <= index && index < m.end())
}
