//! Whitespace tokenization
//!
//! [`Whitespacer`] builds sentence and token views from caller-supplied
//! sentences (the `ws_provide` path). [`WhitespaceTokenizer`] is the
//! in-process multi-labeler that segments raw text on its own.

use async_trait::async_trait;

use crate::models::{Labeling, Record, Span};

use super::{AnnotatorBackend, BackendError, BackendIdentity};

/// Source tag of every view produced by whitespace tokenization
pub const WHITESPACE_SOURCE: &str = "whitespacer-1.0";

/// Builds views from pre-segmented input.
///
/// Sentences are joined with a single space to form the raw text, so the
/// offsets below are relative to `sentences.join(" ")`.
pub struct Whitespacer;

impl Whitespacer {
    pub fn raw_text(sentences: &[String]) -> String {
        sentences.join(" ")
    }

    /// One span per supplied sentence
    pub fn sentences(sentences: &[String]) -> Labeling {
        let mut spans = Vec::with_capacity(sentences.len());
        let mut offset = 0;
        for sentence in sentences {
            spans.push(Span::new(offset, offset + sentence.len()));
            offset += sentence.len() + 1;
        }
        Labeling::new(spans, WHITESPACE_SOURCE)
    }

    /// One span per whitespace-separated token of every sentence
    pub fn tokenize(sentences: &[String]) -> Labeling {
        let mut spans = Vec::new();
        let mut offset = 0;
        for sentence in sentences {
            spans.extend(
                token_spans(sentence)
                    .into_iter()
                    .map(|(s, e)| Span::new(offset + s, offset + e)),
            );
            offset += sentence.len() + 1;
        }
        Labeling::new(spans, WHITESPACE_SOURCE)
    }
}

/// Byte ranges of whitespace-separated tokens
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Byte ranges of sentences: a sentence ends at a newline or at `.`, `!`, `?`
/// followed by whitespace
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() && !c.is_whitespace() {
            start = Some(i);
        }
        let Some(s) = start else { continue };

        let next_is_break = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        if c == '\n' {
            spans.push((s, s + text[s..i].trim_end().len()));
            start = None;
        } else if matches!(c, '.' | '!' | '?') && next_is_break {
            spans.push((s, i + c.len_utf8()));
            start = None;
        }
    }
    if let Some(s) = start {
        let end = text.trim_end().len();
        if end > s {
            spans.push((s, end));
        }
    }
    spans
}

/// In-process multi-labeler producing `[sentence, token]`
pub struct WhitespaceTokenizer;

#[async_trait]
impl AnnotatorBackend for WhitespaceTokenizer {
    async fn identity(&self) -> Result<BackendIdentity, BackendError> {
        Ok(BackendIdentity::new("Whitespace Tokenizer", WHITESPACE_SOURCE))
    }

    async fn label_record_multi(&self, record: &Record) -> Result<Vec<Labeling>, BackendError> {
        let text = &record.raw_text;
        let sentences = sentence_spans(text);
        let mut tokens = Vec::new();
        for &(s, e) in &sentences {
            tokens.extend(
                token_spans(&text[s..e])
                    .into_iter()
                    .map(|(ts, te)| Span::new(s + ts, s + te)),
            );
        }

        Ok(vec![
            Labeling::new(
                sentences.into_iter().map(|(s, e)| Span::new(s, e)).collect(),
                WHITESPACE_SOURCE,
            ),
            Labeling::new(tokens, WHITESPACE_SOURCE),
        ])
    }
}
