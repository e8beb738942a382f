//! Sentence segmentation for generated narration text
//!
//! `split_sentences` is pure: given the accumulated text and how far it has
//! already been consumed, it returns the complete sentences after the cursor
//! and the new cursor. Calling it again with the same text and the returned
//! cursor yields nothing new, so no sentence is ever emitted twice.

/// Sentence-final punctuation (full-width and ASCII)
const TERMINALS: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';', '…'];

/// Closing marks that belong to the sentence they follow
const CLOSERS: &[char] = &['”', '’', ')', '）', '」', '』', '】', '》'];

/// Quotes that open and close alike; only closing when a break follows
const AMBIGUOUS_QUOTES: &[char] = &['"', '\''];

/// Result of one segmentation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmented<'a> {
    /// Complete sentences, in order, each ending with its punctuation
    pub sentences: Vec<&'a str>,

    /// Byte offset of the first unconsumed character
    pub cursor: usize,
}

impl<'a> Segmented<'a> {
    /// The unterminated tail left after the last complete sentence
    pub fn remainder(&self, text: &'a str) -> &'a str {
        &text[self.cursor..]
    }
}

/// Split `text[cursor..]` into complete sentences.
///
/// A sentence ends at a run of terminal punctuation plus any closing quotes or
/// brackets directly after it. An ASCII `.` between two digits is a decimal
/// point, not a terminal. A straight quote is only taken as closing when
/// whitespace, more closing punctuation or the end of the text follows it.
pub fn split_sentences(text: &str, cursor: usize) -> Segmented<'_> {
    let cursor = clamp_to_boundary(text, cursor);
    let mut sentences = Vec::new();
    let mut start = cursor;

    let mut chars = text[cursor..].char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        let idx = cursor + offset;
        if !is_terminal(text, idx, ch) {
            continue;
        }

        let mut end = idx + ch.len_utf8();
        while let Some(&(next_offset, next)) = chars.peek() {
            let next_idx = cursor + next_offset;
            if TERMINALS.contains(&next) || CLOSERS.contains(&next) || closes_quote(text, next_idx, next) {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        sentences.push(&text[start..end]);
        start = end;
    }

    Segmented {
        sentences,
        cursor: start,
    }
}

/// Every piece of `text` in emission order: complete sentences followed by the
/// unterminated tail (if it holds anything besides whitespace).
///
/// The tail is emitted once, as a final sentence, so no generated content is
/// dropped when generation ends mid-sentence.
pub fn sentences_with_tail(text: &str) -> Vec<&str> {
    let segmented = split_sentences(text, 0);
    let tail = segmented.remainder(text);

    let mut pieces = segmented.sentences;
    if !tail.trim().is_empty() {
        pieces.push(tail);
    }
    pieces
}

fn is_terminal(text: &str, idx: usize, ch: char) -> bool {
    if !TERMINALS.contains(&ch) {
        return false;
    }
    if ch != '.' {
        return true;
    }

    let before = text[..idx].chars().next_back();
    let after = text[idx + 1..].chars().next();
    !matches!((before, after), (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit())
}

fn closes_quote(text: &str, idx: usize, ch: char) -> bool {
    if !AMBIGUOUS_QUOTES.contains(&ch) {
        return false;
    }
    match text[idx + ch.len_utf8()..].chars().next() {
        None => true,
        Some(after) => {
            after.is_whitespace()
                || TERMINALS.contains(&after)
                || CLOSERS.contains(&after)
                || AMBIGUOUS_QUOTES.contains(&after)
        }
    }
}

fn clamp_to_boundary(text: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(text.len());
    while !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}
