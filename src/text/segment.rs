//! Sentence segmentation over a growing response buffer.
//!
//! The caller owns an append-only buffer and a byte cursor marking how much of
//! it has already been turned into sentences. Each call scans only the text
//! past the cursor, so nothing is ever spoken twice and nothing is skipped,
//! regardless of how the stream happens to split its deltas.

/// Result of one segmentation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmented {
    /// Complete sentences found past the cursor, in order, trimmed and non-empty.
    pub sentences: Vec<String>,
    /// New cursor: byte offset just past the last sentence terminator found.
    /// Equal to the input cursor when no boundary was found.
    pub consumed: usize,
}

/// Split `buffer[consumed..]` into complete sentences.
///
/// A boundary is `.`, `!` or `?` followed by whitespace or the end of the
/// buffer; the terminator belongs to the sentence it ends. Text after the last
/// boundary is left unconsumed for the next call. Abbreviations such as
/// "Dr." are split like any other terminator.
///
/// A cursor past the end of the buffer is clamped to the end; a cursor inside
/// a multi-byte character is moved forward to the next character boundary.
pub fn segment(buffer: &str, consumed: usize) -> Segmented {
    let start = clamp_cursor(buffer, consumed);
    let rest = &buffer[start..];

    let mut sentences = Vec::new();
    let mut sentence_start = 0;

    for (i, c) in rest.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let at_boundary = rest[end..].chars().next().is_none_or(char::is_whitespace);
        if !at_boundary {
            continue;
        }
        let sentence = rest[sentence_start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_owned());
        }
        sentence_start = end;
    }

    Segmented {
        sentences,
        consumed: start + sentence_start,
    }
}

/// Return the unterminated remainder past the cursor as a final sentence.
///
/// Used when the stream ends so a response without closing punctuation is
/// still spoken. Returns `None` when only whitespace remains.
pub fn flush(buffer: &str, consumed: usize) -> Option<String> {
    let start = clamp_cursor(buffer, consumed);
    let remainder = buffer[start..].trim();
    if remainder.is_empty() {
        None
    } else {
        Some(remainder.to_owned())
    }
}

fn clamp_cursor(buffer: &str, consumed: usize) -> usize {
    let mut pos = consumed.min(buffer.len());
    while !buffer.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}
