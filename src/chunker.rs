//! Splits outbound replies into transport-sized segments.
//!
//! Deliberately dumb: consecutive hard cuts at the character limit, mid-word
//! if that is where the limit falls. Concatenating the chunks always
//! reproduces the input exactly. Counting is by Unicode scalar values, never
//! bytes, so a multi-byte character is never torn apart.

/// Split `text` into ordered chunks of at most `max_chars` characters.
///
/// Empty input yields a single empty chunk: a reply is always at least one
/// deliverable unit, and the caller substitutes fallback text for blanks
/// before anything reaches the wire.
#[must_use]
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    assert!(max_chars > 0, "chunk size must be at least 1");

    if text.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for ch in text.chars() {
        if current_len == max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.push(ch);
        current_len += 1;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
