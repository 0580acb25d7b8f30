//! Clause splitting for mixed-sentiment text.
//!
//! A single pooled embedding of "I was happy but then I got scared" tends to
//! wash out the minority emotion. Splitting on contrastive connectives and
//! sentence terminators lets each clause be scored on its own; the scores
//! are merged later by per-label maximum (see [`crate::decision::max_pool`]).

/// Connectives that start a new clause. Case-sensitive, space-delimited.
const CONNECTIVES: &[&str] = &[" but ", " however "];

/// Fragments shorter than this (in characters, after trimming) are dropped.
pub const MIN_CHUNK_CHARS: usize = 6;

/// Split `text` into independently scorable clauses.
///
/// Cuts on the literal connectives `" but "` and `" however "` and on runs
/// of `.`, `!` or `?`, scanning left to right. Fragments are trimmed and
/// those under [`MIN_CHUNK_CHARS`] are discarded. If nothing survives, the
/// whole input is returned as the only chunk.
pub fn split_into_chunks(text: &str) -> Vec<String> {
    let chunks: Vec<String> = fragments(text)
        .into_iter()
        .map(str::trim)
        .filter(|f| f.chars().count() >= MIN_CHUNK_CHARS)
        .map(str::to_string)
        .collect();

    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

fn fragments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if let Some(conn) = CONNECTIVES.iter().find(|c| rest.starts_with(**c)) {
            out.push(&text[start..i]);
            i += conn.len();
            start = i;
            continue;
        }

        if is_terminal(rest.as_bytes()[0]) {
            out.push(&text[start..i]);
            let run = rest.bytes().take_while(|&b| is_terminal(b)).count();
            i += run;
            start = i;
            continue;
        }

        // Advance by one whole char so slices stay on UTF-8 boundaries.
        i += rest.chars().next().map_or(1, char::len_utf8);
    }

    out.push(&text[start..]);
    out
}

fn is_terminal(b: u8) -> bool {
    matches!(b, b'.' | b'!' | b'?')
}
