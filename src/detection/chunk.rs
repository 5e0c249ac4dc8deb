//! Splitting long texts into detector-sized chunks.

/// Characters treated as sentence ends when choosing a chunk boundary
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';'];

/// Split `text` into chunks of at most `max_chars` characters
///
/// Each chunk ends after the last sentence-ending punctuation inside its
/// window when there is one, otherwise exactly at the window edge. Returns
/// `(byte_offset, chunk)` pairs that concatenate back to `text`.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        let window_end = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => start + idx,
            None => {
                chunks.push((start, rest));
                break;
            }
        };

        let cut = text[start..window_end]
            .char_indices()
            .filter(|(_, c)| SENTENCE_ENDINGS.contains(c))
            .last()
            .map(|(idx, c)| start + idx + c.len_utf8())
            .unwrap_or(window_end);

        chunks.push((start, &text[start..cut]));
        start = cut;
    }

    chunks
}
