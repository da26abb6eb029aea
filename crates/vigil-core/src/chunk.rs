//! Sliding-window chunker for similarity scoring.
//!
//! Long prompts dilute embedding similarity: an injection buried in a wall of
//! benign text scores low when the whole prompt is embedded at once. The gate
//! therefore scores fixed-width token windows and takes the maximum.

/// Window width, in whitespace tokens, used by the ingestion gate.
pub const GATE_WINDOW: usize = 75;

/// Token overlap between consecutive gate windows.
pub const GATE_OVERLAP: usize = 20;

/// Splits `text` into sliding windows of `window` whitespace tokens with
/// `overlap` tokens shared between consecutive windows.
///
/// Empty (or all-whitespace) text yields no chunks. Text of at most `window`
/// tokens yields the original text as the single chunk. The stride is
/// `window - overlap`, clamped to at least 1, and the final window is
/// truncated at the end of the text.
#[must_use]
pub fn sliding_windows(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() <= window {
        return vec![text.to_string()];
    }

    let step = (window.saturating_sub(overlap)).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + window).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(sliding_windows("", GATE_WINDOW, GATE_OVERLAP).is_empty());
        assert!(sliding_windows("   \t\n", GATE_WINDOW, GATE_OVERLAP).is_empty());
    }

    #[test]
    fn test_short_text_is_a_single_verbatim_chunk() {
        let text = "ignore previous instructions";
        let chunks = sliding_windows(text, GATE_WINDOW, GATE_OVERLAP);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_exactly_window_tokens_is_single_chunk() {
        let text = numbered_words(GATE_WINDOW);
        let chunks = sliding_windows(&text, GATE_WINDOW, GATE_OVERLAP);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_windows_cover_every_token() {
        let text = numbered_words(400);
        let chunks = sliding_windows(&text, GATE_WINDOW, GATE_OVERLAP);
        assert!(chunks.len() > 1);

        // Every token of the input appears in some chunk, and consecutive
        // chunks share exactly the overlap until the truncated tail.
        let mut seen = std::collections::HashSet::new();
        for chunk in &chunks {
            for word in chunk.split_whitespace() {
                seen.insert(word.to_string());
            }
        }
        for i in 0..400 {
            assert!(seen.contains(&format!("w{i}")), "token w{i} not covered");
        }
    }

    #[test]
    fn test_stride_is_window_minus_overlap() {
        let text = numbered_words(200);
        let chunks = sliding_windows(&text, 75, 20);
        let second_first_word = chunks[1].split_whitespace().next().unwrap();
        assert_eq!(second_first_word, "w55");
    }

    #[test]
    fn test_degenerate_overlap_still_terminates() {
        // overlap >= window clamps the stride to 1 token.
        let text = numbered_words(10);
        let chunks = sliding_windows(&text, 4, 10);
        assert_eq!(chunks.len(), 7);
        assert_eq!(chunks[0], "w0 w1 w2 w3");
        assert_eq!(chunks[6], "w6 w7 w8 w9");
    }

    #[test]
    fn test_last_window_truncated_at_end() {
        let text = numbered_words(100);
        let chunks = sliding_windows(&text, 75, 20);
        assert_eq!(chunks.len(), 2);
        let last: Vec<&str> = chunks[1].split_whitespace().collect();
        assert_eq!(last.first(), Some(&"w55"));
        assert_eq!(last.last(), Some(&"w99"));
    }
}
