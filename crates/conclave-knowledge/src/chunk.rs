//! Splitting document text into overlapping passages

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Split `text` into chunks of at most `chunk_size` characters, each
/// starting `chunk_overlap` characters before the previous one ended.
///
/// Breaks prefer a paragraph boundary, then a line break, then a space, as
/// long as that keeps the chunk at least half full. Chunks are trimmed and
/// empty ones are dropped.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size - 1);
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            break_point(&chars[start..hard_end]).map_or(hard_end, |b| start + b)
        };

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end == chars.len() {
            break;
        }
        // Always move forward, even when the overlap would cover the chunk
        start = end.saturating_sub(chunk_overlap).max(start + 1);
    }
    chunks
}

/// Offset just past the best separator in the back half of `window`
fn break_point(window: &[char]) -> Option<usize> {
    let min = window.len() / 2;
    let find = |pred: &dyn Fn(usize) -> bool| {
        (min..window.len()).rev().find(|&i| pred(i)).map(|i| i + 1)
    };

    find(&|i| i > 0 && window[i] == '\n' && window[i - 1] == '\n')
        .or_else(|| find(&|i| window[i] == '\n'))
        .or_else(|| find(&|i| window[i].is_whitespace()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_text("  hello world  ", 100, 10), vec!["hello world"]);
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text("   \n\n ", 100, 10).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = "word ".repeat(500);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn test_chunks_overlap() {
        let text: String = (0..60).map(|i| format!("w{:02} ", i)).collect();
        let chunks = split_text(&text, 40, 12);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].split_whitespace().last().unwrap().to_string();
            assert!(pair[1].contains(&tail), "{:?} does not overlap {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_text(&text, 40, 0);
        assert_eq!(chunks[0], "a".repeat(30));
        assert_eq!(chunks[1], "b".repeat(30));
    }

    #[test]
    fn test_unbroken_text_is_cut_hard() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
    }

    #[test]
    fn test_oversized_overlap_still_terminates() {
        let chunks = split_text(&"abc ".repeat(20), 5, 50);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_multibyte_text() {
        let text = "héllo wörld ".repeat(20);
        let chunks = split_text(&text, 30, 5);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }
}
