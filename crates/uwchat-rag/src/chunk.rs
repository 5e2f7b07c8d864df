/// Maximum chunk length in characters. The unit stored and retrieved from
/// the vector index; re-ingestion mints new chunk ids rather than mutating
/// existing ones.
pub const CHUNK_SIZE: usize = 1000;

/// Split text into fixed-width, non-overlapping slices of at most
/// `CHUNK_SIZE` characters. Slicing is purely positional with no
/// sentence or word awareness; concatenating the result reconstructs the
/// input exactly.
pub fn split_fixed(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(CHUNK_SIZE)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_fixed("").is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        let chunks = split_fixed("hello world");
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn concatenation_reconstructs_input() {
        let text = "abc".repeat(1200);
        let chunks = split_fixed(&text);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn every_chunk_respects_the_size_limit() {
        let text = "x".repeat(2500);
        let chunks = split_fixed(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= CHUNK_SIZE));
        assert_eq!(chunks[2].chars().count(), 500);
    }

    #[test]
    fn splits_on_char_boundaries_for_multibyte_text() {
        let text = "日本語のテキスト".repeat(300);
        let chunks = split_fixed(&text);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= CHUNK_SIZE));
    }
}
