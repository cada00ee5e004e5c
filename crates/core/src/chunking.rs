use crate::error::IngestError;
use crate::models::Chunk;

/// Validated sliding-window parameters, measured in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::Configuration(
                "chunk size must be > 0".to_string(),
            ));
        }
        // An overlap as wide as the window would never advance the start.
        if overlap >= chunk_size {
            return Err(IngestError::Configuration(format!(
                "chunk overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Number of chunks [`Chunker::chunk`] yields for a text of `char_len` chars.
    pub fn expected_chunk_count(&self, char_len: usize) -> usize {
        if char_len == 0 {
            0
        } else if char_len <= self.overlap {
            1
        } else {
            (char_len - self.overlap).div_ceil(self.step())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        // Byte position of every char boundary, including the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(position, _)| position)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = boundaries.len() - 1;

        let mut chunks = Vec::with_capacity(self.config.expected_chunk_count(char_len));
        let mut start = 0;
        let mut index = 0u64;

        while start < char_len {
            let end = (start + self.config.chunk_size).min(char_len);
            chunks.push(Chunk {
                index,
                start_offset: start,
                end_offset: end,
                text: text[boundaries[start]..boundaries[end]].to_string(),
                overlap_with_previous: if index == 0 { 0 } else { self.config.overlap },
            });

            if end == char_len {
                break;
            }
            start += self.config.step();
            index += 1;
        }

        chunks
    }
}

pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, IngestError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(Chunker::new(config).chunk(text))
}

/// Rebuilds the source text from an ordered chunk sequence.
pub fn stitch(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    for chunk in chunks {
        text.extend(chunk.text.chars().skip(chunk.overlap_with_previous));
    }
    text
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(len: usize) -> String {
        "abcdefghijklmnopqrstuvwxyz0123456789"
            .chars()
            .cycle()
            .take(len)
            .collect()
    }

    fn spans(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks
            .iter()
            .map(|chunk| (chunk.start_offset, chunk.end_offset))
            .collect()
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn thousand_by_two_hundred_over_2500_chars_yields_three_windows() {
        let text = sample_text(2_500);
        let chunks = chunk(&text, 1_000, 200).expect("valid config");

        assert_eq!(spans(&chunks), vec![(0, 1_000), (800, 1_800), (1_600, 2_500)]);
        assert_eq!(chunks[2].char_len(), 900);
        assert_eq!(chunks[0].overlap_with_previous, 0);
        assert_eq!(chunks[1].overlap_with_previous, 200);
    }

    #[test]
    fn overlap_not_smaller_than_size_is_a_configuration_error() {
        for (size, overlap) in [(10, 10), (10, 11), (1, 1), (0, 0)] {
            let result = chunk("some text", size, overlap);
            assert!(
                matches!(result, Err(IngestError::Configuration(_))),
                "size={size} overlap={overlap}"
            );
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk("", 100, 10).expect("valid config");
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk("tiny", 100, 10).expect("valid config");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "tiny");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 4));
    }

    #[test]
    fn text_shorter_than_overlap_is_one_chunk() {
        let config = ChunkingConfig::new(100, 50).expect("valid config");
        let chunks = Chunker::new(config).chunk("short");
        assert_eq!(chunks.len(), 1);
        assert_eq!(config.expected_chunk_count(5), 1);
    }

    #[test]
    fn chunk_count_matches_formula_around_window_multiples() {
        let config = ChunkingConfig::new(10, 3).expect("valid config");
        let chunker = Chunker::new(config);
        for len in [1, 3, 9, 10, 11, 16, 17, 18, 24, 30, 31, 100] {
            let chunks = chunker.chunk(&sample_text(len));
            assert_eq!(chunks.len(), config.expected_chunk_count(len), "len={len}");
        }
    }

    #[test]
    fn starts_advance_by_step_and_windows_stay_bounded() {
        let config = ChunkingConfig::new(7, 2).expect("valid config");
        let chunks = Chunker::new(config).chunk(&sample_text(53));

        for (position, pair) in chunks.windows(2).enumerate() {
            assert_eq!(pair[1].start_offset, pair[0].start_offset + config.step());
            assert_eq!(pair[1].index, position as u64 + 1);
        }
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.char_len(), 7);
        }
        assert!(chunks.iter().all(|chunk| chunk.char_len() <= 7));
    }

    #[test]
    fn zero_overlap_tiles_the_text() {
        let chunks = chunk("abcdefgh", 3, 0).expect("valid config");
        let texts: Vec<_> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = sample_text(4_321);
        let first = chunk(&text, 512, 64).expect("valid config");
        let second = chunk(&text, 512, 64).expect("valid config");
        assert_eq!(first, second);
    }

    #[test]
    fn stitching_reconstructs_the_source() {
        let text = sample_text(2_777);
        for (size, overlap) in [(1_000, 200), (64, 0), (5, 4), (1, 0)] {
            let chunks = chunk(&text, size, overlap).expect("valid config");
            assert_eq!(stitch(&chunks), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "żółw→ünïcødé🦀 text ".repeat(20);
        let chunks = chunk(&text, 13, 4).expect("valid config");

        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 13));
        assert_eq!(stitch(&chunks), text);
        let last = chunks.last().expect("non-empty");
        assert_eq!(last.end_offset, text.chars().count());
    }
}
