use super::*;

const SENTENCE: &str = "The quick brown fox jumps over the lazy dog near the river. ";

fn two_paragraph_document() -> String {
    let paragraph = SENTENCE.repeat(10);
    format!("{}\n\n{}", paragraph.trim(), paragraph.trim())
}

fn small_config() -> ChunkingConfig {
    ChunkingConfig {
        max_chunk_size: 500,
        min_chunk_size: 100,
        overlap_size: 50,
    }
}

#[test]
fn empty_and_blank_text_produce_no_chunks() {
    let config = ChunkingConfig::default();
    assert!(chunk_text("", &config).is_empty());
    assert!(chunk_text("   \n\n  \t ", &config).is_empty());
}

#[test]
fn short_text_is_a_single_trimmed_chunk() {
    let text = "  Paris is the capital of France.  \n";
    let chunks = chunk_text(text, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(chunk.text, text.trim());
    assert!(chunk.is_first);
    assert!(chunk.is_last);
    assert_eq!(&text[chunk.start_pos..chunk.end_pos], chunk.text);
    assert_eq!(reconstruct_from_chunks(&chunks), text.trim());
}

#[test]
fn short_multi_paragraph_text_stays_together() {
    let text = "First paragraph.\n\nSecond paragraph.";
    let chunks = chunk_text(text, &ChunkingConfig::default());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
}

#[test]
fn two_paragraph_document_respects_overlap_bound() {
    let document = two_paragraph_document();
    assert!(document.len() > 1100, "document is {} bytes", document.len());

    let config = small_config();
    let chunks = chunk_text(&document, &config);
    assert!(chunks.len() >= 3, "expected several chunks, got {}", chunks.len());

    for pair in chunks.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        assert!(
            current.end_pos <= next.start_pos + config.overlap_size,
            "chunk {} ends at {} but chunk {} starts at {}",
            current.index,
            current.end_pos,
            next.index,
            next.start_pos
        );
        assert!(next.start_pos > current.start_pos);
    }
}

#[test]
fn chunks_are_slices_of_the_original() {
    let document = two_paragraph_document();
    let chunks = chunk_text(&document, &small_config());

    for chunk in &chunks {
        assert_eq!(&document[chunk.start_pos..chunk.end_pos], chunk.text);
        assert!(chunk.text.len() <= 500, "chunk {} is {} bytes", chunk.index, chunk.text.len());
    }
    assert!(chunks[0].is_first);
    assert!(chunks.last().is_some_and(|c| c.is_last));
    assert_eq!(chunks.iter().filter(|c| c.is_first).count(), 1);
    assert_eq!(chunks.iter().filter(|c| c.is_last).count(), 1);
}

#[test]
fn chunks_cover_the_whole_document() {
    let document = two_paragraph_document();
    let chunks = chunk_text(&document, &small_config());

    assert_eq!(chunks[0].start_pos, 0);
    assert_eq!(chunks.last().map(|c| c.end_pos), Some(document.len()));

    let rebuilt = reconstruct_from_chunks(&chunks);
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(squash(&rebuilt), squash(&document));
}

#[test]
fn overlap_begins_on_a_word_boundary() {
    let document = two_paragraph_document();
    let chunks = chunk_text(&document, &small_config());

    for chunk in chunks.iter().skip(1) {
        let before = &document[..chunk.start_pos];
        assert!(
            before.ends_with(char::is_whitespace),
            "chunk {} starts mid-word",
            chunk.index
        );
    }
}

#[test]
fn unbroken_text_is_hard_split() {
    let document = "a".repeat(1200);
    let config = small_config();
    let chunks = chunk_text(&document, &config);

    assert!(chunks.len() >= 3);
    for chunk in &chunks {
        assert!(chunk.text.len() <= config.max_chunk_size);
    }
    let total: usize = chunks.iter().map(|c| c.text.len()).sum();
    assert_eq!(total, document.len());
}

#[test]
fn multibyte_text_is_split_on_char_boundaries() {
    let document = "é".repeat(700);
    let chunks = chunk_text(&document, &small_config());
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.text.chars().all(|c| c == 'é'));
    }
}

#[test]
fn tiny_trailing_piece_is_folded_into_previous_chunk() {
    let config = ChunkingConfig {
        max_chunk_size: 120,
        min_chunk_size: 30,
        overlap_size: 0,
    };
    let text = format!("{}\n\nTail.", "word ".repeat(23).trim());
    assert!(text.len() > config.max_chunk_size);
    let chunks = chunk_text(&text, &config);

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
}
