use super::*;
use crate::math::{cosine_similarity, magnitude};

#[test]
fn output_has_fixed_dimension_and_unit_norm() {
    let embedder = LocalEmbedder::new();
    let vector = embedder.embed_text("Paris is the capital of France.");
    assert_eq!(vector.len(), LOCAL_DIMENSION);
    assert!((magnitude(&vector) - 1.0).abs() < 1e-5);
}

#[test]
fn embedding_is_deterministic() {
    let embedder = LocalEmbedder::new();
    let text = "The Eiffel Tower is in Paris.";
    assert_eq!(embedder.embed_text(text), embedder.embed_text(text));
    assert_eq!(embedder.embed_text(text), LocalEmbedder::new().embed_text(text));
}

#[test]
fn empty_and_stop_word_text_is_the_zero_vector() {
    let embedder = LocalEmbedder::new();
    for text in ["", "   ", "the of and is", "?!"] {
        let vector = embedder.embed_text(text);
        assert_eq!(vector.len(), LOCAL_DIMENSION);
        assert!(vector.iter().all(|&x| x == 0.0), "{text:?} should embed to zero");
    }
}

#[test]
fn case_and_punctuation_do_not_matter() {
    let embedder = LocalEmbedder::new();
    assert_eq!(
        embedder.embed_text("Eiffel Tower!"),
        embedder.embed_text("eiffel, tower")
    );
}

#[test]
fn shared_vocabulary_scores_higher() {
    let embedder = LocalEmbedder::new();
    let query = embedder.embed_text("Where is the Eiffel Tower?");
    let capital = embedder.embed_text("Paris is the capital of France.");
    let tower = embedder.embed_text("The Eiffel Tower is in Paris.");

    let to_capital = cosine_similarity(&query, &capital).expect("same dimension");
    let to_tower = cosine_similarity(&query, &tower).expect("same dimension");
    assert!(to_tower > to_capital, "{to_tower} <= {to_capital}");
    assert!(to_tower > 0.5);
}

#[test]
fn tokenize_drops_stop_words() {
    assert_eq!(
        tokenize("Where is the Eiffel Tower?"),
        vec!["eiffel".to_string(), "tower".to_string()]
    );
}
