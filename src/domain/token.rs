// ============================================================
// Layer 3 — Tokenized-Feature Extraction
// ============================================================
// Splits one whitespace-tokenized corpus line into words, their
// side features, and their character decomposition.
//
// A token looks like:
//
//     word￨feat0￨feat1
//
// where '￨' (U+FFE8) is the reserved feature delimiter. Every
// token on a line must carry the same number of features.
//
// Characters feed the character-level field. Sentinel words such
// as "<unk>" or the literal "N/A" are kept whole as a single unit
// instead of being shredded into '<', 'u', 'n', ...

use crate::domain::errors::{PipelineError, Result};

/// Reserved glyph separating a word from its side features.
pub const FEATURE_DELIMITER: char = '\u{FFE8}';

/// Placeholder word that is never split into characters.
pub const NOT_AVAILABLE: &str = "N/A";

/// The decomposed content of one corpus line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedLine {
    pub words: Vec<String>,
    /// Column-major: `features[j][i]` is feature `j` of word `i`.
    pub features: Vec<Vec<String>>,
    /// Features per token, or `None` for an empty line.
    pub feature_count: Option<usize>,
    /// One entry per word; each entry is that word's character units.
    pub chars: Vec<Vec<String>>,
}

/// Split tokens into words, feature columns and characters.
pub fn extract_text_features<S: AsRef<str>>(tokens: &[S]) -> Result<ExtractedLine> {
    if tokens.is_empty() {
        return Ok(ExtractedLine::default());
    }

    let split: Vec<Vec<&str>> = tokens
        .iter()
        .map(|t| t.as_ref().split(FEATURE_DELIMITER).collect::<Vec<_>>())
        .filter(|parts| !parts[0].is_empty())
        .collect();

    let Some(first) = split.first() else {
        return Ok(ExtractedLine::default());
    };
    let token_size = first.len();

    if let Some(bad) = split.iter().find(|parts| parts.len() != token_size) {
        return Err(PipelineError::InconsistentFeatureCount {
            expected: token_size - 1,
            found:    bad.len() - 1,
            token:    bad.join(&FEATURE_DELIMITER.to_string()),
        });
    }

    let words: Vec<String> = split.iter().map(|parts| parts[0].to_string()).collect();
    let features: Vec<Vec<String>> = (1..token_size)
        .map(|j| split.iter().map(|parts| parts[j].to_string()).collect())
        .collect();
    let chars = words.iter().map(|w| char_units(w)).collect();

    Ok(ExtractedLine {
        words,
        features,
        feature_count: Some(token_size - 1),
        chars,
    })
}

/// Character units of one word; sentinels stay whole.
pub fn char_units(word: &str) -> Vec<String> {
    let trimmed = word.trim();
    if is_sentinel(trimmed) {
        vec![trimmed.to_string()]
    } else {
        trimmed.chars().map(|c| c.to_string()).collect()
    }
}

/// `N/A`, or anything opening with '<' that closes with a later '>'.
fn is_sentinel(word: &str) -> bool {
    word == NOT_AVAILABLE
        || word
            .strip_prefix('<')
            .is_some_and(|rest| rest.contains('>'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_have_no_features() {
        let line = extract_text_features(&["the", "cat"]).unwrap();
        assert_eq!(line.words, vec!["the", "cat"]);
        assert!(line.features.is_empty());
        assert_eq!(line.feature_count, Some(0));
        assert_eq!(line.chars[1], vec!["c", "a", "t"]);
    }

    #[test]
    fn test_features_are_split_into_columns() {
        let tokens = ["a\u{FFE8}N\u{FFE8}x", "b\u{FFE8}V\u{FFE8}y"];
        let line = extract_text_features(&tokens).unwrap();
        assert_eq!(line.words, vec!["a", "b"]);
        assert_eq!(line.feature_count, Some(2));
        assert_eq!(line.features[0], vec!["N", "V"]);
        assert_eq!(line.features[1], vec!["x", "y"]);
    }

    #[test]
    fn test_inconsistent_feature_count_fails() {
        let tokens = ["a\u{FFE8}N", "b"];
        let err = extract_text_features(&tokens).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InconsistentFeatureCount { expected: 1, found: 0, .. }
        ));
    }

    #[test]
    fn test_empty_line_uses_sentinel() {
        let empty: [&str; 0] = [];
        let line = extract_text_features(&empty).unwrap();
        assert!(line.words.is_empty());
        assert!(line.chars.is_empty());
        assert_eq!(line.feature_count, None);
    }

    #[test]
    fn test_sentinels_are_not_shredded() {
        assert_eq!(char_units("<unk>"), vec!["<unk>"]);
        assert_eq!(char_units(" N/A "), vec!["N/A"]);
        assert_eq!(char_units("<x"), vec!["<", "x"]);
        assert_eq!(char_units("ab"), vec!["a", "b"]);
    }
}
