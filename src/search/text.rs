//! Text normalization for search
//!
//! The platform runs in two languages whose text differs mostly in
//! accents and ligatures, so matching folds diacritics to their ASCII
//! base letter before comparing. Punctuation is dropped, tokens shorter
//! than three characters are ignored.

/// Minimum token length kept for matching
const MIN_TOKEN_LEN: usize = 3;

/// Fold a single character to its unaccented lowercase base form.
///
/// Characters that expand (ß, æ, œ) are handled in `normalize`; this
/// covers the one-to-one mappings.
fn fold_char(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' | 'ã' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Normalize a word: lowercase, fold diacritics, strip non-alphanumerics
pub fn normalize(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    for c in word.to_lowercase().chars() {
        match c {
            'ß' => out.push_str("ss"),
            'æ' => out.push_str("ae"),
            'œ' => out.push_str("oe"),
            c => {
                let folded = fold_char(c);
                if folded.is_alphanumeric() {
                    out.push(folded);
                }
            }
        }
    }
    out
}

/// Tokenize text for search: normalized words of at least three characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize)
        .filter(|word| word.len() >= MIN_TOKEN_LEN)
        .collect()
}

/// Normalize a query string into distinct tokens.
///
/// Deduplication means repeating a term in the query does not change
/// its relevance weight.
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens = tokenize(query);
    tokens.sort();
    tokens.dedup();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_and_punctuation() {
        assert_eq!(normalize("Fräsmaschine!"), "frasmaschine");
        assert_eq!(normalize("COÛT,"), "cout");
        assert_eq!(normalize("qualité"), "qualite");
    }

    #[test]
    fn test_normalize_expanding_ligatures() {
        assert_eq!(normalize("Straße"), "strasse");
        assert_eq!(normalize("œuvre"), "oeuvre");
    }

    #[test]
    fn test_tokenize_drops_short_words() {
        let tokens = tokenize("la réduction de coût");
        assert_eq!(tokens, vec!["reduction".to_string(), "cout".to_string()]);
    }

    #[test]
    fn test_query_tokens_deduplicate() {
        // "soudure soudure robot" scores the same as "soudure robot"
        assert_eq!(
            query_tokens("soudure soudure robot"),
            query_tokens("Soudure robot")
        );
    }

    #[test]
    fn test_diacritic_insensitive_match() {
        // The same word typed with and without accents tokenizes identically
        assert_eq!(tokenize("métrologie"), tokenize("metrologie"));
    }
}
