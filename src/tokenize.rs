//! Tokenization and topic derivation shared by every content-analyzer branch.
//!
//! Pipeline: NFKD de-accent -> ASCII fold -> lowercase -> strip non-`[a-z0-9]`
//! -> split on whitespace -> length/charset filter -> stopword removal.

use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

const MAX_TOKENS_PER_SOURCE: usize = 256;
const GENERIC_TOPICS: &[&str] = &["file", "data", "content"];

const STOPWORDS_EN: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "has", "was", "this", "that",
    "with", "from", "your", "have", "more", "will", "about", "page", "home", "just", "also",
    "into", "than", "then", "they", "them", "what", "when", "where", "which", "who", "how",
];

const STOPWORDS_FR: &[&str] = &[
    "les", "des", "une", "pour", "dans", "sur", "avec", "sont", "mais", "pas", "vous", "tout",
    "plus", "cette", "leur", "nous", "que", "qui", "est", "aux",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Fr,
}

fn stopwords(lang: Lang) -> &'static [&'static str] {
    match lang {
        Lang::En => STOPWORDS_EN,
        Lang::Fr => STOPWORDS_FR,
    }
}

/// Normalize one input string into a lowercase ASCII string with only
/// `[a-z0-9 ]` characters, ready for whitespace splitting.
fn fold(input: &str) -> String {
    let nfkd: String = input.nfkd().collect();
    nfkd.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c.is_whitespace() {
                ' '
            } else {
                ' '
            }
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect()
}

/// Tokenize a source string into counted tokens, capped at
/// `MAX_TOKENS_PER_SOURCE` distinct tokens (counts beyond the cap on
/// already-seen tokens still accumulate).
pub fn tokenize(input: &str, lang: Lang) -> HashMap<String, u32> {
    let folded = fold(input);
    let stop = stopwords(lang);
    let mut counts: HashMap<String, u32> = HashMap::new();

    for word in folded.split_whitespace() {
        if word.len() < 3 {
            continue;
        }
        if !word.chars().all(|c| c.is_ascii_lowercase()) {
            continue;
        }
        if stop.contains(&word) {
            continue;
        }
        if counts.len() >= MAX_TOKENS_PER_SOURCE && !counts.contains_key(word) {
            continue;
        }
        *counts.entry(word.to_string()).or_insert(0) += 1;
    }

    counts
}

/// Derive up to five topics from a token-count map: sort by `(count desc,
/// token asc)`, drop generic filler words, take the first five.
pub fn derive_topics(counts: &HashMap<String, u32>) -> Vec<String> {
    let mut entries: Vec<(&String, &u32)> = counts
        .iter()
        .filter(|(token, _)| !GENERIC_TOPICS.contains(&token.as_str()))
        .collect();

    entries.sort_by(|(a_tok, a_count), (b_tok, b_count)| {
        b_count.cmp(a_count).then_with(|| a_tok.cmp(b_tok))
    });

    entries
        .into_iter()
        .take(5)
        .map(|(token, _)| token.clone())
        .collect()
}

/// Select the top-N tokens for the inverted index, sorted by `(count desc,
/// token asc)`, filtered to the `[a-z0-9]{3,}` index charset with count > 0.
pub fn top_tokens_for_index(counts: &HashMap<String, u32>, cap: usize) -> Vec<(String, u32)> {
    let mut entries: Vec<(String, u32)> = counts
        .iter()
        .filter(|(token, count)| {
            **count > 0
                && token.len() >= 3
                && token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
        .map(|(t, c)| (t.clone(), *c))
        .collect();

    entries.sort_by(|(a_tok, a_count), (b_tok, b_count)| {
        b_count.cmp(a_count).then_with(|| a_tok.cmp(b_tok))
    });
    entries.truncate(cap);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_de_accents_folds_and_filters() {
        let counts = tokenize("Café Café résumé data the", Lang::En);
        assert_eq!(counts.get("cafe"), Some(&2));
        assert_eq!(counts.get("resume"), Some(&1));
        assert!(!counts.contains_key("the"));
        assert!(counts.contains_key("data"));
    }

    #[test]
    fn tokenize_drops_short_and_numeric_tokens() {
        let counts = tokenize("ab abc 123 lorem ipsum", Lang::En);
        assert!(!counts.contains_key("ab"));
        assert!(!counts.contains_key("123"));
        assert!(counts.contains_key("abc"));
        assert!(counts.contains_key("lorem"));
    }

    #[test]
    fn derive_topics_sorts_by_count_then_lexically_and_excludes_generic() {
        let mut counts = HashMap::new();
        counts.insert("rust".to_string(), 5);
        counts.insert("tutorial".to_string(), 5);
        counts.insert("async".to_string(), 3);
        counts.insert("data".to_string(), 100);
        let topics = derive_topics(&counts);
        assert_eq!(topics, vec!["rust", "tutorial", "async"]);
    }

    #[test]
    fn top_tokens_for_index_caps_and_sorts() {
        let mut counts = HashMap::new();
        for i in 0..10 {
            counts.insert(format!("tok{i}"), (10 - i) as u32);
        }
        let top = top_tokens_for_index(&counts, 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].0, "tok0");
        assert_eq!(top[0].1, 10);
    }

    #[test]
    fn top_tokens_for_index_excludes_invalid_charset() {
        let mut counts = HashMap::new();
        counts.insert("ab".to_string(), 5);
        counts.insert("valid".to_string(), 5);
        let top = top_tokens_for_index(&counts, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "valid");
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn tokenize_never_panics_on_arbitrary_input(input in ".*") {
            let counts = tokenize(&input, Lang::En);
            for token in counts.keys() {
                prop_assert!(token.len() >= 3);
                prop_assert!(token.chars().all(|c| c.is_ascii_lowercase()));
            }
        }

        #[test]
        fn top_tokens_for_index_never_exceeds_cap(cap in 0usize..20) {
            let mut counts = HashMap::new();
            for i in 0..30 {
                counts.insert(format!("token{i}"), i as u32 + 1);
            }
            let top = top_tokens_for_index(&counts, cap);
            prop_assert!(top.len() <= cap);
        }
    }
}
