//! In-process fallback tagger: a pure-Rust keyword/topic heuristic used when
//! the worker-backed tagger is disabled or repeatedly fails.

use crate::contracts::{Tagger, TaggerOutput};
use crate::tokenize::{derive_topics, tokenize, Lang};
use async_trait::async_trait;

pub struct HeuristicTagger;

#[async_trait]
impl Tagger for HeuristicTagger {
    async fn classify(&self, _cid: &str, _mime: Option<&str>, sample: &[u8]) -> anyhow::Result<TaggerOutput> {
        let text = String::from_utf8_lossy(sample);
        let tokens = tokenize(&text, Lang::En);
        let topics = derive_topics(&tokens);
        Ok(TaggerOutput {
            topics,
            tags: Vec::new(),
            lang: Some("en".to_string()),
            confidence: Some(0.4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heuristic_tagger_always_succeeds() {
        let tagger = HeuristicTagger;
        let result = tagger.classify("cid1", None, b"rust async tokio runtime").await.unwrap();
        assert!(result.topics.contains(&"rust".to_string()) || result.topics.contains(&"tokio".to_string()));
        assert_eq!(result.confidence, Some(0.4));
    }
}
