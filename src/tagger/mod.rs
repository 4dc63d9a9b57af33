//! Tagger interface: `tag_text`/`tag_image` backed by an isolated worker
//! process with per-call timeout, auto-restart/backoff, and an in-process
//! fallback heuristic when the worker is disabled or repeatedly fails.

mod fallback;
mod worker;

pub use worker::WorkerTagger;

use crate::contracts::{Tagger, TaggerOutput};
use async_trait::async_trait;

/// Tagger that tries the worker-backed implementation first and falls back
/// to the in-process heuristic tagger on any error.
pub struct FallbackTagger<T: Tagger> {
    primary: Option<T>,
    fallback: fallback::HeuristicTagger,
}

impl<T: Tagger> FallbackTagger<T> {
    pub fn new(primary: Option<T>) -> Self {
        Self {
            primary,
            fallback: fallback::HeuristicTagger,
        }
    }
}

#[async_trait]
impl<T: Tagger + Send + Sync> Tagger for FallbackTagger<T> {
    async fn classify(&self, cid: &str, mime: Option<&str>, sample: &[u8]) -> anyhow::Result<TaggerOutput> {
        if let Some(primary) = &self.primary {
            if let Ok(result) = primary.classify(cid, mime, sample).await {
                return Ok(result);
            }
        }
        self.fallback.classify(cid, mime, sample).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Tagger;

    struct AlwaysFails;

    #[async_trait]
    impl Tagger for AlwaysFails {
        async fn classify(&self, _cid: &str, _mime: Option<&str>, _sample: &[u8]) -> anyhow::Result<TaggerOutput> {
            Err(anyhow::anyhow!("worker down"))
        }
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_on_primary_failure() {
        let tagger = FallbackTagger::new(Some(AlwaysFails));
        let result = tagger.classify("cid1", Some("text/plain"), b"hello world").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn uses_fallback_directly_when_no_primary_configured() {
        let tagger: FallbackTagger<AlwaysFails> = FallbackTagger::new(None);
        let result = tagger.classify("cid1", Some("text/plain"), b"hello world").await;
        assert!(result.is_ok());
    }
}
