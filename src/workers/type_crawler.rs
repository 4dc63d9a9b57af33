//! Type crawler: runs the detector and content analyzer over every
//! present-but-undetected CID, synthesizes tags, and rebuilds the token
//! index. Candidates are pulled from a shared list by atomic increment so a
//! bounded pool of workers processes them concurrently without contention
//! on a queue data structure.

use super::WorkerDeps;
use crate::analyzer;
use crate::contracts::{Catalogue, CidRecord, CrawlResult, Tags};
use crate::detector::{self, Verdict};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::tags::{self, SynthesisInput};
use crate::tokenize::top_tokens_for_index;
use crate::types::ValidatedTimestamp;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

pub async fn run_once(deps: WorkerDeps) -> anyhow::Result<()> {
    let ctx = OperationContext::new("type_crawl_tick");

    let candidates = deps
        .store
        .next_crawl_candidates(deps.config.crawl_concurrency * 20)
        .await?;

    log_operation(
        &ctx,
        &Operation::TypeCrawlTick {
            candidates: candidates.len(),
        },
        &Ok(()),
    );

    if candidates.is_empty() {
        return Ok(());
    }

    let candidates = Arc::new(candidates);
    let next = Arc::new(AtomicUsize::new(0));
    let concurrency = deps.config.crawl_concurrency.max(1);

    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let deps = deps.clone();
        let candidates = candidates.clone();
        let next = next.clone();
        handles.push(tokio::spawn(async move {
            let mut indexed = 0i64;
            loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some(candidate) = candidates.get(idx) else {
                    break;
                };
                match crawl_one(&deps, candidate).await {
                    Ok(()) => indexed += 1,
                    Err(err) => {
                        warn!(cid = %candidate.cid, error = %err, "type crawl candidate failed");
                    }
                }
            }
            indexed
        }));
    }

    let mut total_indexed = 0i64;
    for handle in handles {
        total_indexed += handle.await.unwrap_or(0);
    }

    let now = ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;
    deps.store.record_type_crawl(now, total_indexed).await?;
    Ok(())
}

async fn crawl_one(deps: &WorkerDeps, candidate: &CidRecord) -> anyhow::Result<()> {
    let ctx = OperationContext::new("cid_detect");
    let now = ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;

    let verdict = match detector::detect(&deps.config, &deps.gateway, &candidate.cid, None).await {
        Ok(v) => v,
        Err(err) => {
            deps.store
                .record_crawl_error(&candidate.cid, &err.to_string(), now)
                .await?;
            log_operation(
                &ctx,
                &Operation::CidDetect {
                    cid: candidate.cid.clone(),
                    mime: None,
                    confidence: 0.0,
                },
                &Err(anyhow::anyhow!("{err}")),
            );
            return Ok(());
        }
    };

    log_operation(
        &ctx,
        &Operation::CidDetect {
            cid: candidate.cid.clone(),
            mime: verdict.mime.clone(),
            confidence: verdict.confidence,
        },
        &Ok(()),
    );

    let tags = build_tags(deps, &candidate.cid, &verdict).await;

    deps.store
        .record_crawl_result(
            &candidate.cid,
            CrawlResult {
                kind: verdict.kind.clone(),
                size: verdict.size.map(|s| s as i64),
                mime: verdict.mime.clone(),
                ext_guess: verdict.ext_guess.clone(),
                confidence: verdict.confidence,
                source: verdict.source.clone(),
                tags,
            },
            now,
        )
        .await?;

    Ok(())
}

async fn build_tags(deps: &WorkerDeps, cid: &str, verdict: &Verdict) -> Tags {
    let synthesized = tags::synthesize(&SynthesisInput {
        kind: &verdict.kind,
        mime: verdict.mime.as_deref(),
        ext: verdict.ext_guess.as_deref(),
        source: &verdict.source,
        confidence: verdict.confidence,
        size_bytes: verdict.size.map(|s| s as i64),
        container: verdict.container.as_deref(),
        office_subtype: verdict.office_subtype.as_deref(),
    });

    let signals = tags::signals_with_disagreement(verdict.signals.clone(), verdict.disagreement);

    let analysis = if verdict.sample.is_empty() {
        None
    } else {
        analyzer::analyze(verdict, &verdict.sample, None, cid, deps.tagger.as_ref()).await
    };

    let mut out = Tags {
        topics: Vec::new(),
        tokens: Vec::new(),
        content_class: None,
        lang: None,
        confidence: verdict.confidence,
        signals,
        derived_from: None,
        tags: synthesized,
    };

    if let Some(analysis) = analysis {
        out.topics = analysis.topics;
        out.tokens = top_tokens_for_index(&analysis.tokens, deps.config.search_token_index_max_tokens);
        out.content_class = analysis.content_class;
        out.lang = analysis.lang;
        out.confidence = analysis.confidence.max(out.confidence);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::contracts::{GatewaySample, LsEntry, NodeRpc, TaggerOutput};
    use crate::types::ValidatedCid;
    use async_trait::async_trait;

    struct TextGateway;

    #[async_trait]
    impl crate::contracts::GatewayClient for TextGateway {
        async fn head(&self, _cid: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("text/plain".to_string()))
        }

        async fn fetch_range(&self, _cid: &str, _offset: u64, _len: u64) -> anyhow::Result<GatewaySample> {
            let bytes = b"hello world hello catalogue".to_vec();
            Ok(GatewaySample {
                bytes: bytes.clone(),
                content_type: Some("text/plain".to_string()),
                total_size: Some(bytes.len() as u64),
                range_ignored: false,
            })
        }
    }

    struct NoopNodeRpc;

    #[async_trait]
    impl NodeRpc for NoopNodeRpc {
        async fn list_pins(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn ls(&self, _cid: &str) -> anyhow::Result<Vec<LsEntry>> {
            Ok(Vec::new())
        }
    }

    struct NoopTagger;

    #[async_trait]
    impl crate::contracts::Tagger for NoopTagger {
        async fn classify(&self, _cid: &str, _mime: Option<&str>, _sample: &[u8]) -> anyhow::Result<TaggerOutput> {
            Ok(TaggerOutput::default())
        }
    }

    async fn test_deps() -> WorkerDeps {
        let mut config = Config::default();
        config.db_path = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let store = Arc::new(crate::store::Store::open(&config).await.unwrap());
        WorkerDeps {
            store,
            config: Arc::new(config),
            node_rpc: Arc::new(NoopNodeRpc),
            gateway: Arc::new(TextGateway),
            tagger: Arc::new(NoopTagger),
        }
    }

    #[tokio::test]
    async fn crawl_one_records_a_detection_result() {
        let deps = test_deps().await;
        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        let cid = ValidatedCid::new("cidtext1").unwrap();
        deps.store.upsert_pinned(&cid, now).await.unwrap();

        let candidate = deps.store.get("cidtext1").await.unwrap().unwrap();
        crawl_one(&deps, &candidate).await.unwrap();

        let record = deps.store.get("cidtext1").await.unwrap().unwrap();
        assert!(record.last_crawled_ms.is_some());
        assert_eq!(record.kind, Some("text".to_string()));
    }

    #[tokio::test]
    async fn run_once_is_a_noop_when_no_candidates() {
        let deps = test_deps().await;
        run_once(deps).await.unwrap();
    }
}
