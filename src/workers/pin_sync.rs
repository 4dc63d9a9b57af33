//! Pin synchronizer: reconciles the catalogue's present rows against the
//! node's recursive pin set. Runs the whole diff inside one store
//! transaction so a crash mid-sync never leaves `present` half updated.

use super::WorkerDeps;
use crate::observability::{log_operation, Operation, OperationContext};
use crate::contracts::Catalogue;
use crate::types::ValidatedCid;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub async fn run_once(deps: WorkerDeps) -> anyhow::Result<()> {
    let ctx = OperationContext::new("pin_sync_tick");
    let start = Instant::now();

    let result = sync(&deps).await;
    let now = crate::types::ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;

    match &result {
        Ok((pinned_count, newly_missing)) => {
            deps.store
                .record_pin_sync(now, *pinned_count as i64, true)
                .await?;
            log_operation(
                &ctx,
                &Operation::PinSyncTick {
                    pinned_count: *pinned_count,
                    newly_missing: *newly_missing,
                },
                &Ok(()),
            );
            info!(
                pinned = pinned_count,
                newly_missing, elapsed_ms = start.elapsed().as_millis() as u64,
                "pin sync tick complete"
            );
        }
        Err(err) => {
            let _ = deps.store.record_pin_sync(now, 0, false).await;
            warn!(error = %err, "pin sync tick failed");
        }
    }

    result.map(|_| ())
}

async fn sync(deps: &WorkerDeps) -> anyhow::Result<(usize, usize)> {
    let pins = deps.node_rpc.list_pins().await?;
    let pinned_count = pins.len();

    let store = &deps.store;
    let missing = store
        .transaction(|| async {
            let now = crate::types::ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;
            for raw_cid in &pins {
                let cid = match ValidatedCid::new(raw_cid.clone()) {
                    Ok(cid) => cid,
                    Err(err) => {
                        warn!(cid = %raw_cid, error = %err, "skipping malformed pin");
                        continue;
                    }
                };
                store.upsert_pinned(&cid, now).await?;
            }
            store.mark_unpinned_missing(&pins).await
        })
        .await?;

    Ok((pinned_count, missing.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::contracts::{GatewayClient, GatewaySample, LsEntry, NodeRpc, Tagger, TaggerOutput};
    use crate::store::Store;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeNodeRpc {
        pins: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeRpc for FakeNodeRpc {
        async fn list_pins(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.pins.lock().unwrap().clone())
        }

        async fn ls(&self, _cid: &str) -> anyhow::Result<Vec<LsEntry>> {
            Ok(Vec::new())
        }
    }

    struct NoopGateway;

    #[async_trait]
    impl GatewayClient for NoopGateway {
        async fn head(&self, _cid: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn fetch_range(&self, _cid: &str, _offset: u64, _len: u64) -> anyhow::Result<GatewaySample> {
            anyhow::bail!("not used in this test")
        }
    }

    struct NoopTagger;

    #[async_trait]
    impl Tagger for NoopTagger {
        async fn classify(&self, _cid: &str, _mime: Option<&str>, _sample: &[u8]) -> anyhow::Result<TaggerOutput> {
            Ok(TaggerOutput::default())
        }
    }

    async fn test_deps(pins: Vec<String>) -> WorkerDeps {
        let mut config = Config::default();
        config.db_path = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let store = Arc::new(Store::open(&config).await.unwrap());
        WorkerDeps {
            store,
            config: Arc::new(config),
            node_rpc: Arc::new(FakeNodeRpc { pins: Mutex::new(pins) }),
            gateway: Arc::new(NoopGateway),
            tagger: Arc::new(NoopTagger),
        }
    }

    #[tokio::test]
    async fn sync_inserts_new_pins_and_demotes_missing_ones() {
        let deps = test_deps(vec!["cid1".to_string(), "cid2".to_string()]).await;

        let (pinned, missing) = sync(&deps).await.unwrap();
        assert_eq!(pinned, 2);
        assert_eq!(missing, 0);

        assert!(deps.store.get("cid1").await.unwrap().is_some());
        assert!(deps.store.get("cid2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scenario_d_removed_pin_is_demoted_and_remaining_pin_is_refreshed() {
        let node_rpc = Arc::new(FakeNodeRpc {
            pins: Mutex::new(vec!["CID1".to_string(), "CID2".to_string()]),
        });
        let mut config = Config::default();
        config.db_path = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let store = Arc::new(Store::open(&config).await.unwrap());
        let deps = WorkerDeps {
            store,
            config: Arc::new(config),
            node_rpc: node_rpc.clone(),
            gateway: Arc::new(NoopGateway),
            tagger: Arc::new(NoopTagger),
        };

        let (pinned, missing) = sync(&deps).await.unwrap();
        assert_eq!(pinned, 2);
        assert_eq!(missing, 0);
        let cid1_first_seen = deps.store.get("CID1").await.unwrap().unwrap().last_seen_ms;

        *node_rpc.pins.lock().unwrap() = vec!["CID1".to_string()];
        let (pinned, missing) = sync(&deps).await.unwrap();
        assert_eq!(pinned, 1);
        assert_eq!(missing, 1);

        let cid1 = deps.store.get("CID1").await.unwrap().unwrap();
        assert!(cid1.present);
        assert!(cid1.last_seen_ms >= cid1_first_seen);

        let cid2 = deps.store.get("CID2").await.unwrap().unwrap();
        assert!(!cid2.present);
        assert!(cid2.removed_at.unwrap_or(0) > 0);
        assert_eq!(cid2.present_reason.as_deref(), Some("missing_from_pin_set"));
    }

    #[tokio::test]
    async fn run_once_records_a_pin_sync_tick() {
        let deps = test_deps(vec!["cid1".to_string()]).await;
        run_once(deps.clone()).await.unwrap();

        let metrics = deps.store.metrics().await.unwrap();
        assert!(metrics.last_pin_sync_ms.is_some());
    }
}
