//! Directory expander: walks the node's `ls` RPC to discover children of
//! pinned (and previously expanded) directories, maintains the `cid_edges`
//! graph, prunes orphaned children, and rebuilds the pin-root path index and
//! site entrypoint used by `/cid/:cid`.

use super::WorkerDeps;
use crate::contracts::{Catalogue, CidRecord, LinkKind, LsEntry, PathEntry, PresentSource};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::path_index::{entrypoint_score, guess_mime_hint, is_indexable, join_path};
use crate::types::ValidatedTimestamp;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

pub async fn run_once(deps: WorkerDeps) -> anyhow::Result<()> {
    let ctx = OperationContext::new("dir_expand_tick");

    let candidates = deps
        .store
        .next_expand_candidates(
            deps.config.dir_expand_max_batch,
            deps.config.dir_expand_max_depth,
            deps.config.dir_expand_ttl_s,
        )
        .await?;

    log_operation(
        &ctx,
        &Operation::DirExpandTick {
            candidates: candidates.len(),
        },
        &Ok(()),
    );

    if candidates.is_empty() {
        return Ok(());
    }

    let candidates = Arc::new(candidates);
    let next = Arc::new(AtomicUsize::new(0));
    let concurrency = deps.config.dir_expand_concurrency.max(1);

    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let deps = deps.clone();
        let candidates = candidates.clone();
        let next = next.clone();
        handles.push(tokio::spawn(async move {
            let mut expanded = 0i64;
            let mut errors = 0i64;
            loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some(candidate) = candidates.get(idx) else {
                    break;
                };
                match expand_one(&deps, candidate).await {
                    Ok(true) => expanded += 1,
                    Ok(false) => {}
                    Err(err) => {
                        errors += 1;
                        warn!(cid = %candidate.cid, error = %err, "directory expansion failed");
                    }
                }
            }
            (expanded, errors)
        }));
    }

    let mut total_expanded = 0i64;
    let mut total_errors = 0i64;
    for handle in handles {
        let (expanded, errors) = handle.await.unwrap_or((0, 0));
        total_expanded += expanded;
        total_errors += errors;
    }

    let now = ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;
    deps.store
        .record_dir_expand(now, total_expanded, total_errors)
        .await?;
    Ok(())
}

/// A `kind` of `None`, `"unknown"`, `"ipld"`, or `"dag"` means the detector
/// either hasn't run or couldn't commit to a content type — in all of those
/// cases the CID is still a directory candidate.
fn kind_missing_or_ambiguous(kind: &Option<String>) -> bool {
    matches!(kind.as_deref(), None | Some("unknown") | Some("ipld") | Some("dag"))
}

/// A pin root at depth 0 is always worth probing as a directory while its
/// kind is still missing or ambiguous; below that, a row is only retried if
/// its kind is still unresolved or it was never successfully crawled.
fn is_likely_directory(record: &CidRecord) -> bool {
    let is_pin_root = record.expand_depth == 0 && record.present_source == PresentSource::Pinned;
    if is_pin_root {
        return kind_missing_or_ambiguous(&record.kind);
    }
    kind_missing_or_ambiguous(&record.kind) || record.source.is_none()
}

/// Returns `true` if this candidate turned out to have children (used only
/// for the tick's `expanded` counter).
async fn expand_one(deps: &WorkerDeps, candidate: &CidRecord) -> anyhow::Result<bool> {
    let now = ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;

    if !is_likely_directory(candidate) {
        deps.store
            .mark_directory(&candidate.cid, false, None, now)
            .await?;
        return Ok(false);
    }

    let listing = match deps.node_rpc.ls(&candidate.cid).await {
        Ok(entries) => entries,
        Err(err) => {
            let truncated = truncate_error(&err.to_string());
            deps.store
                .mark_directory(&candidate.cid, true, Some(&truncated), now)
                .await?;
            return Err(err);
        }
    };

    if listing.is_empty() {
        deps.store
            .mark_directory(&candidate.cid, true, None, now)
            .await?;
        return Ok(false);
    }

    let max_children = deps.config.dir_expand_max_children;
    let truncated_count = listing.len().saturating_sub(max_children);
    let children: Vec<&LsEntry> = listing.iter().take(max_children).collect();
    let child_depth = (candidate.expand_depth + 1) as i64;

    let store = &deps.store;
    let cid = candidate.cid.clone();
    let child_cids: Vec<String> = children.iter().map(|c| c.cid.clone()).collect();
    let expand_error = if truncated_count > 0 {
        Some(format!("too_many_children:{}", listing.len()))
    } else {
        None
    };

    store
        .transaction(|| async {
            store
                .mark_directory(&cid, true, expand_error.as_deref(), now)
                .await?;
            for child in &children {
                store.upsert_edge(&cid, &child.cid, now).await?;
                store.upsert_child(&child.cid, child_depth, now).await?;
            }
            anyhow::Ok(())
        })
        .await?;

    if deps.config.dir_expand_prune_children {
        let demoted = store.prune_orphans(&cid, &child_cids).await?;
        if !demoted.is_empty() {
            warn!(parent = %cid, count = demoted.len(), "pruned orphaned expanded children");
        }
    }

    if candidate.present_source == PresentSource::Pinned {
        update_path_index(deps, &cid, &listing).await?;
    }

    Ok(true)
}

fn truncate_error(message: &str) -> String {
    if message.len() > 240 {
        message[..240].to_string()
    } else {
        message.to_string()
    }
}

/// BFS the directory tree rooted at `root`, rebuild its path index, and pick
/// a site entrypoint. Sub-directory `ls` calls happen outside any
/// transaction, matching the directory-expansion transaction's narrower
/// scope (one directory's own row + its direct children only).
async fn update_path_index(
    deps: &WorkerDeps,
    root: &str,
    root_listing: &[LsEntry],
) -> anyhow::Result<()> {
    let max_depth = deps.config.path_index_max_depth;
    let max_dirs = deps.config.path_index_max_dirs_per_root;
    let max_files = deps.config.path_index_max_files_per_root;

    let mut visited_dirs: HashSet<String> = HashSet::new();
    visited_dirs.insert(root.to_string());

    let mut queue: std::collections::VecDeque<(String, Vec<LsEntry>, usize)> =
        std::collections::VecDeque::new();
    queue.push_back((String::new(), root_listing.to_vec(), 0));

    let mut entries: Vec<PathEntry> = Vec::new();
    let mut dirs_visited = 0usize;
    let mut best_entrypoint: Option<(i64, String, String)> = None; // (score, path, cid)

    while let Some((base_path, listing, depth)) = queue.pop_front() {
        if depth > max_depth {
            continue;
        }

        for entry in listing {
            let Ok(path) = join_path(&base_path, &entry.name) else {
                continue;
            };

            match entry.kind {
                LinkKind::Directory => {
                    if dirs_visited >= max_dirs || visited_dirs.contains(&entry.cid) {
                        continue;
                    }
                    visited_dirs.insert(entry.cid.clone());
                    dirs_visited += 1;

                    match deps.node_rpc.ls(&entry.cid).await {
                        Ok(sub_listing) => queue.push_back((path, sub_listing, depth + 1)),
                        Err(err) => {
                            warn!(cid = %entry.cid, error = %err, "sub-directory listing failed during path-index build");
                        }
                    }
                }
                _ => {
                    if entries.len() >= max_files {
                        continue;
                    }
                    if is_indexable(&path) {
                        let mime_hint = guess_mime_hint(&path).map(|m| m.to_string());
                        if let Some(score) = entrypoint_score(&path, depth) {
                            if best_entrypoint.as_ref().map(|(s, ..)| score > *s).unwrap_or(true) {
                                best_entrypoint = Some((score, path.clone(), entry.cid.clone()));
                            }
                        }
                        entries.push(PathEntry {
                            root_cid: root.to_string(),
                            path,
                            child_cid: entry.cid.clone(),
                            mime_hint,
                        });
                    }
                }
            }
        }
    }

    deps.store.replace_path_index(root, entries).await?;

    if let Some((_, path, cid)) = best_entrypoint {
        let now = ValidatedTimestamp::from_millis(Utc::now().timestamp_millis())?;
        deps.store.set_site_entry(root, &path, &cid, now).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::contracts::{GatewayClient, GatewaySample, Tagger, TaggerOutput};
    use crate::store::Store;
    use crate::types::ValidatedCid;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeNodeRpc {
        listings: HashMap<String, Vec<LsEntry>>,
    }

    #[async_trait]
    impl crate::contracts::NodeRpc for FakeNodeRpc {
        async fn list_pins(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.listings.keys().cloned().collect())
        }

        async fn ls(&self, cid: &str) -> anyhow::Result<Vec<LsEntry>> {
            Ok(self.listings.get(cid).cloned().unwrap_or_default())
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

    async fn test_deps(listings: HashMap<String, Vec<LsEntry>>) -> WorkerDeps {
        let mut config = Config::default();
        config.db_path = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let store = Arc::new(Store::open(&config).await.unwrap());
        WorkerDeps {
            store,
            config: Arc::new(config),
            node_rpc: Arc::new(FakeNodeRpc { listings }),
            gateway: Arc::new(NoopGateway),
            tagger: Arc::new(NoopTagger),
        }
    }

    #[tokio::test]
    async fn expand_one_records_children_as_edges() {
        let mut listings = HashMap::new();
        listings.insert(
            "root1".to_string(),
            vec![LsEntry {
                cid: "child1".to_string(),
                name: "child1.txt".to_string(),
                kind: LinkKind::File,
                size: Some(10),
            }],
        );
        let deps = test_deps(listings).await;

        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        let root = ValidatedCid::new("root1").unwrap();
        deps.store.upsert_pinned(&root, now).await.unwrap();
        let candidate = deps.store.get("root1").await.unwrap().unwrap();

        let expanded = expand_one(&deps, &candidate).await.unwrap();
        assert!(expanded);

        let children = deps.store.children("root1").await.unwrap();
        assert_eq!(children, vec!["child1".to_string()]);
    }

    #[tokio::test]
    async fn scenario_b_pin_root_directory_picks_index_html_as_site_entry() {
        let mut listings = HashMap::new();
        listings.insert(
            "CIDdir".to_string(),
            vec![
                LsEntry {
                    cid: "CIDhtml".to_string(),
                    name: "index.html".to_string(),
                    kind: LinkKind::File,
                    size: Some(820),
                },
                LsEntry {
                    cid: "CIDabout".to_string(),
                    name: "about.html".to_string(),
                    kind: LinkKind::File,
                    size: None,
                },
            ],
        );
        let deps = test_deps(listings).await;

        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        let root = ValidatedCid::new("CIDdir").unwrap();
        deps.store.upsert_pinned(&root, now).await.unwrap();
        let candidate = deps.store.get("CIDdir").await.unwrap().unwrap();

        let expanded = expand_one(&deps, &candidate).await.unwrap();
        assert!(expanded);

        let record = deps.store.get("CIDdir").await.unwrap().unwrap();
        assert!(record.is_directory);
        assert_eq!(record.site_entry_path.as_deref(), Some("index.html"));
        assert_eq!(record.site_entry_cid.as_deref(), Some("CIDhtml"));

        let page = deps
            .store
            .search(&[], &crate::contracts::SearchFilters::default(), 10, 0)
            .await
            .unwrap();
        let html_hit = page.items.iter().find(|hit| hit.cid == "CIDhtml").unwrap();
        assert_eq!(html_hit.root_cid.as_deref(), Some("CIDdir"));
        assert_eq!(html_hit.path.as_deref(), Some("index.html"));
        assert_eq!(html_hit.path_mime_hint.as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn is_likely_directory_retries_unknown_non_root_rows() {
        let mut record = CidRecord {
            cid: "cid1".to_string(),
            kind: Some("unknown".to_string()),
            present_source: PresentSource::Expanded,
            first_seen_ms: 1000,
            last_seen_ms: 1000,
            expand_depth: 2,
            ..Default::default()
        };
        assert!(is_likely_directory(&record));

        record.kind = Some("file".to_string());
        record.source = Some("magic".to_string());
        assert!(!is_likely_directory(&record));
    }
}
