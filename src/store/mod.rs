//! Embedded catalogue: SQLite in WAL mode, a single-writer connection pool
//! doubling as the serialized write queue, and a task-local scoped
//! transaction context so nested calls within one worker tick share a
//! single transaction instead of each opening (and deadlocking on) their
//! own.

mod queries;
mod row;
mod schema;

use crate::config::Config;
use crate::contracts::{
    Catalogue, CatalogueMetrics, CidRecord, CrawlResult, PathEntry, SearchFilters, SearchPage,
};
use crate::types::{ValidatedCid, ValidatedTag, ValidatedTimestamp, ValidatedToken};
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::cell::RefCell;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Bumped whenever detection logic changes meaningfully enough that
/// previously-crawled rows should be revisited.
const DETECTOR_VERSION: &str = "cid-catalog-detector-v1";

tokio::task_local! {
    static TX: RefCell<Option<Arc<Mutex<Transaction<'static, Sqlite>>>>>;
}

/// Handle to the catalogue file. Cheap to clone; all state lives behind the
/// two pools.
#[derive(Clone)]
pub struct Store {
    write_pool: SqlitePool,
    read_pool: SqlitePool,
    config: Arc<Config>,
}

impl Store {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.db_path)
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(&config.db_path))
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        // A single physical writer connection gives us FIFO serialization of
        // writes for free: sqlx queues acquisitions against a pool with
        // max_connections(1) instead of us hand-rolling an mpsc queue.
        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        let read_pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let now_ms = ValidatedTimestamp::from_millis(chrono::Utc::now().timestamp_millis())
            .unwrap_or_else(|_| ValidatedTimestamp::from_millis(0).unwrap())
            .as_millis();
        schema::migrate(&write_pool, now_ms).await?;

        Ok(Self {
            write_pool,
            read_pool,
            config: Arc::new(config.clone()),
        })
    }

    fn current_tx(&self) -> Option<Arc<Mutex<Transaction<'static, Sqlite>>>> {
        TX.try_with(|cell| cell.borrow().clone()).ok().flatten()
    }

    /// Run `f` against whichever connection is in scope: the active
    /// transaction's connection if one is open for this task, otherwise a
    /// fresh connection acquired from the write pool.
    async fn with_write<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        if let Some(tx) = self.current_tx() {
            let mut guard = tx.lock().await;
            f(&mut **guard).await
        } else {
            let mut conn = self.write_pool.acquire().await?;
            f(&mut *conn).await
        }
    }

    /// Run `f` inside a single transaction. Calls to other `Store`/
    /// `Catalogue` methods made from within `f` automatically join this
    /// transaction rather than opening their own (and deadlocking against
    /// the one-connection write pool).
    pub async fn transaction<F, Fut, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if self.current_tx().is_some() {
            return f().await;
        }

        let tx = self.write_pool.begin().await?;
        let tx = Arc::new(Mutex::new(tx));
        let cell = RefCell::new(Some(tx.clone()));

        let result = TX.scope(cell, f()).await;

        let tx = match Arc::try_unwrap(tx) {
            Ok(mutex) => mutex.into_inner(),
            Err(_) => {
                anyhow::bail!("transaction handle still referenced after scope exit");
            }
        };

        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Catalogue for Store {
    async fn upsert_pinned(&self, cid: &ValidatedCid, now: ValidatedTimestamp) -> anyhow::Result<()> {
        let cid = cid.as_str().to_string();
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::upsert_pinned(conn, &cid, now_ms).await }))
            .await
    }

    async fn mark_unpinned_missing(&self, seen_cids: &[String]) -> anyhow::Result<Vec<String>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let seen = seen_cids.to_vec();
        let missing = self
            .with_write(move |conn| Box::pin(async move { queries::mark_missing_pins(conn, &seen, now_ms).await }))
            .await?;
        for cid in &missing {
            let cid = cid.clone();
            self.with_write(move |conn| Box::pin(async move { queries::mark_removed(conn, &cid, "missing_from_pin_set", now_ms).await }))
                .await?;
        }
        Ok(missing)
    }

    async fn get(&self, cid: &str) -> anyhow::Result<Option<CidRecord>> {
        let row = queries::get(&self.read_pool, cid).await?;
        row.map(|r| r.into_record()).transpose()
    }

    async fn record_crawl_result(
        &self,
        cid: &str,
        result: CrawlResult,
        now: ValidatedTimestamp,
    ) -> anyhow::Result<()> {
        let cid = cid.to_string();
        let kind_str = result.kind.clone();
        let ext_guess = result.ext_guess.clone();
        let source = result.source.clone();
        let confidence = result.confidence;
        let size = result.size;
        let mime = result.mime.clone();
        let tags = result.tags;
        let detector_version = DETECTOR_VERSION.to_string();
        let signals_json = serde_json::to_string(&tags.signals)?;
        let tags_json = serde_json::to_string(&tags)?;
        let now_ms = now.as_millis();

        let cid_for_tokens = cid.clone();
        let token_counts = tags.tokens.clone();
        self.with_write(move |conn| {
            Box::pin(async move { queries::record_crawl_result(
                conn,
                &cid,
                &kind_str,
                ext_guess.as_deref(),
                confidence,
                &source,
                size,
                mime.as_deref(),
                &signals_json,
                &tags_json,
                &detector_version,
                now_ms,
            ).await })
        })
        .await?;

        self.with_write(move |conn| Box::pin(async move { queries::replace_token_index(conn, &cid_for_tokens, &token_counts).await }))
            .await
    }

    async fn next_crawl_candidates(&self, limit: usize) -> anyhow::Result<Vec<CidRecord>> {
        let rows = queries::next_crawl_candidates(&self.read_pool, DETECTOR_VERSION, limit as i64).await?;
        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn next_expand_candidates(
        &self,
        limit: usize,
        max_depth: i32,
        ttl_s: u64,
    ) -> anyhow::Result<Vec<CidRecord>> {
        let rows = queries::next_expand_candidates(
            &self.read_pool,
            max_depth as i64,
            ttl_s as i64,
            chrono::Utc::now().timestamp_millis(),
            limit as i64,
        )
        .await?;
        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn upsert_edge(&self, parent: &str, child: &str, now: ValidatedTimestamp) -> anyhow::Result<()> {
        let parent = parent.to_string();
        let child = child.to_string();
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::upsert_edge(conn, &parent, &child, now_ms).await }))
            .await
    }

    async fn prune_orphans(&self, root: &str, present_children: &[String]) -> anyhow::Result<Vec<String>> {
        let root = root.to_string();
        let root_for_existing = root.clone();
        let existing = self
            .with_write(move |conn| Box::pin(async move { queries::edges_for_parent(conn, &root_for_existing).await }))
            .await?;
        let mut demoted = Vec::new();

        for child in existing.into_iter().filter(|c| !present_children.contains(c)) {
            let root = root.clone();
            let child_for_delete = child.clone();
            self.with_write(move |conn| Box::pin(async move { queries::delete_edge(conn, &root, &child_for_delete).await }))
                .await?;

            let child_for_count = child.clone();
            let remaining = self
                .with_write(move |conn| Box::pin(async move { queries::edge_count_for_child(conn, &child_for_count).await }))
                .await?;
            if remaining == 0 {
                let child_for_source = child.clone();
                let source = self
                    .with_write(move |conn| Box::pin(async move { queries::present_source_of(conn, &child_for_source).await }))
                    .await?;
                if source.as_deref() == Some("expanded") {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let child_for_removal = child.clone();
                    self.with_write(move |conn| {
                        Box::pin(async move { queries::mark_removed(conn, &child_for_removal, "orphaned_child", now_ms).await })
                    })
                    .await?;
                    demoted.push(child);
                }
            }
        }
        Ok(demoted)
    }

    async fn replace_path_index(&self, root: &str, entries: Vec<PathEntry>) -> anyhow::Result<()> {
        let root = root.to_string();
        self.with_write(move |conn| Box::pin(async move { queries::replace_path_index(conn, &root, &entries).await }))
            .await
    }

    async fn search(
        &self,
        tokens: &[ValidatedToken],
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<SearchPage> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.as_str().to_string()).collect();
        queries::search(&self.read_pool, &tokens, filters, limit as i64, offset as i64).await
    }

    async fn children(&self, cid: &str) -> anyhow::Result<Vec<String>> {
        let edges = queries::children(&self.read_pool, cid).await?;
        Ok(edges.into_iter().map(|e| e.child_cid).collect())
    }

    async fn parents(&self, cid: &str) -> anyhow::Result<Vec<String>> {
        let edges = queries::parents(&self.read_pool, cid).await?;
        Ok(edges.into_iter().map(|e| e.parent_cid).collect())
    }

    async fn metrics(&self) -> anyhow::Result<CatalogueMetrics> {
        let cids_total = queries::cids_total(&self.read_pool).await?;
        let by_kind = queries::cids_by_kind(&self.read_pool).await?;
        let metrics_row = queries::metrics_row(&self.read_pool).await?;
        let crawl_queue_depth = queries::next_crawl_candidates(&self.read_pool, DETECTOR_VERSION, 10_000)
            .await
            .map(|rows| rows.len() as i64)
            .unwrap_or(0);
        let expand_queue_depth = queries::next_expand_candidates(
            &self.read_pool,
            self.config.dir_expand_max_depth as i64,
            self.config.dir_expand_ttl_s as i64,
            chrono::Utc::now().timestamp_millis(),
            10_000,
        )
        .await
        .map(|rows| rows.len() as i64)
        .unwrap_or(0);

        Ok(row::build_metrics(
            cids_total,
            by_kind,
            crawl_queue_depth,
            expand_queue_depth,
            metrics_row,
        ))
    }

    async fn tag_matches(&self, tag: &ValidatedTag) -> anyhow::Result<Vec<String>> {
        queries::tag_matches(&self.read_pool, tag.as_str()).await
    }
}

impl Store {
    pub async fn set_site_entry(&self, root: &str, path: &str, cid: &str, now: ValidatedTimestamp) -> anyhow::Result<()> {
        let root = root.to_string();
        let path = path.to_string();
        let cid = cid.to_string();
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::set_site_entry(conn, &root, &path, &cid, now_ms).await }))
            .await
    }

    pub async fn mark_directory(
        &self,
        cid: &str,
        is_directory: bool,
        expand_error: Option<&str>,
        now: ValidatedTimestamp,
    ) -> anyhow::Result<()> {
        let cid = cid.to_string();
        let expand_error = expand_error.map(|s| s.to_string());
        let now_ms = now.as_millis();
        self.with_write(move |conn| {
            Box::pin(async move { queries::mark_directory(conn, &cid, is_directory, expand_error.as_deref(), now_ms).await })
        })
        .await
    }

    pub async fn upsert_child(&self, cid: &str, expand_depth: i64, now: ValidatedTimestamp) -> anyhow::Result<()> {
        let cid = cid.to_string();
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::upsert_child(conn, &cid, expand_depth, now_ms).await }))
            .await
    }

    pub async fn record_pin_sync(&self, now: ValidatedTimestamp, pins_current: i64, success: bool) -> anyhow::Result<()> {
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::record_pin_sync(conn, now_ms, pins_current, success).await }))
            .await
    }

    pub async fn record_type_crawl(&self, now: ValidatedTimestamp, indexed: i64) -> anyhow::Result<()> {
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::record_type_crawl(conn, now_ms, indexed).await }))
            .await
    }

    pub async fn record_dir_expand(&self, now: ValidatedTimestamp, expanded: i64, errors: i64) -> anyhow::Result<()> {
        let now_ms = now.as_millis();
        self.with_write(move |conn| Box::pin(async move { queries::record_dir_expand(conn, now_ms, expanded, errors).await }))
            .await
    }

    pub async fn increment_range_ignored(&self) -> anyhow::Result<()> {
        self.with_write(move |conn| Box::pin(async move { queries::increment_range_ignored(conn).await }))
            .await
    }

    pub async fn record_crawl_error(&self, cid: &str, error: &str, now: ValidatedTimestamp) -> anyhow::Result<()> {
        let cid = cid.to_string();
        let error = if error.len() > 240 { error[..240].to_string() } else { error.to_string() };
        let now_ms = now.as_millis();
        self.with_write(move |conn| {
            Box::pin(async move { queries::record_crawl_error(conn, &cid, &error, DETECTOR_VERSION, now_ms).await })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_store() -> Store {
        let mut config = Config::default();
        config.db_path = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        Store::open(&config).await.expect("store opens")
    }

    #[tokio::test]
    async fn upsert_pinned_creates_row() {
        let store = test_store().await;
        let cid = ValidatedCid::new("cidtest1").unwrap();
        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        store.upsert_pinned(&cid, now).await.unwrap();

        let record = store.get("cidtest1").await.unwrap().unwrap();
        assert_eq!(record.cid, "cidtest1");
        assert_eq!(record.first_seen_ms, 1000);
    }

    #[tokio::test]
    async fn mark_unpinned_missing_demotes_absent_pin_roots() {
        let store = test_store().await;
        let cid1 = ValidatedCid::new("cid1").unwrap();
        let cid2 = ValidatedCid::new("cid2").unwrap();
        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        store.upsert_pinned(&cid1, now).await.unwrap();
        store.upsert_pinned(&cid2, now).await.unwrap();

        let missing = store.mark_unpinned_missing(&["cid1".to_string()]).await.unwrap();
        assert_eq!(missing, vec!["cid2".to_string()]);
    }

    #[tokio::test]
    async fn transaction_shares_connection_across_nested_calls() {
        let store = test_store().await;
        let now = ValidatedTimestamp::from_millis(1000).unwrap();

        store
            .transaction(|| async {
                let cid = ValidatedCid::new("nested1").unwrap();
                store.upsert_pinned(&cid, now).await?;
                store.upsert_edge("nested1", "child1", now).await?;
                Ok(())
            })
            .await
            .unwrap();

        let record = store.get("nested1").await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn pinned_rows_survive_reopening_the_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalogue.db");

        let mut config = Config::default();
        config.db_path = db_path.to_string_lossy().into_owned();
        let now = ValidatedTimestamp::from_millis(1000).unwrap();

        {
            let store = Store::open(&config).await.unwrap();
            let cid = ValidatedCid::new("cidpersist1").unwrap();
            store.upsert_pinned(&cid, now).await.unwrap();
        }

        let reopened = Store::open(&config).await.unwrap();
        let record = reopened.get("cidpersist1").await.unwrap();
        assert!(record.is_some());
    }

    async fn seed_for_search(store: &Store, cid: &str, mime: &str, token_count: u32) {
        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        let validated = ValidatedCid::new(cid).unwrap();
        store.upsert_pinned(&validated, now).await.unwrap();
        store
            .record_crawl_result(
                cid,
                CrawlResult {
                    kind: "html".to_string(),
                    size: None,
                    mime: Some(mime.to_string()),
                    ext_guess: Some("html".to_string()),
                    confidence: 0.9,
                    source: "container".to_string(),
                    tags: crate::contracts::Tags {
                        tokens: vec![("docs".to_string(), token_count)],
                        ..Default::default()
                    },
                },
                now,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scenario_f_search_ranks_by_score_and_excludes_octet_stream() {
        let store = test_store().await;
        seed_for_search(&store, "CIDhtml", "text/html", 3).await;
        seed_for_search(&store, "CIDother", "text/plain", 1).await;
        seed_for_search(&store, "CIDbin", "application/octet-stream", 5).await;

        let token = ValidatedToken::new("docs").unwrap();
        let page = store
            .search(&[token], &SearchFilters::default(), 10, 0)
            .await
            .unwrap();

        let cids: Vec<&str> = page.items.iter().map(|hit| hit.cid.as_str()).collect();
        assert_eq!(cids, vec!["CIDhtml", "CIDother"]);
        assert_eq!(page.total, 2);
    }
}
