//! Row shapes returned by `sqlx::FromRow` and their conversion into the
//! public `contracts` types.

use crate::contracts::{CatalogueMetrics, CidRecord, PresentSource, Tags};
use std::str::FromStr;

/// The full `cids` row shape, selected verbatim by `get`,
/// `next_crawl_candidates`, and `next_expand_candidates` — every column
/// named in the data model, mirroring `store::schema::CIDS_COLUMNS`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CidRow {
    pub cid: String,
    pub present: i64,
    pub present_source: String,
    pub present_reason: Option<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub removed_at: Option<i64>,
    pub size_bytes: Option<i64>,
    pub mime: Option<String>,
    pub ext_guess: Option<String>,
    pub kind: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub tags_json: Option<String>,
    pub detector_version: Option<String>,
    pub indexed_at: Option<i64>,
    pub error: Option<String>,
    pub updated_at: Option<i64>,
    pub is_directory: i64,
    pub expanded_at: Option<i64>,
    pub expand_error: Option<String>,
    pub expand_depth: i64,
    pub site_entry_path: Option<String>,
    pub site_entry_cid: Option<String>,
    pub site_entry_indexed_at: Option<i64>,
    pub crawl_attempts: i64,
}

/// Column list shared by every `SELECT` that produces a [`CidRow`], kept in
/// lockstep with the struct's field order so `sqlx::FromRow` lines up
/// positionally.
pub const CID_ROW_COLUMNS: &str = "cid, present, present_source, present_reason, first_seen_at, \
    last_seen_at, removed_at, size_bytes, mime, ext_guess, kind, confidence, source, tags_json, \
    detector_version, indexed_at, error, updated_at, is_directory, expanded_at, expand_error, \
    expand_depth, site_entry_path, site_entry_cid, site_entry_indexed_at, crawl_attempts";

impl CidRow {
    pub fn into_record(self) -> anyhow::Result<CidRecord> {
        let present_source = PresentSource::from_str(&self.present_source)
            .unwrap_or(PresentSource::Pinned);
        let tags = self
            .tags_json
            .as_deref()
            .and_then(|json| serde_json::from_str::<Tags>(json).ok())
            .unwrap_or_default();

        Ok(CidRecord {
            cid: self.cid,
            present: self.present != 0,
            present_source,
            present_reason: self.present_reason,
            first_seen_ms: self.first_seen_at,
            last_seen_ms: self.last_seen_at,
            removed_at: self.removed_at,
            size: self.size_bytes,
            mime: self.mime,
            ext_guess: self.ext_guess,
            kind: self.kind,
            confidence: self.confidence,
            source: self.source,
            tags,
            detector_version: self.detector_version,
            last_crawled_ms: self.indexed_at,
            error: self.error,
            updated_at: self.updated_at,
            is_directory: self.is_directory != 0,
            expanded_at: self.expanded_at,
            expand_error: self.expand_error,
            expand_depth: self.expand_depth as i32,
            site_entry_path: self.site_entry_path,
            site_entry_cid: self.site_entry_cid,
            site_entry_indexed_at: self.site_entry_indexed_at,
            crawl_attempts: self.crawl_attempts as i32,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricsRow {
    pub last_pin_sync_ms: Option<i64>,
    pub last_type_crawl_ms: Option<i64>,
    pub last_dir_expand_ms: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KindCountRow {
    pub kind: Option<String>,
    pub n: i64,
}

pub fn build_metrics(
    cids_total: i64,
    kind_counts: Vec<KindCountRow>,
    crawl_queue_depth: i64,
    expand_queue_depth: i64,
    metrics_row: MetricsRow,
) -> CatalogueMetrics {
    let cids_by_kind = kind_counts
        .into_iter()
        .map(|row| (row.kind.unwrap_or_else(|| "unknown".to_string()), row.n))
        .collect();

    CatalogueMetrics {
        cids_total,
        cids_by_kind,
        crawl_queue_depth,
        expand_queue_depth,
        last_pin_sync_ms: metrics_row.last_pin_sync_ms,
        last_type_crawl_ms: metrics_row.last_type_crawl_ms,
        last_dir_expand_ms: metrics_row.last_dir_expand_ms,
    }
}
