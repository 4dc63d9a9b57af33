//! Core data contracts: the `CidRecord` row shape, its enum fields, the
//! dynamic JSON artifacts attached to it, and the trait boundaries the
//! periodic workers and HTTP layer are written against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ValidatedCid, ValidatedTag, ValidatedTimestamp, ValidatedToken};

/// Node-listing entry type as returned by the node's `ls` RPC — distinct
/// from a CID's content-classification `kind`, which is a free-form string
/// produced by the detector (see `CidRecord::kind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    File,
    Directory,
    Unknown,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::File => "file",
            LinkKind::Directory => "directory",
            LinkKind::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for LinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(LinkKind::File),
            "directory" => Ok(LinkKind::Directory),
            "unknown" => Ok(LinkKind::Unknown),
            other => Err(anyhow::anyhow!("unrecognized kind: {other}")),
        }
    }
}

/// How a CID entered the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentSource {
    /// Discovered directly via the node's pin list.
    #[default]
    Pinned,
    /// Discovered by expanding a pinned directory's contents.
    Expanded,
}

impl PresentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentSource::Pinned => "pinned",
            PresentSource::Expanded => "expanded",
        }
    }
}

impl std::str::FromStr for PresentSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinned" | "pin_root" => Ok(PresentSource::Pinned),
            "expanded" => Ok(PresentSource::Expanded),
            other => Err(anyhow::anyhow!("unrecognized present_source: {other}")),
        }
    }
}

/// The raw, per-signal evidence gathered by the type detector. Stored as a
/// JSON blob alongside the record so the arbitration logic stays inspectable
/// after the fact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signals {
    pub magic: Option<String>,
    pub container: Option<String>,
    pub http_content_type: Option<String>,
    pub heuristic: Option<String>,
    pub external_classifier: Option<String>,
    pub timing_ms: Option<u64>,
    pub range_ignored: Option<bool>,
    pub disagreement: bool,
}

/// The derived, synthesized view of a CID's content: topics, tokens,
/// deterministic tags, and the confidence the detector assigned to the
/// winning signal. This is what `/search` and `/cid/:cid` serve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    pub topics: Vec<String>,
    pub tokens: Vec<(String, u32)>,
    pub content_class: Option<String>,
    pub lang: Option<String>,
    pub confidence: f64,
    pub signals: Signals,
    pub derived_from: Option<String>,
    pub tags: Vec<String>,
}

/// A single row of the catalogue: everything known about one CID.
///
/// `kind` is the detector's free-form content-classification taxonomy
/// (`image`, `html`, `text`, `doc`, `video`, `audio`, `archive`, `package`,
/// `ipld`, or an application-specific string like `archive-or-doc`), `None`
/// until the type crawler has run at least once. It is independent of
/// `is_directory`, which the directory expander sets separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CidRecord {
    pub cid: String,
    pub present: bool,
    pub present_source: PresentSource,
    pub present_reason: Option<String>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub removed_at: Option<i64>,
    pub size: Option<i64>,
    pub mime: Option<String>,
    pub ext_guess: Option<String>,
    pub kind: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub tags: Tags,
    pub detector_version: Option<String>,
    pub last_crawled_ms: Option<i64>,
    pub error: Option<String>,
    pub updated_at: Option<i64>,
    pub is_directory: bool,
    pub expanded_at: Option<i64>,
    pub expand_error: Option<String>,
    pub expand_depth: i32,
    pub site_entry_path: Option<String>,
    pub site_entry_cid: Option<String>,
    pub site_entry_indexed_at: Option<i64>,
    pub crawl_attempts: i32,
}

impl CidRecord {
    pub fn new_pinned(cid: ValidatedCid, now: ValidatedTimestamp) -> Self {
        Self {
            cid: cid.into_inner(),
            present: true,
            present_source: PresentSource::Pinned,
            first_seen_ms: now.as_millis(),
            last_seen_ms: now.as_millis(),
            expand_depth: 0,
            ..Default::default()
        }
    }

    pub fn needs_crawl(&self) -> bool {
        self.last_crawled_ms.is_none()
    }
}

/// The outcome of one detector pass, as recorded by the type crawler.
pub struct CrawlResult {
    pub kind: String,
    pub size: Option<i64>,
    pub mime: Option<String>,
    pub ext_guess: Option<String>,
    pub confidence: f64,
    pub source: String,
    pub tags: Tags,
}

/// A directed parent->child edge discovered by the directory expander.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub parent_cid: String,
    pub child_cid: String,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

/// One entry of a pin-root's path index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEntry {
    pub root_cid: String,
    pub path: String,
    pub child_cid: String,
    pub mime_hint: Option<String>,
}

/// An inverted-index posting: one token present in one CID's tag set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPosting {
    pub token: String,
    pub cid: String,
}

/// A search hit returned by the read-only HTTP API. `root_cid`/`path`/
/// `path_mime_hint` come from a `cid_paths` join (min path per leaf CID) and
/// are `None` for CIDs that aren't reachable from any indexed pin root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub cid: String,
    pub mime: Option<String>,
    pub content_class: Option<String>,
    pub matched_tokens: Vec<String>,
    pub score: f64,
    pub root_cid: Option<String>,
    pub path: Option<String>,
    pub path_mime_hint: Option<String>,
}

/// Optional attribute filters for `/search`, applied in addition to any
/// token match. All fields default to unfiltered except `present`, which
/// defaults to `true` when unset — matching the catalogue's everyday use as
/// a search over currently-pinned content.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub kind: Option<String>,
    pub mime: Option<String>,
    pub present: Option<bool>,
    pub source: Option<String>,
    pub present_source: Option<String>,
    pub is_directory: Option<bool>,
}

/// A page of search results plus the true distinct-CID count of the full
/// (unpaginated) match set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<SearchHit>,
    pub total: i64,
}

/// Durable counters exposed via `/metrics` and `/metrics/state`, separate
/// from the in-process `tracing`/atomic diagnostics used for operator logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueMetrics {
    pub cids_total: i64,
    pub cids_by_kind: HashMap<String, i64>,
    pub crawl_queue_depth: i64,
    pub expand_queue_depth: i64,
    pub last_pin_sync_ms: Option<i64>,
    pub last_type_crawl_ms: Option<i64>,
    pub last_dir_expand_ms: Option<i64>,
}

/// Persistence boundary implemented by the embedded catalogue. All methods
/// are written against owned/borrowed values rather than raw SQL so callers
/// never see the underlying driver.
#[async_trait]
pub trait Catalogue: Send + Sync {
    async fn upsert_pinned(&self, cid: &ValidatedCid, now: ValidatedTimestamp) -> anyhow::Result<()>;
    async fn mark_unpinned_missing(&self, seen_cids: &[String]) -> anyhow::Result<Vec<String>>;
    async fn get(&self, cid: &str) -> anyhow::Result<Option<CidRecord>>;
    async fn record_crawl_result(
        &self,
        cid: &str,
        result: CrawlResult,
        now: ValidatedTimestamp,
    ) -> anyhow::Result<()>;
    async fn next_crawl_candidates(&self, limit: usize) -> anyhow::Result<Vec<CidRecord>>;
    async fn next_expand_candidates(
        &self,
        limit: usize,
        max_depth: i32,
        ttl_s: u64,
    ) -> anyhow::Result<Vec<CidRecord>>;
    async fn upsert_edge(&self, parent: &str, child: &str, now: ValidatedTimestamp) -> anyhow::Result<()>;
    async fn prune_orphans(&self, root: &str, present_children: &[String]) -> anyhow::Result<Vec<String>>;
    async fn replace_path_index(&self, root: &str, entries: Vec<PathEntry>) -> anyhow::Result<()>;
    async fn search(
        &self,
        tokens: &[ValidatedToken],
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<SearchPage>;
    async fn children(&self, cid: &str) -> anyhow::Result<Vec<String>>;
    async fn parents(&self, cid: &str) -> anyhow::Result<Vec<String>>;
    async fn metrics(&self) -> anyhow::Result<CatalogueMetrics>;
    async fn tag_matches(&self, tag: &ValidatedTag) -> anyhow::Result<Vec<String>>;
}

/// A directory listing entry as returned by the node's `ls` RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct LsEntry {
    pub cid: String,
    pub name: String,
    pub kind: LinkKind,
    pub size: Option<i64>,
}

/// Node RPC boundary: the pin list and directory listings.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn list_pins(&self) -> anyhow::Result<Vec<String>>;
    async fn ls(&self, cid: &str) -> anyhow::Result<Vec<LsEntry>>;
}

/// A bounded byte sample fetched from the gateway, with provenance about how
/// it was obtained (whether range requests were honored).
#[derive(Debug, Clone)]
pub struct GatewaySample {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub total_size: Option<u64>,
    pub range_ignored: bool,
}

/// Gateway fetch boundary used by the type/content crawler.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn head(&self, cid: &str) -> anyhow::Result<Option<String>>;
    async fn fetch_range(&self, cid: &str, offset: u64, len: u64) -> anyhow::Result<GatewaySample>;
}

/// External classifier output merged additively into a CID's derived tags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaggerOutput {
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub lang: Option<String>,
    pub confidence: Option<f64>,
}

/// Out-of-process or in-process classification boundary.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn classify(&self, cid: &str, mime: Option<&str>, sample: &[u8]) -> anyhow::Result<TaggerOutput>;
}
