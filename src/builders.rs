//! Fluent builders for the catalogue's core structs, keeping field defaults
//! and validated-type construction in one place instead of scattered struct
//! literals across the workers.

use crate::contracts::{CidRecord, PresentSource, Signals, Tags};
use crate::types::{ValidatedCid, ValidatedTimestamp};
use anyhow::{ensure, Result};

/// Builder for a [`CidRecord`], defaulting to an unclassified, just-pinned row.
pub struct CidRecordBuilder {
    cid: Option<ValidatedCid>,
    kind: Option<String>,
    present_source: PresentSource,
    size: Option<i64>,
    mime: Option<String>,
    first_seen_ms: Option<i64>,
    last_seen_ms: Option<i64>,
    last_crawled_ms: Option<i64>,
    crawl_attempts: i32,
    tags: Tags,
    expand_depth: i32,
    is_directory: bool,
}

impl CidRecordBuilder {
    pub fn new() -> Self {
        Self {
            cid: None,
            kind: None,
            present_source: PresentSource::Pinned,
            size: None,
            mime: None,
            first_seen_ms: None,
            last_seen_ms: None,
            last_crawled_ms: None,
            crawl_attempts: 0,
            tags: Tags::default(),
            expand_depth: 0,
            is_directory: false,
        }
    }

    pub fn cid(mut self, cid: ValidatedCid) -> Self {
        self.cid = Some(cid);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn is_directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }

    pub fn present_source(mut self, source: PresentSource) -> Self {
        self.present_source = source;
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn first_seen(mut self, ts: ValidatedTimestamp) -> Self {
        self.first_seen_ms = Some(ts.as_millis());
        self
    }

    pub fn last_seen(mut self, ts: ValidatedTimestamp) -> Self {
        self.last_seen_ms = Some(ts.as_millis());
        self
    }

    pub fn last_crawled(mut self, ts: ValidatedTimestamp) -> Self {
        self.last_crawled_ms = Some(ts.as_millis());
        self
    }

    pub fn crawl_attempts(mut self, attempts: i32) -> Self {
        self.crawl_attempts = attempts;
        self
    }

    pub fn expand_depth(mut self, depth: i32) -> Self {
        self.expand_depth = depth;
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn signals(mut self, signals: Signals) -> Self {
        self.tags.signals = signals;
        self
    }

    pub fn build(self) -> Result<CidRecord> {
        let cid = self.cid.ok_or_else(|| anyhow::anyhow!("cid is required"))?;
        let first_seen_ms = self
            .first_seen_ms
            .ok_or_else(|| anyhow::anyhow!("first_seen is required"))?;
        let last_seen_ms = self.last_seen_ms.unwrap_or(first_seen_ms);

        ensure!(
            last_seen_ms >= first_seen_ms,
            "last_seen_ms must be >= first_seen_ms"
        );

        Ok(CidRecord {
            cid: cid.into_inner(),
            present: true,
            kind: self.kind,
            present_source: self.present_source,
            size: self.size,
            mime: self.mime,
            first_seen_ms,
            last_seen_ms,
            last_crawled_ms: self.last_crawled_ms,
            crawl_attempts: self.crawl_attempts,
            tags: self.tags,
            expand_depth: self.expand_depth,
            is_directory: self.is_directory,
            ..Default::default()
        })
    }
}

impl Default for CidRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a normalized search request: tokenized query, limit, and
/// optional tag filter.
pub struct SearchRequestBuilder {
    raw_query: String,
    limit: usize,
    tag_filter: Option<String>,
}

impl SearchRequestBuilder {
    pub fn new(raw_query: impl Into<String>) -> Self {
        Self {
            raw_query: raw_query.into(),
            limit: 20,
            tag_filter: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn tag_filter(mut self, tag: impl Into<String>) -> Self {
        self.tag_filter = Some(tag.into());
        self
    }

    pub fn build(self) -> Result<SearchRequest> {
        ensure!(!self.raw_query.trim().is_empty(), "query must not be empty");
        let limit = self.limit.clamp(1, 100);
        Ok(SearchRequest {
            raw_query: self.raw_query,
            limit,
            tag_filter: self.tag_filter,
        })
    }
}

/// A normalized search request ready to be tokenized and run against the
/// inverted index.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub raw_query: String,
    pub limit: usize,
    pub tag_filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_record_builder_requires_cid_and_first_seen() {
        assert!(CidRecordBuilder::new().build().is_err());
        let cid = ValidatedCid::new("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")
            .unwrap();
        assert!(CidRecordBuilder::new().cid(cid).build().is_err());
    }

    #[test]
    fn cid_record_builder_defaults_last_seen_to_first_seen() {
        let cid = ValidatedCid::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        let now = ValidatedTimestamp::from_millis(1000).unwrap();
        let record = CidRecordBuilder::new().cid(cid).first_seen(now).build().unwrap();
        assert_eq!(record.first_seen_ms, 1000);
        assert_eq!(record.last_seen_ms, 1000);
        assert_eq!(record.kind, None);
    }

    #[test]
    fn cid_record_builder_rejects_last_seen_before_first_seen() {
        let cid = ValidatedCid::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        let first = ValidatedTimestamp::from_millis(2000).unwrap();
        let last = ValidatedTimestamp::from_millis(1000).unwrap();
        let result = CidRecordBuilder::new()
            .cid(cid)
            .first_seen(first)
            .last_seen(last)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn search_request_builder_clamps_limit() {
        let req = SearchRequestBuilder::new("rust tutorial").limit(5000).build().unwrap();
        assert_eq!(req.limit, 100);
        assert!(SearchRequestBuilder::new("   ").build().is_err());
    }
}
