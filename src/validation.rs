//! Runtime validation of the data-model invariants listed in the catalogue
//! schema, layered on top of the compile-time guarantees already enforced by
//! the newtypes in [`crate::types`].

use crate::contracts::{CatalogueMetrics, CidRecord};
use anyhow::{bail, Result};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("precondition failed: {condition}")]
    PreconditionFailed { condition: String, context: String },

    #[error("invariant violated: {invariant}")]
    InvariantViolated { invariant: String, state: String },

    #[error("invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

/// Validation context for attaching structured attributes to error messages.
#[derive(Clone)]
pub struct ValidationContext {
    operation: String,
    attributes: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(self, condition: bool, message: &str) -> Result<()> {
        if !condition {
            let context = format!(
                "operation: {}, attributes: {:?}",
                self.operation, self.attributes
            );
            bail!(ValidationError::PreconditionFailed {
                condition: message.to_string(),
                context,
            });
        }
        Ok(())
    }
}

/// CID record invariant checks (data model invariants 1-4).
pub mod record {
    use super::*;

    pub fn validate_for_upsert(record: &CidRecord) -> Result<()> {
        let ctx = ValidationContext::new("cid_record_upsert").with_attribute("cid", &record.cid);

        ctx.clone()
            .validate(!record.cid.is_empty(), "cid must not be empty")?;

        ctx.clone().validate(
            record.last_seen_ms >= record.first_seen_ms,
            "last_seen_ms must be >= first_seen_ms",
        )?;

        if let Some(crawled_ms) = record.last_crawled_ms {
            ctx.clone().validate(
                crawled_ms >= record.first_seen_ms,
                "last_crawled_ms must be >= first_seen_ms",
            )?;
        }

        if let Some(size) = record.size {
            ctx.clone()
                .validate(size >= 0, "size must be non-negative")?;
        }

        ctx.validate(
            record.crawl_attempts >= 0,
            "crawl_attempts must be non-negative",
        )?;

        Ok(())
    }

    /// Invariant 1: a directory CID's size must be null (directories are not
    /// byte-addressable; only their children are crawled for size).
    pub fn validate_directory_has_no_size(record: &CidRecord) -> Result<()> {
        if record.is_directory && record.size.is_some() {
            bail!(ValidationError::InvariantViolated {
                invariant: "directory CIDs must not carry a size_bytes value".to_string(),
                state: format!("cid={} size={:?}", record.cid, record.size),
            });
        }
        Ok(())
    }
}

/// Search request validation.
pub mod search {
    use super::*;

    pub fn validate_query(query: &str) -> Result<()> {
        let ctx = ValidationContext::new("search_query").with_attribute("query", query);

        ctx.clone()
            .validate(!query.trim().is_empty(), "search query must not be empty")?;

        ctx.validate(query.len() < 1024, "search query too long (max 1024 chars)")?;

        Ok(())
    }

    pub fn validate_limit(limit: usize, max: usize) -> Result<usize> {
        if limit == 0 {
            Ok(max.min(20))
        } else if limit > max {
            Ok(max)
        } else {
            Ok(limit)
        }
    }
}

/// Gateway range-fetch request validation.
pub mod gateway {
    use super::*;

    pub fn validate_range(offset: u64, len: u64, max_body_bytes: u64) -> Result<()> {
        let ctx = ValidationContext::new("gateway_range_fetch")
            .with_attribute("offset", offset.to_string())
            .with_attribute("len", len.to_string());

        ctx.clone().validate(len > 0, "range length must be positive")?;

        ctx.validate(
            len <= max_body_bytes,
            &format!("range length exceeds body cap of {max_body_bytes} bytes"),
        )?;

        Ok(())
    }
}

/// Catalogue-wide metrics sanity checks, run after each writer-queue flush.
pub mod metrics {
    use super::*;

    pub fn validate(metrics: &CatalogueMetrics) -> Result<()> {
        let ctx = ValidationContext::new("catalogue_metrics")
            .with_attribute("cids_total", metrics.cids_total.to_string());

        ctx.clone()
            .validate(metrics.cids_total >= 0, "cids_total must be non-negative")?;

        let by_kind_total: i64 = metrics.cids_by_kind.values().sum();
        ctx.validate(
            by_kind_total <= metrics.cids_total,
            "sum of cids_by_kind must not exceed cids_total",
        )?;

        Ok(())
    }
}

/// Writer-queue transaction nesting validation (scoped BEGIN/COMMIT refcount).
pub mod transaction {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NESTING_DEPTH: AtomicU32 = AtomicU32::new(0);

    pub fn validate_begin() -> Result<u32> {
        Ok(NESTING_DEPTH.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn validate_commit() -> Result<u32> {
        let previous = NESTING_DEPTH.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
            d.checked_sub(1)
        });
        match previous {
            Ok(depth) => Ok(depth.saturating_sub(1)),
            Err(_) => bail!(ValidationError::InvariantViolated {
                invariant: "transaction commit without matching begin".to_string(),
                state: "nesting depth already zero".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::PresentSource;

    fn sample_record() -> CidRecord {
        CidRecord {
            cid: "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi".to_string(),
            present: true,
            kind: Some("text".to_string()),
            present_source: PresentSource::Pinned,
            size: Some(1024),
            mime: Some("text/plain".to_string()),
            first_seen_ms: 1000,
            last_seen_ms: 2000,
            last_crawled_ms: Some(1500),
            crawl_attempts: 1,
            expand_depth: 0,
            ..Default::default()
        }
    }

    #[test]
    fn record_upsert_accepts_well_formed_record() {
        assert!(record::validate_for_upsert(&sample_record()).is_ok());
    }

    #[test]
    fn record_upsert_rejects_last_seen_before_first_seen() {
        let mut rec = sample_record();
        rec.last_seen_ms = 500;
        assert!(record::validate_for_upsert(&rec).is_err());
    }

    #[test]
    fn record_upsert_rejects_negative_size() {
        let mut rec = sample_record();
        rec.size = Some(-1);
        assert!(record::validate_for_upsert(&rec).is_err());
    }

    #[test]
    fn directory_must_not_carry_size() {
        let mut rec = sample_record();
        rec.is_directory = true;
        rec.size = Some(10);
        assert!(record::validate_directory_has_no_size(&rec).is_err());
        rec.size = None;
        assert!(record::validate_directory_has_no_size(&rec).is_ok());
    }

    #[test]
    fn search_query_validation() {
        assert!(search::validate_query("rust tutorial").is_ok());
        assert!(search::validate_query("").is_err());
        assert!(search::validate_query(&"x".repeat(2000)).is_err());
    }

    #[test]
    fn search_limit_clamps() {
        assert_eq!(search::validate_limit(0, 50).unwrap(), 20);
        assert_eq!(search::validate_limit(1000, 50).unwrap(), 50);
        assert_eq!(search::validate_limit(10, 50).unwrap(), 10);
    }

    #[test]
    fn gateway_range_validation() {
        assert!(gateway::validate_range(0, 1024, 4096).is_ok());
        assert!(gateway::validate_range(0, 0, 4096).is_err());
        assert!(gateway::validate_range(0, 8192, 4096).is_err());
    }
}
