//! Prometheus text exporter for `/metrics` plus the in-memory HTTP request
//! duration summaries that accompany it. The durable counters (pins_current,
//! crawl/expand totals, ...) live in the `metrics` table and are read fresh
//! on every scrape; the request-duration summaries here are process-local
//! and reset on restart, like a typical Prometheus client's default
//! counters.

use crate::contracts::{Catalogue, CatalogueMetrics};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static RANGE_IGNORED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Bumped by the detector whenever the gateway ignores a range request and
/// serves the whole object instead of the requested window.
pub fn increment_range_ignored() {
    RANGE_IGNORED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn range_ignored_total() -> u64 {
    RANGE_IGNORED_TOTAL.load(Ordering::Relaxed)
}

#[derive(Debug, Default)]
struct RequestDuration {
    sum_ms: AtomicU64,
    count: AtomicU64,
    max_ms: AtomicU64,
}

impl RequestDuration {
    fn record(&self, millis: u64) {
        self.sum_ms.fetch_add(millis, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max_ms.fetch_max(millis, Ordering::Relaxed);
    }
}

/// Process-local HTTP request duration summaries, keyed by `(method, normalized path)`.
#[derive(Debug, Default)]
pub struct HttpMetrics {
    durations: DashMap<(String, String), RequestDuration>,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, path: &str, millis: u64) {
        let key = (method.to_string(), normalize_path(path));
        self.durations.entry(key).or_default().record(millis);
    }

    fn render(&self, out: &mut String) {
        for entry in self.durations.iter() {
            let (method, path) = entry.key();
            let d = entry.value();
            let labels = format!("method=\"{method}\",path=\"{path}\"");
            out.push_str(&format!(
                "indexer_http_request_duration_ms_sum{{{labels}}} {}\n",
                d.sum_ms.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "indexer_http_request_duration_ms_count{{{labels}}} {}\n",
                d.count.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "indexer_http_request_duration_ms_max{{{labels}}} {}\n",
                d.max_ms.load(Ordering::Relaxed)
            ));
        }
    }
}

/// Collapse `/cid/<anything>`, `/children/<anything>`, `/parents/<anything>`
/// into their route templates so per-CID cardinality never leaks into label
/// values.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if segments.len() == 2 {
        match segments[0] {
            "cid" | "children" | "parents" => segments[1] = ":cid",
            _ => {}
        }
    }
    format!("/{}", segments.join("/"))
}

fn push_gauge(out: &mut String, name: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("{name} {value}\n"));
}

/// Render the durable catalogue counters plus the in-memory HTTP duration
/// summaries as Prometheus exposition-format text.
pub async fn render(catalogue: &dyn Catalogue, http: &HttpMetrics) -> anyhow::Result<String> {
    let metrics = catalogue.metrics().await?;
    let mut out = String::new();
    render_catalogue(&mut out, &metrics);
    http.render(&mut out);
    Ok(out)
}

fn render_catalogue(out: &mut String, metrics: &CatalogueMetrics) {
    push_gauge(out, "indexer_cids_total", metrics.cids_total);
    push_gauge(out, "indexer_crawl_queue_depth", metrics.crawl_queue_depth);
    push_gauge(out, "indexer_expand_queue_depth", metrics.expand_queue_depth);
    push_gauge(out, "indexer_ipfs_range_ignored_total", range_ignored_total());

    let mut kinds: Vec<(&String, &i64)> = metrics.cids_by_kind.iter().collect();
    kinds.sort_by_key(|(k, _)| k.as_str());
    for (kind, count) in kinds {
        out.push_str(&format!("indexer_cids_by_kind{{kind=\"{kind}\"}} {count}\n"));
    }

    if let Some(ms) = metrics.last_pin_sync_ms {
        push_gauge(out, "indexer_last_pin_sync_timestamp_ms", ms);
    }
    if let Some(ms) = metrics.last_type_crawl_ms {
        push_gauge(out, "indexer_last_type_crawl_timestamp_ms", ms);
    }
    if let Some(ms) = metrics.last_dir_expand_ms {
        push_gauge(out, "indexer_last_dir_expand_timestamp_ms", ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_collapses_cid_segments() {
        assert_eq!(normalize_path("/cid/bafy123"), "/cid/:cid");
        assert_eq!(normalize_path("/children/bafy123"), "/children/:cid");
        assert_eq!(normalize_path("/parents/bafy123"), "/parents/:cid");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/search"), "/search");
    }

    #[test]
    fn http_metrics_aggregates_sum_count_max() {
        let http = HttpMetrics::new();
        http.record("GET", "/cid/bafy1", 10);
        http.record("GET", "/cid/bafy2", 30);
        http.record("GET", "/cid/bafy3", 20);

        let mut out = String::new();
        http.render(&mut out);
        assert!(out.contains("indexer_http_request_duration_ms_sum{method=\"GET\",path=\"/cid/:cid\"} 60"));
        assert!(out.contains("indexer_http_request_duration_ms_count{method=\"GET\",path=\"/cid/:cid\"} 3"));
        assert!(out.contains("indexer_http_request_duration_ms_max{method=\"GET\",path=\"/cid/:cid\"} 30"));
    }

    #[test]
    fn render_catalogue_emits_gauges_and_kind_breakdown() {
        let mut metrics = CatalogueMetrics::default();
        metrics.cids_total = 42;
        metrics.cids_by_kind.insert("file".to_string(), 30);
        metrics.cids_by_kind.insert("directory".to_string(), 12);
        metrics.last_pin_sync_ms = Some(1000);

        let mut out = String::new();
        render_catalogue(&mut out, &metrics);
        assert!(out.contains("indexer_cids_total 42"));
        assert!(out.contains("indexer_cids_by_kind{kind=\"directory\"} 12"));
        assert!(out.contains("indexer_cids_by_kind{kind=\"file\"} 30"));
        assert!(out.contains("indexer_last_pin_sync_timestamp_ms 1000"));
    }
}
