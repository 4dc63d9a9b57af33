//! Structured logging and lightweight in-process diagnostics.
//!
//! This is deliberately separate from the durable counters in
//! [`crate::contracts::CatalogueMetrics`]: the atomics here are operator-facing
//! process diagnostics (reset on restart), while the `metrics` table backing
//! `/metrics` survives restarts and reflects catalogue state.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static CRAWL_COUNTER: AtomicU64 = AtomicU64::new(0);
static EXPAND_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize logging once at startup. Safe to call more than once (e.g. in
/// tests): a second call observes the subscriber is already set and is a
/// no-op rather than an error.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("cid_catalog=debug,info")
    } else {
        EnvFilter::new("cid_catalog=info,warn")
    };

    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("cid-catalog observability initialized");
            }
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

/// Structured operation kinds logged by the workers and HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    PinSyncTick {
        pinned_count: usize,
        newly_missing: usize,
    },
    TypeCrawlTick {
        candidates: usize,
    },
    DirExpandTick {
        candidates: usize,
    },
    CidDetect {
        cid: String,
        mime: Option<String>,
        confidence: f64,
    },
    GatewayFetch {
        cid: String,
        bytes: usize,
        range_ignored: bool,
    },
    NodeRpcCall {
        method: &'static str,
        cid: Option<String>,
    },
    TaggerCall {
        cid: String,
        timed_out: bool,
    },
    HttpRequest {
        method: String,
        path: String,
        status: u16,
    },
    Migration {
        columns_added: usize,
    },
    Startup {
        version: String,
    },
    Shutdown {
        reason: String,
    },
}

/// Operation context for tracing through the system.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[instrument(skip(ctx))]
pub fn log_operation(ctx: &OperationContext, op: &Operation, result: &Result<()>) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                parent_span_id = ?ctx.parent_span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "operation completed: {:?}", op
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                parent_span_id = ?ctx.parent_span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                error = %e,
                "operation failed: {:?}", op
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    match op {
        Operation::TypeCrawlTick { .. } => {
            CRAWL_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::DirExpandTick { .. } => {
            EXPAND_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

/// In-process diagnostics snapshot, separate from the durable `metrics`
/// table. Intended for operator debugging, not exposed on `/metrics`.
pub fn get_diagnostics() -> serde_json::Value {
    serde_json::json!({
        "operations_total": OPERATION_COUNTER.load(Ordering::Relaxed),
        "errors_total": ERROR_COUNTER.load(Ordering::Relaxed),
        "type_crawl_ticks": CRAWL_COUNTER.load(Ordering::Relaxed),
        "dir_expand_ticks": EXPAND_COUNTER.load(Ordering::Relaxed),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[instrument]
pub fn log_error_with_context(error: &anyhow::Error, ctx: &OperationContext) {
    let error_chain = error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");

    error!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        operation = %ctx.operation,
        error_chain = %error_chain,
        "error occurred during operation"
    );
}

/// Timer that logs its own duration on drop. Used to bracket the periodic
/// workers' tick bodies without manual before/after bookkeeping at every
/// early-return site.
pub struct PerfTimer {
    name: String,
    start: Instant,
    ctx: OperationContext,
}

impl PerfTimer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let ctx = OperationContext::new(&name);
        debug!(trace_id = %ctx.trace_id, span_id = %ctx.span_id, "timer started: {}", name);
        Self {
            name,
            start: Instant::now(),
            ctx,
        }
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        debug!(
            trace_id = %self.ctx.trace_id,
            span_id = %self.ctx.span_id,
            elapsed_ms = elapsed.as_millis(),
            "timer completed: {}", self.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_context_creates_linked_children() {
        let ctx = OperationContext::new("pin_sync_tick");
        assert_eq!(ctx.operation, "pin_sync_tick");
        assert!(ctx.parent_span_id.is_none());

        let child = ctx.child("upsert_pinned");
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.parent_span_id, Some(ctx.span_id));
    }

    #[test]
    fn log_operation_updates_counters_on_success_and_failure() {
        let ctx = OperationContext::new("type_crawl_tick");
        log_operation(
            &ctx,
            &Operation::TypeCrawlTick { candidates: 3 },
            &Ok(()),
        );
        log_operation(
            &ctx,
            &Operation::TypeCrawlTick { candidates: 0 },
            &Err(anyhow::anyhow!("boom")),
        );
        let diag = get_diagnostics();
        assert!(diag["operations_total"].as_u64().unwrap() >= 1);
        assert!(diag["errors_total"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn perf_timer_logs_on_drop() {
        {
            let _timer = PerfTimer::new("test_timer");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn logging_level_filters_parse() {
        for filter_str in ["error", "cid_catalog=debug,info", "cid_catalog=info,warn"] {
            assert!(EnvFilter::try_new(filter_str).is_ok());
        }
    }
}
