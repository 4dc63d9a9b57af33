//! Periodic background tasks: pin synchronizer, type crawler, directory
//! expander. Each runs as a self-scheduling `tokio::time::interval` loop
//! guarded by a re-entrance flag so a slow tick is never doubled up by the
//! next one firing on schedule — adapted from the teacher's buffered-storage
//! flush-timer (`wrappers::buffered_storage`), generalized from a single
//! flush flag to three independent tick guards.

mod dir_expander;
mod pin_sync;
mod type_crawler;

use crate::config::Config;
use crate::contracts::{GatewayClient, NodeRpc, Tagger};
use crate::store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

/// Shared dependencies every worker closes over. Cloning is cheap: every
/// field is already an `Arc`.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub node_rpc: Arc<dyn NodeRpc>,
    pub gateway: Arc<dyn GatewayClient>,
    pub tagger: Arc<dyn Tagger>,
}

/// A running worker's join handle, aborted on drop so a shutdown never
/// leaves a detached tick loop behind.
pub struct WorkerHandle {
    handle: JoinHandle<()>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn all three periodic workers. Returns their handles; dropping the
/// returned `Vec` (or letting it go out of scope) stops every worker.
pub fn spawn_all(deps: WorkerDeps) -> Vec<WorkerHandle> {
    vec![
        spawn_tick_loop(
            "pin_sync",
            deps.config.pin_refresh_interval(),
            deps.clone(),
            |deps| Box::pin(pin_sync::run_once(deps)),
        ),
        spawn_tick_loop(
            "type_crawl",
            deps.config.type_refresh_interval(),
            deps.clone(),
            |deps| Box::pin(type_crawler::run_once(deps)),
        ),
        spawn_tick_loop(
            "dir_expand",
            deps.config.dir_refresh_interval(),
            deps,
            |deps| Box::pin(dir_expander::run_once(deps)),
        ),
    ]
}

type TickFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

fn spawn_tick_loop<F>(
    name: &'static str,
    period: std::time::Duration,
    deps: WorkerDeps,
    run_once: F,
) -> WorkerHandle
where
    F: Fn(WorkerDeps) -> TickFuture + Send + Sync + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let run_once = Arc::new(run_once);

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!(worker = name, "previous tick still running, skipping this one");
                continue;
            }

            let deps = deps.clone();
            let running = running.clone();
            let run_once = run_once.clone();
            tokio::spawn(async move {
                if let Err(err) = run_once(deps).await {
                    warn!(worker = name, error = %err, "worker tick failed");
                }
                running.store(false, Ordering::SeqCst);
            });
        }
    });

    WorkerHandle { handle }
}
