// cid-catalog - durable catalogue and search index for CIDs pinned on a
// content-addressed storage node.

use anyhow::Result;
use cid_catalog::config::Config;
use cid_catalog::contracts::{GatewayClient, NodeRpc, Tagger};
use cid_catalog::gateway::HttpGatewayClient;
use cid_catalog::node_rpc::HttpNodeRpc;
use cid_catalog::store::Store;
use cid_catalog::tagger::{FallbackTagger, WorkerTagger};
use cid_catalog::workers::{self, WorkerDeps};
use cid_catalog::{http_server, init_logging, log_operation, Operation};
use cid_catalog::observability::OperationContext;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = Arc::new(Config::load());
    let ctx = OperationContext::new("startup");
    log_operation(
        &ctx,
        &Operation::Startup {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        &Ok(()),
    );

    let store = Arc::new(Store::open(&config).await?);
    let node_rpc: Arc<dyn NodeRpc> = Arc::new(HttpNodeRpc::new(&config)?);
    let gateway: Arc<dyn GatewayClient> = Arc::new(HttpGatewayClient::new(&config)?);
    let tagger: Arc<dyn Tagger> = build_tagger(&config);

    let deps = WorkerDeps {
        store: store.clone(),
        config: config.clone(),
        node_rpc,
        gateway,
        tagger,
    };
    let _workers = workers::spawn_all(deps);

    let app = http_server::create_server(store);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "cid-catalog listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let ctx = OperationContext::new("shutdown");
    log_operation(
        &ctx,
        &Operation::Shutdown {
            reason: "ctrl_c".to_string(),
        },
        &Ok(()),
    );
    Ok(())
}

fn build_tagger(config: &Config) -> Arc<dyn Tagger> {
    if !config.text_tagger_enable && !config.image_tagger_enable {
        return Arc::new(FallbackTagger::<WorkerTagger>::new(None));
    }

    if config.ml_worker_enable {
        if let Some(command) = &config.ml_worker_command {
            let worker = WorkerTagger::new(command.clone(), config.ml_worker_task_timeout());
            return Arc::new(FallbackTagger::new(Some(worker)));
        }
    }

    Arc::new(FallbackTagger::<WorkerTagger>::new(None))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl_c handler");
}
