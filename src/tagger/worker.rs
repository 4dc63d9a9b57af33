//! Out-of-process tagger worker: newline-delimited JSON over stdio, request
//! multiplexing by numeric id, auto-restart with backoff on failure.

use crate::contracts::{Tagger, TaggerOutput};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, warn};

const BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Starting,
    Running,
    Backoff,
}

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    cid: &'a str,
    mime: Option<&'a str>,
    sample_base64: String,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    id: u64,
    #[serde(flatten)]
    output: TaggerOutput,
}

struct Supervisor {
    state: Mutex<WorkerState>,
    child: Mutex<Option<(Child, ChildStdin)>>,
    pending: Arc<DashMap<u64, oneshot::Sender<TaggerOutput>>>,
    next_id: AtomicU64,
    last_failure: Mutex<Option<Instant>>,
    command: String,
    call_timeout: Duration,
}

/// Worker-backed tagger. Spawns `command` on first use, restarting it after
/// any hard failure once the backoff deadline has passed.
pub struct WorkerTagger {
    supervisor: Arc<Supervisor>,
}

impl WorkerTagger {
    pub fn new(command: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            supervisor: Arc::new(Supervisor {
                state: Mutex::new(WorkerState::Idle),
                child: Mutex::new(None),
                pending: Arc::new(DashMap::new()),
                next_id: AtomicU64::new(1),
                last_failure: Mutex::new(None),
                command: command.into(),
                call_timeout,
            }),
        }
    }

    async fn ensure_started(&self) -> anyhow::Result<()> {
        let mut state = self.supervisor.state.lock().await;
        match *state {
            WorkerState::Running => return Ok(()),
            WorkerState::Backoff => {
                let last = *self.supervisor.last_failure.lock().await;
                if let Some(last) = last {
                    if last.elapsed() < BACKOFF {
                        anyhow::bail!("tagger worker in backoff");
                    }
                }
            }
            _ => {}
        }

        *state = WorkerState::Starting;
        drop(state);

        let mut parts = self.supervisor.command.split_whitespace();
        let program = parts.next().ok_or_else(|| anyhow::anyhow!("empty worker command"))?;
        let args: Vec<&str> = parts.collect();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout"))?;

        let pending = self.supervisor.pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(response) = serde_json::from_str::<WorkerResponse>(&line) {
                    if let Some((_, tx)) = pending.remove(&response.id) {
                        let _ = tx.send(response.output);
                    }
                }
            }
        });

        *self.supervisor.child.lock().await = Some((child, stdin));
        *self.supervisor.state.lock().await = WorkerState::Running;
        Ok(())
    }

    async fn mark_failed(&self) {
        *self.supervisor.state.lock().await = WorkerState::Backoff;
        *self.supervisor.last_failure.lock().await = Some(Instant::now());
        if let Some((mut child, _)) = self.supervisor.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl Tagger for WorkerTagger {
    async fn classify(&self, cid: &str, mime: Option<&str>, sample: &[u8]) -> anyhow::Result<TaggerOutput> {
        self.ensure_started().await?;

        let id = self.supervisor.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.supervisor.pending.insert(id, tx);

        let request = WorkerRequest {
            id,
            cid,
            mime,
            sample_base64: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                sample,
            ),
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut guard = self.supervisor.child.lock().await;
            match guard.as_mut() {
                Some((_, stdin)) => {
                    if stdin.write_all(line.as_bytes()).await.is_err() {
                        drop(guard);
                        self.supervisor.pending.remove(&id);
                        self.mark_failed().await;
                        anyhow::bail!("failed to write to tagger worker stdin");
                    }
                }
                None => {
                    self.supervisor.pending.remove(&id);
                    anyhow::bail!("tagger worker not running");
                }
            }
        }

        match tokio::time::timeout(self.supervisor.call_timeout, rx).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_)) => {
                warn!("tagger worker closed channel for request {id}");
                self.mark_failed().await;
                anyhow::bail!("tagger worker channel closed")
            }
            Err(_) => {
                error!("tagger worker call {id} timed out after {:?}", self.supervisor.call_timeout);
                self.supervisor.pending.remove(&id);
                self.mark_failed().await;
                anyhow::bail!("tagger worker call timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_started_fails_gracefully_for_missing_binary() {
        let tagger = WorkerTagger::new("definitely-not-a-real-binary-xyz", Duration::from_millis(100));
        let result = tagger.classify("cid1", None, b"hello").await;
        assert!(result.is_err());
    }
}
