//! Retry-with-backoff helper shared by the gateway client and node RPC
//! client. Both talk to a co-located but unreliable HTTP surface, so both
//! want the same bounded-retry, jittered-exponential-backoff behavior rather
//! than duplicating a retry loop per call site.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }
}

/// Run `op` up to `config.max_attempts` times, sleeping with jittered
/// exponential backoff between attempts. `op_name` is only used for logging.
pub async fn retry_with_backoff<T, F, Fut>(op_name: &str, config: RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.base_delay;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{op_name} succeeded after {attempt} attempts");
                }
                return Ok(value);
            }
            Err(e) if attempt >= config.max_attempts => {
                error!("{op_name} failed after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{op_name} failed (attempt {attempt}/{}): {e}",
                    config.max_attempts
                );

                tokio::time::sleep(delay).await;

                delay = std::cmp::min(delay * 2, config.max_delay);
                let jitter = Duration::from_millis(rand::random::<u64>() % 100);
                delay += jitter;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(5));

        let result = retry_with_backoff("test_op", config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(2));

        let result: Result<()> = retry_with_backoff("test_op", config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::anyhow!("always fails")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
