//! Environment-variable configuration, parsed once at startup via `clap`'s
//! `env` derive feature and threaded through every component as `Arc<Config>`.
//! No component reads the environment directly.

use clap::Parser;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Parser)]
#[command(name = "cid-catalog", about = "Durable catalogue and search index for pinned CIDs")]
pub struct Config {
    #[arg(long, env = "NODE_RPC_BASE", default_value = "http://127.0.0.1:5001")]
    pub node_rpc_base: String,

    #[arg(long, env = "GATEWAY_BASE", default_value = "http://127.0.0.1:8080")]
    pub gateway_base: String,

    #[arg(long, env = "DB_PATH", default_value = "cid-catalog.db")]
    pub db_path: String,

    #[arg(long, env = "PORT", default_value_t = 8790)]
    pub port: u16,

    #[arg(long, env = "PIN_REFRESH_S", default_value_t = 1800)]
    pub pin_refresh_s: u64,

    #[arg(long, env = "TYPE_REFRESH_S", default_value_t = 300)]
    pub type_refresh_s: u64,

    #[arg(long, env = "DIR_REFRESH_S", default_value_t = 600)]
    pub dir_refresh_s: u64,

    #[arg(long, env = "SAMPLE_BYTES", default_value_t = 256 * 1024)]
    pub sample_bytes: u64,

    #[arg(long, env = "MAX_TOTAL_BYTES", default_value_t = 768 * 1024)]
    pub max_total_bytes: u64,

    #[arg(long, env = "CRAWL_CONCURRENCY", default_value_t = 3)]
    pub crawl_concurrency: usize,

    #[arg(long, env = "DIR_EXPAND_CONCURRENCY", default_value_t = 1)]
    pub dir_expand_concurrency: usize,

    #[arg(long, env = "DIR_EXPAND_MAX_CHILDREN", default_value_t = 1000)]
    pub dir_expand_max_children: usize,

    #[arg(long, env = "DIR_EXPAND_MAX_DEPTH", default_value_t = 10)]
    pub dir_expand_max_depth: i32,

    #[arg(long, env = "DIR_EXPAND_TTL_S", default_value_t = 86_400)]
    pub dir_expand_ttl_s: u64,

    #[arg(long, env = "DIR_EXPAND_MAX_BATCH", default_value_t = 50)]
    pub dir_expand_max_batch: usize,

    #[arg(long, env = "DIR_EXPAND_PRUNE_CHILDREN", default_value_t = true)]
    pub dir_expand_prune_children: bool,

    #[arg(long, env = "DIR_EXPAND_TRACK_PARENT", default_value_t = true)]
    pub dir_expand_track_parent: bool,

    #[arg(long, env = "PATH_INDEX_MAX_FILES_PER_ROOT", default_value_t = 1000)]
    pub path_index_max_files_per_root: usize,

    #[arg(long, env = "PATH_INDEX_MAX_DEPTH", default_value_t = 10)]
    pub path_index_max_depth: usize,

    #[arg(long, env = "PATH_INDEX_MAX_DIRS_PER_ROOT", default_value_t = 200)]
    pub path_index_max_dirs_per_root: usize,

    #[arg(long, env = "SEARCH_TOKEN_INDEX_MAX_TOKENS", default_value_t = 128)]
    pub search_token_index_max_tokens: usize,

    #[arg(long, env = "EXTERNAL_CLASSIFIER_URL")]
    pub external_classifier_url: Option<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 15_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "TEXT_TAGGER_ENABLE", default_value_t = true)]
    pub text_tagger_enable: bool,

    #[arg(long, env = "IMAGE_TAGGER_ENABLE", default_value_t = true)]
    pub image_tagger_enable: bool,

    #[arg(long, env = "ML_WORKER_ENABLE", default_value_t = false)]
    pub ml_worker_enable: bool,

    #[arg(long, env = "ML_WORKER_TASK_TIMEOUT_MS", default_value_t = 120_000)]
    pub ml_worker_task_timeout_ms: u64,

    #[arg(long, env = "ML_WORKER_COMMAND")]
    pub ml_worker_command: Option<String>,

    #[arg(long, env = "STORAGE_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub storage_busy_timeout_ms: u64,
}

impl Config {
    /// Parse from the environment, clamping out-of-range values with a
    /// logged warning rather than rejecting startup.
    pub fn load() -> Self {
        let mut config = Config::parse();
        config.clamp();
        config
    }

    fn clamp(&mut self) {
        let max_busy_ms = 60_000;
        if self.storage_busy_timeout_ms > max_busy_ms {
            warn!(
                "STORAGE_BUSY_TIMEOUT_MS {} exceeds max {}, clamping",
                self.storage_busy_timeout_ms, max_busy_ms
            );
            self.storage_busy_timeout_ms = max_busy_ms;
        }

        if self.sample_bytes == 0 {
            warn!("SAMPLE_BYTES must be positive, using default of 262144");
            self.sample_bytes = 256 * 1024;
        }

        if self.max_total_bytes < self.sample_bytes {
            warn!(
                "MAX_TOTAL_BYTES {} is smaller than SAMPLE_BYTES {}, raising to match",
                self.max_total_bytes, self.sample_bytes
            );
            self.max_total_bytes = self.sample_bytes;
        }

        if self.crawl_concurrency == 0 {
            warn!("CRAWL_CONCURRENCY must be >= 1, clamping to 1");
            self.crawl_concurrency = 1;
        }

        if self.dir_expand_concurrency == 0 {
            warn!("DIR_EXPAND_CONCURRENCY must be >= 1, clamping to 1");
            self.dir_expand_concurrency = 1;
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_busy_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ml_worker_task_timeout(&self) -> Duration {
        Duration::from_millis(self.ml_worker_task_timeout_ms)
    }

    pub fn pin_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.pin_refresh_s)
    }

    pub fn type_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.type_refresh_s)
    }

    pub fn dir_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.dir_refresh_s)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(std::iter::empty::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.port, 8790);
        assert_eq!(config.pin_refresh_s, 1800);
        assert_eq!(config.search_token_index_max_tokens, 128);
    }

    #[test]
    fn clamp_caps_busy_timeout() {
        let mut config = Config::default();
        config.storage_busy_timeout_ms = 999_999;
        config.clamp();
        assert_eq!(config.storage_busy_timeout_ms, 60_000);
    }

    #[test]
    fn clamp_raises_max_total_bytes_to_sample_bytes() {
        let mut config = Config::default();
        config.sample_bytes = 1_000_000;
        config.max_total_bytes = 100;
        config.clamp();
        assert_eq!(config.max_total_bytes, 1_000_000);
    }

    #[test]
    fn clamp_forces_minimum_concurrency() {
        let mut config = Config::default();
        config.crawl_concurrency = 0;
        config.dir_expand_concurrency = 0;
        config.clamp();
        assert_eq!(config.crawl_concurrency, 1);
        assert_eq!(config.dir_expand_concurrency, 1);
    }
}
