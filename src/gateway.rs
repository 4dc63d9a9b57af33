//! Range-aware HTTP gateway client. Fetches content by CID, tolerating
//! gateways that ignore `Range` requests, and caps body reads at a
//! caller-supplied byte limit.

use crate::config::Config;
use crate::contracts::{GatewayClient, GatewaySample};
use crate::wrappers::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

pub struct HttpGatewayClient {
    client: Client,
    base: String,
    retry: RetryConfig,
}

impl HttpGatewayClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base: config.gateway_base.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    fn url(&self, cid: &str) -> String {
        format!("{}/content/{cid}", self.base)
    }
}

async fn read_body_limited(response: reqwest::Response, limit: u64) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(limit.min(1 << 20) as usize);
    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        bytes.extend_from_slice(&chunk);
        if bytes.len() as u64 >= limit {
            bytes.truncate(limit as usize);
            break;
        }
    }
    Ok(bytes)
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn head(&self, cid: &str) -> anyhow::Result<Option<String>> {
        let url = self.url(cid);
        let client = &self.client;
        let response = retry_with_backoff("gateway_head", self.retry, || {
            let client = client.clone();
            let url = url.clone();
            async move { Ok(client.head(&url).send().await?) }
        })
        .await?;

        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()))
    }

    async fn fetch_range(&self, cid: &str, offset: u64, len: u64) -> anyhow::Result<GatewaySample> {
        let url = self.url(cid);
        let client = &self.client;
        let range_header = format!("bytes={offset}-{}", offset + len.saturating_sub(1));

        let response = retry_with_backoff("gateway_fetch_range", self.retry, || {
            let client = client.clone();
            let url = url.clone();
            let range_header = range_header.clone();
            async move {
                Ok(client
                    .get(&url)
                    .header(reqwest::header::RANGE, range_header)
                    .send()
                    .await?)
            }
        })
        .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .is_some();
        let total_size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let range_ignored = status == reqwest::StatusCode::OK && !content_range;
        if range_ignored {
            warn!(cid, "gateway ignored range request, falling back to capped read");
        }

        let bytes = read_body_limited(response, len).await?;

        Ok(GatewaySample {
            bytes,
            content_type,
            total_size,
            range_ignored,
        })
    }
}
