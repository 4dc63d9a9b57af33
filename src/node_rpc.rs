//! Storage-node RPC client: the two operations the ingestion pipeline needs
//! from the co-located node — the recursive pin set and directory listings.

use crate::config::Config;
use crate::contracts::{LinkKind, LsEntry, NodeRpc};
use crate::wrappers::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct PinsResponse {
    keys: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LsLink {
    #[serde(alias = "Hash", alias = "Cid")]
    hash: LinkHash,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size")]
    size: Option<i64>,
    #[serde(rename = "Type")]
    link_type: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinkHash {
    Plain(String),
    Wrapped { #[serde(rename = "/")] slash: String },
}

impl LinkHash {
    fn into_string(self) -> String {
        match self {
            LinkHash::Plain(s) => s,
            LinkHash::Wrapped { slash } => slash,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsObject {
    #[serde(rename = "Links", default)]
    links: Vec<LsLink>,
}

#[derive(Debug, Deserialize)]
struct LsResponse {
    #[serde(rename = "Objects", default)]
    objects: Vec<LsObject>,
}

pub struct HttpNodeRpc {
    client: Client,
    base: String,
    retry: RetryConfig,
}

impl HttpNodeRpc {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base: config.node_rpc_base.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }
}

fn link_kind(link_type: Option<i32>) -> LinkKind {
    match link_type {
        Some(1) => LinkKind::Directory,
        Some(2) => LinkKind::File,
        _ => LinkKind::Unknown,
    }
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    async fn list_pins(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/pins", self.base);
        let client = &self.client;
        let response: PinsResponse = retry_with_backoff("node_rpc_list_pins", self.retry, || {
            let client = client.clone();
            let url = url.clone();
            async move { Ok(client.post(&url).send().await?.json::<PinsResponse>().await?) }
        })
        .await?;

        Ok(response.keys.into_keys().collect())
    }

    async fn ls(&self, cid: &str) -> anyhow::Result<Vec<LsEntry>> {
        let url = format!("{}/ls?arg={cid}", self.base);
        let client = &self.client;
        let response: LsResponse = retry_with_backoff("node_rpc_ls", self.retry, || {
            let client = client.clone();
            let url = url.clone();
            async move { Ok(client.post(&url).send().await?.json::<LsResponse>().await?) }
        })
        .await?;

        Ok(response
            .objects
            .into_iter()
            .flat_map(|object| object.links)
            .map(|link| LsEntry {
                cid: link.hash.into_string(),
                name: link.name,
                kind: link_kind(link.link_type),
                size: link.size,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_kind_maps_ipfs_type_codes() {
        assert_eq!(link_kind(Some(1)), LinkKind::Directory);
        assert_eq!(link_kind(Some(2)), LinkKind::File);
        assert_eq!(link_kind(None), LinkKind::Unknown);
        assert_eq!(link_kind(Some(99)), LinkKind::Unknown);
    }

    #[test]
    fn parses_pins_response() {
        let json = r#"{"keys":{"cid1":{"Type":"recursive"},"cid2":{"Type":"recursive"}}}"#;
        let response: PinsResponse = serde_json::from_str(json).unwrap();
        let mut keys: Vec<_> = response.keys.into_keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["cid1".to_string(), "cid2".to_string()]);
    }

    #[test]
    fn parses_ls_response_with_plain_and_wrapped_hash() {
        let json = r#"{"Objects":[{"Links":[
            {"Hash":"cid1","Name":"a.html","Size":10,"Type":2},
            {"Cid":{"/":"cid2"},"Name":"sub","Size":0,"Type":1}
        ]}]}"#;
        let response: LsResponse = serde_json::from_str(json).unwrap();
        let links = &response.objects[0].links;
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn list_pins_hits_the_configured_base_url() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/pins"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"keys": {"cid1": {"Type": "recursive"}}}),
            ))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.node_rpc_base = server.uri();
        let rpc = HttpNodeRpc::new(&config).unwrap();

        let pins = rpc.list_pins().await.unwrap();
        assert_eq!(pins, vec!["cid1".to_string()]);
    }

    #[tokio::test]
    async fn ls_parses_a_live_response_from_the_node() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/ls"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Objects": [{"Links": [
                    {"Hash": "cid1", "Name": "a.html", "Size": 10, "Type": 2}
                ]}]
            })))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.node_rpc_base = server.uri();
        let rpc = HttpNodeRpc::new(&config).unwrap();

        let entries = rpc.ls("root").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cid, "cid1");
        assert_eq!(entries[0].kind, LinkKind::File);
    }
}
