//! Multi-signal type/MIME detection: HEAD probe -> byte-window sampling ->
//! magic-byte detection -> container sniffing -> optional external
//! classifier -> textual heuristic fallback -> confidence arbitration.

mod container;
mod heuristic;
mod magic;

use crate::config::Config;
use crate::contracts::{GatewayClient, GatewaySample, Signals};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque version string baked into every verdict. Bumping this forces the
/// type crawler to re-detect every present row.
pub const DETECTOR_VERSION: &str = "cid-catalog-detector-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: String,
    pub mime: Option<String>,
    pub ext_guess: Option<String>,
    pub confidence: f64,
    pub source: String,
    pub container: Option<String>,
    pub office_subtype: Option<String>,
    pub signals: Signals,
    pub detector_version: String,
    pub size: Option<u64>,
    pub disagreement: bool,
    pub warnings: Vec<String>,
    pub sample: Vec<u8>,
}

struct Candidate {
    kind: &'static str,
    mime: Option<String>,
    ext: Option<&'static str>,
    confidence: f64,
    source: &'static str,
    container: Option<&'static str>,
    office_subtype: Option<&'static str>,
}

fn excluded_media(content_type: &str) -> bool {
    content_type.starts_with("video/") || content_type.starts_with("audio/")
}

/// Run the full detection pipeline for one CID.
pub async fn detect(
    config: &Config,
    gateway: &Arc<dyn GatewayClient>,
    cid: &str,
    external_classifier: Option<&(dyn Fn(&[u8], &[u8]) -> Option<magic::ExternalVerdict> + Send + Sync)>,
) -> anyhow::Result<Verdict> {
    let head_content_type = gateway.head(cid).await.unwrap_or(None);

    if let Some(ref ct) = head_content_type {
        if excluded_media(ct) {
            return Ok(Verdict {
                kind: "unknown".to_string(),
                mime: Some(ct.clone()),
                ext_guess: None,
                confidence: 0.7,
                source: "head".to_string(),
                container: None,
                office_subtype: None,
                signals: Signals {
                    http_content_type: Some(ct.clone()),
                    ..Signals::default()
                },
                detector_version: DETECTOR_VERSION.to_string(),
                size: None,
                disagreement: false,
                warnings: vec!["excluded_media".to_string()],
                sample: Vec::new(),
            });
        }
    }

    let sample = gateway
        .fetch_range(cid, 0, config.sample_bytes)
        .await?;
    let range_ignored = sample.range_ignored;
    if range_ignored {
        crate::metrics::increment_range_ignored();
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut signals = Signals {
        http_content_type: head_content_type.clone().or_else(|| sample.content_type.clone()),
        range_ignored: Some(range_ignored),
        ..Signals::default()
    };

    let magic_verdict = magic::detect(&sample.bytes);
    if let Some(ref m) = magic_verdict {
        signals.magic = Some(m.mime.clone());
        candidates.push(Candidate {
            kind: m.kind,
            mime: Some(m.mime.clone()),
            ext: m.ext,
            confidence: m.confidence,
            source: "magic",
            container: None,
            office_subtype: None,
        });

        let is_generic_zip = m.mime == "application/zip";
        if m.confidence >= 0.95 && !is_generic_zip {
            return finalize(candidates, signals, sample, DETECTOR_VERSION);
        }
    }

    if let Some(c) = container::sniff(&sample.bytes) {
        signals.container = Some(c.container.to_string());
        let confidence = c.confidence;
        candidates.push(Candidate {
            kind: c.kind,
            mime: Some(c.mime.to_string()),
            ext: c.ext,
            confidence,
            source: "container",
            container: Some(c.container),
            office_subtype: c.office_subtype,
        });
        if confidence >= 0.85 {
            return finalize(candidates, signals, sample, DETECTOR_VERSION);
        }
    }

    if let Some(classify) = external_classifier {
        let tail = &sample.bytes[sample.bytes.len().saturating_sub(4096)..];
        if let Some(ev) = classify(&sample.bytes, tail) {
            signals.external_classifier = Some(ev.mime.clone());
            candidates.push(Candidate {
                kind: ev.kind,
                mime: Some(ev.mime),
                ext: ev.ext,
                confidence: ev.confidence,
                source: "external-classifier",
                container: None,
                office_subtype: None,
            });
        }
    }

    if let Some(h) = heuristic::detect(&sample.bytes) {
        signals.heuristic = Some(h.mime.to_string());
        candidates.push(Candidate {
            kind: h.kind,
            mime: Some(h.mime.to_string()),
            ext: h.ext,
            confidence: h.confidence,
            source: "heuristic",
            container: None,
            office_subtype: None,
        });
    }

    finalize(candidates, signals, sample, DETECTOR_VERSION)
}

fn finalize(
    candidates: Vec<Candidate>,
    signals: Signals,
    sample: GatewaySample,
    detector_version: &str,
) -> anyhow::Result<Verdict> {
    if candidates.is_empty() {
        return Ok(Verdict {
            kind: "unknown".to_string(),
            mime: None,
            ext_guess: None,
            confidence: 0.0,
            source: "none".to_string(),
            container: None,
            office_subtype: None,
            signals,
            detector_version: detector_version.to_string(),
            size: sample.total_size,
            disagreement: false,
            warnings: vec!["no_signal".to_string()],
            sample: sample.bytes,
        });
    }

    let winner_idx = candidates
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.confidence.partial_cmp(&b.confidence).unwrap())
        .map(|(idx, _)| idx)
        .unwrap();

    let disagreement = candidates.iter().any(|c| {
        (c.kind, &c.mime) != (candidates[winner_idx].kind, &candidates[winner_idx].mime)
    });

    let winner = &candidates[winner_idx];
    Ok(Verdict {
        kind: winner.kind.to_string(),
        mime: winner.mime.clone(),
        ext_guess: winner.ext.map(|s| s.to_string()),
        confidence: winner.confidence.clamp(0.0, 1.0),
        source: winner.source.to_string(),
        container: winner.container.map(|s| s.to_string()),
        office_subtype: winner.office_subtype.map(|s| s.to_string()),
        signals,
        detector_version: detector_version.to_string(),
        size: sample.total_size,
        disagreement,
        warnings: Vec::new(),
        sample: sample.bytes,
    })
}
