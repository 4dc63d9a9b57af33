//! Deterministic tag synthesis. Pure function of detection + size signals —
//! no I/O, no randomness, order-stable output.

use crate::contracts::Signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Media,
    Document,
    Package,
    Unknown,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::Media => "media",
            Category::Document => "document",
            Category::Package => "package",
            Category::Unknown => "unknown",
        }
    }

    fn from_kind(kind: &str) -> Self {
        match kind {
            "image" | "video" | "audio" => Category::Media,
            "html" | "text" | "doc" => Category::Document,
            "archive" | "package" => Category::Package,
            _ => Category::Unknown,
        }
    }
}

fn confidence_band(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

/// Size bucket spanning 16x (4 doublings) per step from a 1 KiB base:
/// xs < 16 KiB, s < 256 KiB, m < 4096 KiB, l < 64 MiB, xl < 1 GiB, else xxl.
fn size_bucket(size_bytes: Option<i64>) -> Option<&'static str> {
    let size = size_bytes?;
    if size < 0 {
        return None;
    }
    let size = size as u64;
    const KIB: u64 = 1024;
    Some(if size < 16 * KIB {
        "xs"
    } else if size < 256 * KIB {
        "s"
    } else if size < 4096 * KIB {
        "m"
    } else if size < 64 * 1024 * KIB {
        "l"
    } else if size < 1024 * 1024 * KIB {
        "xl"
    } else {
        "xxl"
    })
}

/// Arguments to tag synthesis, mirroring the fields available on a detection
/// verdict plus the CID's size.
pub struct SynthesisInput<'a> {
    pub kind: &'a str,
    pub mime: Option<&'a str>,
    pub ext: Option<&'a str>,
    pub source: &'a str,
    pub confidence: f64,
    pub size_bytes: Option<i64>,
    pub container: Option<&'a str>,
    pub office_subtype: Option<&'a str>,
}

/// Synthesize the deterministic, order-stable tag set for one CID.
pub fn synthesize(input: &SynthesisInput) -> Vec<String> {
    let mut tags = Vec::new();

    tags.push(format!("kind:{}", input.kind));
    tags.push(format!("category:{}", Category::from_kind(input.kind).as_str()));

    if let Some(mime) = input.mime {
        tags.push(format!("mime:{mime}"));
    }
    if let Some(ext) = input.ext {
        tags.push(format!("ext:{ext}"));
    }

    tags.push(format!("detected_by:{}", input.source));
    tags.push(format!("confidence:{}", confidence_band(input.confidence)));

    if let Some(bucket) = size_bucket(input.size_bytes) {
        tags.push(format!("size_bucket:{bucket}"));
    }

    if let Some(container) = input.container {
        tags.push(format!("container:{container}"));
        if container == "epub" {
            tags.push("ebook:epub".to_string());
        }
    }

    if let Some(subtype) = input.office_subtype {
        tags.push(format!("office:{subtype}"));
    }

    if input.kind == "image" {
        tags.push("needs:metadata".to_string());
        tags.push("needs:ai_tags".to_string());
    }

    tags
}

/// Recompute the `Signals` disagreement flag: true iff at least two signal
/// sources disagree on the winning `(mime, kind)` pair. The synthesizer
/// itself does not re-derive signals; this helper is used by the detector
/// when assembling its final verdict.
pub fn signals_with_disagreement(mut signals: Signals, disagreement: bool) -> Signals {
    signals.disagreement = disagreement;
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_basic_pdf_tags() {
        let input = SynthesisInput {
            kind: "doc",
            mime: Some("application/pdf"),
            ext: Some("pdf"),
            source: "magic",
            confidence: 0.98,
            size_bytes: Some(1_024_000),
            container: Some("pdf"),
            office_subtype: None,
        };
        let tags = synthesize(&input);
        assert_eq!(
            tags,
            vec![
                "kind:doc",
                "category:document",
                "mime:application/pdf",
                "ext:pdf",
                "detected_by:magic",
                "confidence:high",
                "size_bucket:m",
                "container:pdf",
            ]
        );
    }

    #[test]
    fn synthesize_image_adds_needs_hints() {
        let input = SynthesisInput {
            kind: "image",
            mime: Some("image/png"),
            ext: Some("png"),
            source: "magic",
            confidence: 0.9,
            size_bytes: Some(500),
            container: None,
            office_subtype: None,
        };
        let tags = synthesize(&input);
        assert!(tags.contains(&"needs:metadata".to_string()));
        assert!(tags.contains(&"needs:ai_tags".to_string()));
        assert!(tags.contains(&"size_bucket:xs".to_string()));
    }

    #[test]
    fn synthesize_epub_adds_ebook_tag() {
        let input = SynthesisInput {
            kind: "doc",
            mime: Some("application/epub+zip"),
            ext: Some("epub"),
            source: "container",
            confidence: 0.95,
            size_bytes: None,
            container: Some("epub"),
            office_subtype: None,
        };
        let tags = synthesize(&input);
        assert!(tags.contains(&"ebook:epub".to_string()));
    }

    #[test]
    fn confidence_bands_split_at_thresholds() {
        assert_eq!(confidence_band(0.95), "high");
        assert_eq!(confidence_band(0.8), "high");
        assert_eq!(confidence_band(0.79), "medium");
        assert_eq!(confidence_band(0.5), "medium");
        assert_eq!(confidence_band(0.49), "low");
    }

    #[test]
    fn size_bucket_steps_16x_from_1kib() {
        assert_eq!(size_bucket(Some(500)), Some("xs"));
        assert_eq!(size_bucket(Some(50_000)), Some("s"));
        assert_eq!(size_bucket(Some(1_024_000)), Some("m"));
        assert_eq!(size_bucket(Some(10_000_000)), Some("l"));
        assert_eq!(size_bucket(Some(100_000_000)), Some("xl"));
        assert_eq!(size_bucket(Some(2_000_000_000)), Some("xxl"));
        assert_eq!(size_bucket(None), None);
    }
}
