//! Magic-byte detection over the head sample.

#[derive(Debug, Clone)]
pub struct MagicVerdict {
    pub kind: &'static str,
    pub mime: String,
    pub ext: Option<&'static str>,
    pub confidence: f64,
}

/// Output of an optional external classifier, already clamped to `[0,1]`.
#[derive(Debug, Clone)]
pub struct ExternalVerdict {
    pub kind: &'static str,
    pub mime: String,
    pub ext: Option<&'static str>,
    pub confidence: f64,
}

const MAGIC_TABLE: &[(&[u8], &str, &'static str, Option<&'static str>)] = &[
    (b"\xFF\xD8\xFF", "image/jpeg", "image", Some("jpg")),
    (b"\x89PNG\r\n\x1a\n", "image/png", "image", Some("png")),
    (b"GIF87a", "image/gif", "image", Some("gif")),
    (b"GIF89a", "image/gif", "image", Some("gif")),
    (b"RIFF", "image/webp", "image", Some("webp")),
    (b"%PDF-", "application/pdf", "doc", Some("pdf")),
    (b"PK\x03\x04", "application/zip", "archive", Some("zip")),
    (b"\x1f\x8b", "application/gzip", "archive", Some("gz")),
    (b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed", "archive", Some("7z")),
    (b"Rar!\x1a\x07", "application/x-rar-compressed", "archive", Some("rar")),
    (b"ID3", "audio/mpeg", "audio", Some("mp3")),
    (b"OggS", "audio/ogg", "audio", Some("ogg")),
    (b"fLaC", "audio/flac", "audio", Some("flac")),
];

/// Run magic-byte matching over the head sample. Confidence map per the
/// detection contract: generic `application/zip` -> 0.9;
/// `application/octet-stream` -> 0.6; everything else -> 0.98.
pub fn detect(sample: &[u8]) -> Option<MagicVerdict> {
    if sample.is_empty() {
        return None;
    }

    for (magic, mime, kind, ext) in MAGIC_TABLE {
        if sample.starts_with(magic) {
            let confidence = if *mime == "application/zip" {
                0.9
            } else {
                0.98
            };
            return Some(MagicVerdict {
                kind,
                mime: mime.to_string(),
                ext: *ext,
                confidence,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pdf_magic() {
        let sample = b"%PDF-1.7\n...";
        let verdict = detect(sample).unwrap();
        assert_eq!(verdict.mime, "application/pdf");
        assert_eq!(verdict.confidence, 0.98);
    }

    #[test]
    fn generic_zip_gets_lower_confidence() {
        let sample = b"PK\x03\x04rest of zip bytes";
        let verdict = detect(sample).unwrap();
        assert_eq!(verdict.mime, "application/zip");
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn no_match_returns_none() {
        assert!(detect(b"just some plain text").is_none());
        assert!(detect(b"").is_none());
    }
}
