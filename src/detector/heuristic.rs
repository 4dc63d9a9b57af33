//! Textual heuristic fallback: printable-ratio text detection with a
//! PDF-object-stream rescue for mis-detected PDFs.

#[derive(Debug, Clone)]
pub struct HeuristicVerdict {
    pub kind: &'static str,
    pub mime: &'static str,
    pub ext: Option<&'static str>,
    pub confidence: f64,
}

const PDF_STRUCTURE_TOKENS: &[&[u8]] =
    &[b"obj", b"endobj", b"xref", b"trailer", b"stream", b"endstream"];
const PDF_DICTIONARY_TOKENS: &[&[u8]] = &[
    b"FlateDecode",
    b"XObject",
    b"ColorSpace",
    b"BitsPerComponent",
    b"MediaBox",
    b"CropBox",
    b"Resources",
    b"Font",
];

fn count_matches(haystack: &[u8], needles: &[&[u8]]) -> usize {
    needles
        .iter()
        .filter(|needle| haystack.windows(needle.len()).any(|w| w == **needle))
        .count()
}

fn printable_ratio(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let printable = sample
        .iter()
        .filter(|&&b| (0x20..=0x7e).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'))
        .count();
    printable as f64 / sample.len() as f64
}

/// Textual fallback over the head sample (first 4 KiB considered).
pub fn detect(sample: &[u8]) -> Option<HeuristicVerdict> {
    let window = &sample[..sample.len().min(4096)];
    let has_null = window.contains(&0u8);

    let structure_score = count_matches(window, PDF_STRUCTURE_TOKENS);
    let dictionary_score = count_matches(window, PDF_DICTIONARY_TOKENS);
    let has_stream_markers = window.windows(6).any(|w| w == b"stream")
        && window.windows(9).any(|w| w == b"endstream");

    if structure_score >= 4 || (dictionary_score >= 3 && has_stream_markers) {
        return Some(HeuristicVerdict {
            kind: "doc",
            mime: "application/pdf",
            ext: Some("pdf"),
            confidence: 0.8,
        });
    }

    let ratio = printable_ratio(window);
    if ratio >= 0.8 && !has_null {
        return Some(HeuristicVerdict {
            kind: "text",
            mime: "text/plain",
            ext: Some("txt"),
            confidence: 0.6,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescues_pdf_object_stream_structure() {
        let sample = b"1 0 obj\n<<>>\nendobj\n2 0 obj\nstream\ndata\nendstream\nendobj\nxref\ntrailer\n";
        let verdict = detect(sample).unwrap();
        assert_eq!(verdict.mime, "application/pdf");
    }

    #[test]
    fn rescues_pdf_dictionary_heavy_stream() {
        let sample = b"/FlateDecode /XObject /ColorSpace /MediaBox stream\ndata\nendstream";
        let verdict = detect(sample).unwrap();
        assert_eq!(verdict.mime, "application/pdf");
    }

    #[test]
    fn detects_plain_text_by_printable_ratio() {
        let sample = b"Hello, this is a plain text file with normal ASCII content.";
        let verdict = detect(sample).unwrap();
        assert_eq!(verdict.mime, "text/plain");
    }

    #[test]
    fn binary_with_nulls_is_not_text() {
        let sample: Vec<u8> = vec![0, 1, 2, 3, 0, 5, 6, 0, 8];
        assert!(detect(&sample).is_none());
    }
}
