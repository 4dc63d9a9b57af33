//! Container sniffing: PDF, ZIP family (docx/xlsx/pptx/epub/apk/plain-zip),
//! HTML, and a CAR-format heuristic.

#[derive(Debug, Clone)]
pub struct ContainerVerdict {
    pub kind: &'static str,
    pub mime: &'static str,
    pub ext: Option<&'static str>,
    pub container: &'static str,
    pub confidence: f64,
    pub office_subtype: Option<&'static str>,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

fn sniff_zip_family(sample: &[u8]) -> Option<ContainerVerdict> {
    if !sample.starts_with(b"PK\x03\x04") {
        return None;
    }

    if contains(sample, b"word/document.xml") {
        return Some(ContainerVerdict {
            kind: "doc",
            mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ext: Some("docx"),
            container: "zip",
            confidence: 0.97,
            office_subtype: Some("docx"),
        });
    }
    if contains(sample, b"xl/workbook.xml") {
        return Some(ContainerVerdict {
            kind: "doc",
            mime: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ext: Some("xlsx"),
            container: "zip",
            confidence: 0.97,
            office_subtype: Some("xlsx"),
        });
    }
    if contains(sample, b"ppt/presentation.xml") {
        return Some(ContainerVerdict {
            kind: "doc",
            mime: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            ext: Some("pptx"),
            container: "zip",
            confidence: 0.97,
            office_subtype: Some("pptx"),
        });
    }
    if contains(sample, b"mimetypeapplication/epub+zip") || contains(sample, b"application/epub+zip") {
        return Some(ContainerVerdict {
            kind: "doc",
            mime: "application/epub+zip",
            ext: Some("epub"),
            container: "epub",
            confidence: 0.96,
            office_subtype: None,
        });
    }
    if contains(sample, b"AndroidManifest.xml") {
        return Some(ContainerVerdict {
            kind: "package",
            mime: "application/vnd.android.package-archive",
            ext: Some("apk"),
            container: "zip",
            confidence: 0.95,
            office_subtype: None,
        });
    }

    Some(ContainerVerdict {
        kind: "archive",
        mime: "application/zip",
        ext: Some("zip"),
        container: "zip",
        confidence: 0.7,
        office_subtype: None,
    })
}

fn sniff_html(sample: &[u8]) -> Option<ContainerVerdict> {
    let head = &sample[..sample.len().min(1024)];
    let lower: Vec<u8> = head.iter().map(|b| b.to_ascii_lowercase()).collect();
    let markers: &[&[u8]] = &[b"<html", b"<!doctype html", b"<head", b"<body"];
    if markers.iter().any(|m| contains(&lower, m)) {
        return Some(ContainerVerdict {
            kind: "html",
            mime: "text/html",
            ext: Some("html"),
            container: "html",
            confidence: 0.9,
            office_subtype: None,
        });
    }
    None
}

/// Decode an unsigned LEB128 varint from the start of `bytes`, returning the
/// value and the number of bytes consumed.
fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate().take(9) {
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Heuristic CAR (DAG-CBOR varint-framed) detection: a small leading varint
/// naming the header frame's body length, followed by a CBOR map header
/// byte and the ASCII tokens `version`/`roots` within the first 256 bytes.
fn sniff_car(sample: &[u8]) -> Option<ContainerVerdict> {
    let (frame_len, consumed) = read_uvarint(sample)?;
    if frame_len == 0 || frame_len > 4096 {
        return None;
    }
    let body_start = consumed;
    let body_byte = *sample.get(body_start)?;
    // CBOR map header: major type 5 (0xA0-0xBF).
    if body_byte & 0xE0 != 0xA0 {
        return None;
    }
    let window = &sample[..sample.len().min(256)];
    if contains(window, b"version") && contains(window, b"roots") {
        return Some(ContainerVerdict {
            kind: "ipld",
            mime: "application/vnd.ipld.car",
            ext: Some("car"),
            container: "car",
            confidence: 0.88,
            office_subtype: None,
        });
    }
    None
}

/// Try each container sniffer in spec order, returning the first match.
pub fn sniff(sample: &[u8]) -> Option<ContainerVerdict> {
    if let Some(v) = sample
        .starts_with(b"%PDF-")
        .then(|| ContainerVerdict {
            kind: "doc",
            mime: "application/pdf",
            ext: Some("pdf"),
            container: "pdf",
            confidence: 0.95,
            office_subtype: None,
        })
    {
        return Some(v);
    }
    if let Some(v) = sniff_zip_family(sample) {
        return Some(v);
    }
    if let Some(v) = sniff_html(sample) {
        return Some(v);
    }
    sniff_car(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_docx_inside_zip_container() {
        let mut sample = b"PK\x03\x04".to_vec();
        sample.extend_from_slice(b"word/document.xml padding bytes here");
        let verdict = sniff(&sample).unwrap();
        assert_eq!(verdict.ext, Some("docx"));
        assert_eq!(verdict.confidence, 0.97);
    }

    #[test]
    fn plain_zip_falls_back_to_generic() {
        let sample = b"PK\x03\x04some random zip bytes without office markers";
        let verdict = sniff(sample).unwrap();
        assert_eq!(verdict.container, "zip");
        assert_eq!(verdict.mime, "application/zip");
    }

    #[test]
    fn detects_html_doctype() {
        let sample = b"<!doctype html><html><head><title>Docs</title></head></html>";
        let verdict = sniff(sample).unwrap();
        assert_eq!(verdict.kind, "html");
    }

    #[test]
    fn detects_car_varint_header() {
        let mut sample = vec![0x20]; // varint: frame length 32
        sample.push(0xA2); // CBOR map, 2 entries
        sample.extend_from_slice(b"version1roots[...]padding to reach length");
        let verdict = sniff(&sample);
        assert!(verdict.is_some());
        assert_eq!(verdict.unwrap().container, "car");
    }

    #[test]
    fn non_container_bytes_return_none() {
        assert!(sniff(b"just some arbitrary binary \x00\x01\x02").is_none());
    }
}
