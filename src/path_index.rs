//! Path-index construction for the directory expander.
//!
//! A pin-root directory's file tree is flattened into `cid_paths` rows of
//! `(root_cid, path, child_cid, mime_hint)` via a BFS walk. This module owns
//! the pure parts of that walk: segment sanitization, extension allow-listing,
//! and MIME-hint guessing. The BFS traversal itself (with its visited-set and
//! node RPC calls) lives in `workers::dir_expander`.

use std::path::{Component, Path};

/// Errors produced while normalizing a single path segment coming from an
/// untrusted `ls` response.
#[derive(Debug, thiserror::Error)]
pub enum PathSegmentError {
    #[error("directory traversal in entry name: {0}")]
    DirectoryTraversal(String),

    #[error("empty path after normalization")]
    EmptyPath,

    #[error("invalid unicode in entry name")]
    InvalidUnicode,

    #[error("suspicious characters in entry name: {0}")]
    SuspiciousCharacters(String),
}

/// Extensions worth indexing for full-text/site-entrypoint purposes. Anything
/// else is still counted toward the per-root budgets but not written to
/// `cid_paths`.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "html", "htm", "pdf", "epub", "txt", "md", "json", "xml", "srt", "vtt", "jpg", "jpeg", "png",
    "gif", "webp", "bmp", "svg", "mp4", "webm", "mkv", "mov", "mp3", "flac", "wav", "ogg",
];

/// Join a parent path with a child entry name, validating the entry name as a
/// single path segment (no separators, no traversal, no control characters).
/// Returns a POSIX-style path regardless of the host platform.
pub fn join_path(parent: &str, name: &str) -> Result<String, PathSegmentError> {
    let segment = sanitize_segment(name)?;
    if parent.is_empty() {
        Ok(segment)
    } else {
        Ok(format!("{parent}/{segment}"))
    }
}

/// Validate and normalize a single directory-entry name. The name must not
/// contain a path separator, must not be `.` or `..`, and must not contain
/// control or filesystem-hostile characters.
fn sanitize_segment(name: &str) -> Result<String, PathSegmentError> {
    if name.is_empty() {
        return Err(PathSegmentError::EmptyPath);
    }

    let path = Path::new(name);
    let mut components = path.components();
    let only = components.next();
    if components.next().is_some() {
        return Err(PathSegmentError::DirectoryTraversal(name.to_string()));
    }

    match only {
        Some(Component::Normal(part)) => {
            let part_str = part.to_str().ok_or(PathSegmentError::InvalidUnicode)?;
            check_suspicious_characters(part_str)?;
            Ok(part_str.to_string())
        }
        Some(Component::ParentDir) | Some(Component::CurDir) => {
            Err(PathSegmentError::DirectoryTraversal(name.to_string()))
        }
        _ => Err(PathSegmentError::EmptyPath),
    }
}

fn check_suspicious_characters(part: &str) -> Result<(), PathSegmentError> {
    const SUSPICIOUS_CHARS: &[char] =
        &['<', '>', ':', '"', '|', '?', '*', '\0', '\r', '\n', '/', '\\'];
    for &ch in SUSPICIOUS_CHARS {
        if part.contains(ch) {
            return Err(PathSegmentError::SuspiciousCharacters(format!(
                "found '{ch}' in entry name: {part}"
            )));
        }
    }
    Ok(())
}

/// Extract the lowercased extension from a path, if any.
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a path's extension is worth indexing into `cid_paths`.
pub fn is_indexable(path: &str) -> bool {
    match extension_of(path) {
        Some(ext) => ALLOWED_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Guess a MIME hint from a path's extension. Used only to seed `mime_hint`
/// before the type crawler ever samples the CID directly; the crawler's own
/// detection always wins once it runs.
pub fn guess_mime_hint(path: &str) -> Option<&'static str> {
    let ext = extension_of(path)?;
    let mime = match ext.as_str() {
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "xml" => "application/xml",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        _ => return None,
    };
    Some(mime)
}

/// Score a filename for likelihood of being a directory's site entrypoint.
/// Higher is better. `index.html` at the shallowest depth wins; other HTML
/// files are still candidates but scored lower.
pub fn entrypoint_score(path: &str, depth: usize) -> Option<i64> {
    let ext = extension_of(path)?;
    if ext != "html" && ext != "htm" {
        return None;
    }
    let name = Path::new(path).file_name()?.to_str()?;
    let name_score = if name.eq_ignore_ascii_case("index.html") || name.eq_ignore_ascii_case("index.htm")
    {
        1000
    } else {
        0
    };
    // Shallower paths score higher; depth is capped to keep the score positive.
    let depth_score = 100i64.saturating_sub(depth.min(100) as i64);
    Some(name_score + depth_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_builds_posix_paths() {
        assert_eq!(join_path("", "index.html").unwrap(), "index.html");
        assert_eq!(
            join_path("docs", "index.html").unwrap(),
            "docs/index.html"
        );
    }

    #[test]
    fn join_path_rejects_traversal() {
        assert!(join_path("docs", "..").is_err());
        assert!(join_path("docs", "../etc/passwd").is_err());
        assert!(join_path("docs", ".").is_err());
    }

    #[test]
    fn join_path_rejects_embedded_separator() {
        assert!(join_path("docs", "a/b").is_err());
        assert!(join_path("docs", "a\\b").is_err());
    }

    #[test]
    fn join_path_rejects_suspicious_characters() {
        assert!(join_path("docs", "file\0.txt").is_err());
        assert!(join_path("docs", "file|rm.txt").is_err());
    }

    #[test]
    fn is_indexable_checks_allow_list() {
        assert!(is_indexable("docs/index.html"));
        assert!(is_indexable("a/b/video.mp4"));
        assert!(!is_indexable("a/b/archive.zip"));
        assert!(!is_indexable("a/b/noext"));
    }

    #[test]
    fn guess_mime_hint_covers_common_extensions() {
        assert_eq!(guess_mime_hint("a.html"), Some("text/html"));
        assert_eq!(guess_mime_hint("a.PDF"), Some("application/pdf"));
        assert_eq!(guess_mime_hint("a.unknown"), None);
    }

    #[test]
    fn entrypoint_score_prefers_shallow_index_html() {
        let shallow_index = entrypoint_score("index.html", 0).unwrap();
        let deep_index = entrypoint_score("a/b/index.html", 2).unwrap();
        let shallow_other = entrypoint_score("a/about.html", 0).unwrap();
        assert!(shallow_index > deep_index);
        assert!(shallow_index > shallow_other);
        assert!(entrypoint_score("a.pdf", 0).is_none());
    }
}
