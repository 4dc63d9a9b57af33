//! Content analyzer: given a detection verdict, extracts tokens, topics, and
//! a content class; delegates image/long-text enrichment to the tagger.

use crate::contracts::{Tagger, TaggerOutput};
use crate::detector::Verdict;
use crate::tokenize::{derive_topics, tokenize, Lang};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub topics: Vec<String>,
    pub tokens: HashMap<String, u32>,
    pub content_class: Option<String>,
    pub lang: Option<String>,
    pub confidence: f64,
}

fn strip_html_noise(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let lower = html.to_ascii_lowercase();
    let mut i = 0;
    let bytes = html.as_bytes();
    while i < bytes.len() {
        if let Some(end_tag) = skip_until {
            if lower[i..].starts_with(end_tag) {
                skip_until = None;
                i += end_tag.len();
                continue;
            }
            i += 1;
            continue;
        }
        let c = bytes[i] as char;
        if c == '<' {
            if lower[i..].starts_with("<script") {
                skip_until = Some("</script>");
            } else if lower[i..].starts_with("<style") {
                skip_until = Some("</style>");
            } else if lower[i..].starts_with("<!--") {
                skip_until = Some("-->");
            }
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
            out.push(' ');
        } else if !in_tag {
            out.push(c);
        }
        i += 1;
    }
    out
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let content_start = lower[start..].find('>')? + start + 1;
    let end = lower[content_start..].find("</title>")? + content_start;
    Some(decode_entities(html[content_start..end].trim()))
}

fn extract_meta(html: &str, names: &[&str]) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    for name in names {
        let needle = format!("name=\"{name}\"");
        let prop_needle = format!("property=\"{name}\"");
        for marker in [needle.as_str(), prop_needle.as_str()] {
            if let Some(pos) = lower.find(marker) {
                let tail = &html[pos..];
                if let Some(content_pos) = tail.find("content=\"") {
                    let content_start = pos + content_pos + "content=\"".len();
                    if let Some(end_rel) = html[content_start..].find('"') {
                        return Some(decode_entities(&html[content_start..content_start + end_rel]));
                    }
                }
            }
        }
    }
    None
}

async fn analyze_html(html: &str, tagger: &dyn Tagger, cid: &str) -> AnalysisResult {
    let title = extract_title(html).unwrap_or_default();
    let description = extract_meta(html, &["description", "og:title", "twitter:description"])
        .unwrap_or_default();
    let body = strip_html_noise(html);
    let combined = format!("{title} {description} {body}");

    let mut tokens = tokenize(&combined, Lang::En);
    let mut topics = derive_topics(&tokens);

    if let Ok(tagged) = tagger.classify(cid, Some("text/html"), combined.as_bytes()).await {
        merge_tagger_output(&mut tokens, &mut topics, &tagged);
    }

    AnalysisResult {
        topics,
        tokens,
        content_class: Some("site".to_string()),
        lang: Some("en".to_string()),
        confidence: 0.85,
    }
}

async fn analyze_text_doc(text: &str, tagger: &dyn Tagger, cid: &str) -> AnalysisResult {
    let first_lines: String = text.lines().take(20).collect::<Vec<_>>().join("\n");
    let is_subtitle = first_lines.contains("-->");

    let mut tokens = tokenize(&first_lines, Lang::En);
    let mut topics = derive_topics(&tokens);

    if let Ok(tagged) = tagger.classify(cid, Some("text/plain"), first_lines.as_bytes()).await {
        merge_tagger_output(&mut tokens, &mut topics, &tagged);
    }

    AnalysisResult {
        topics,
        tokens,
        content_class: Some(if is_subtitle { "video".to_string() } else { "doc".to_string() }),
        lang: Some("en".to_string()),
        confidence: 0.75,
    }
}

async fn analyze_image(filename: &str, cid: &str, tagger: &dyn Tagger) -> AnalysisResult {
    let mut tokens = tokenize(filename, Lang::En);
    let topics = derive_topics(&tokens);

    if let Ok(tagged) = tagger.classify(cid, Some("image"), filename.as_bytes()).await {
        let mut topics = topics;
        merge_tagger_output(&mut tokens, &mut topics, &tagged);
        return AnalysisResult {
            topics,
            tokens,
            content_class: Some("image".to_string()),
            lang: None,
            confidence: 0.7,
        };
    }

    AnalysisResult {
        topics,
        tokens,
        content_class: Some("image".to_string()),
        lang: None,
        confidence: 0.7,
    }
}

fn analyze_video(filename: &str, ext: Option<&str>) -> AnalysisResult {
    let mut tokens = tokenize(filename, Lang::En);
    tokens.insert("video".to_string(), 1);
    if let Some(ext) = ext {
        tokens.insert(ext.to_string(), 1);
    }
    let topics = derive_topics(&tokens);
    AnalysisResult {
        topics,
        tokens,
        content_class: Some("video".to_string()),
        lang: None,
        confidence: 0.75,
    }
}

fn merge_tagger_output(
    tokens: &mut HashMap<String, u32>,
    topics: &mut Vec<String>,
    tagged: &TaggerOutput,
) {
    for tag in &tagged.tags {
        *tokens.entry(tag.clone()).or_insert(0) += 1;
    }
    let mut merged_topics = tagged.topics.clone();
    for topic in topics.drain(..) {
        if !merged_topics.contains(&topic) {
            merged_topics.push(topic);
        }
    }
    *topics = merged_topics;
}

/// Dispatch content analysis by detected kind. Returns `None` for kinds with
/// no content-analysis support (per the analyzer's dispatch contract).
pub async fn analyze(
    verdict: &Verdict,
    body: &[u8],
    filename: Option<&str>,
    cid: &str,
    tagger: &dyn Tagger,
) -> Option<AnalysisResult> {
    match verdict.kind.as_str() {
        "html" => {
            let html = String::from_utf8_lossy(body);
            Some(analyze_html(&html, tagger, cid).await)
        }
        "text" | "doc" => {
            let text = String::from_utf8_lossy(body);
            Some(analyze_text_doc(&text, tagger, cid).await)
        }
        "image" => {
            let name = filename.unwrap_or(cid);
            Some(analyze_image(name, cid, tagger).await)
        }
        "video" => {
            let name = filename.unwrap_or(cid);
            Some(analyze_video(name, verdict.ext_guess.as_deref()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullTagger;

    #[async_trait]
    impl Tagger for NullTagger {
        async fn classify(&self, _cid: &str, _mime: Option<&str>, _sample: &[u8]) -> anyhow::Result<TaggerOutput> {
            Err(anyhow::anyhow!("no tagger configured"))
        }
    }

    #[test]
    fn extract_title_finds_title_tag() {
        let html = "<html><head><title>Docs</title></head></html>";
        assert_eq!(extract_title(html), Some("Docs".to_string()));
    }

    #[test]
    fn extract_meta_finds_description() {
        let html = r#"<meta name="description" content="Hi there">"#;
        assert_eq!(extract_meta(html, &["description"]), Some("Hi there".to_string()));
    }

    #[test]
    fn strip_html_noise_removes_script_and_style() {
        let html = "<html><script>evil()</script><style>.a{}</style><body>hello world</body></html>";
        let stripped = strip_html_noise(html);
        assert!(!stripped.contains("evil"));
        assert!(stripped.contains("hello world"));
    }

    #[tokio::test]
    async fn analyze_html_produces_site_content_class_and_topics() {
        let html = "<!doctype html><html><head><title>Docs</title><meta name=\"description\" content=\"Hi\"></head><body>lorem ipsum docs</body></html>";
        let result = analyze_html(html, &NullTagger, "cid1").await;
        assert_eq!(result.content_class, Some("site".to_string()));
        assert!(result.topics.contains(&"docs".to_string()));
    }

    #[tokio::test]
    async fn analyze_text_doc_detects_subtitle_tracks() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nHello world\n";
        let result = analyze_text_doc(srt, &NullTagger, "cid2").await;
        assert_eq!(result.content_class, Some("video".to_string()));
    }

    #[test]
    fn analyze_video_includes_base_tokens() {
        let result = analyze_video("movie.mp4", Some("mp4"));
        assert!(result.tokens.contains_key("video"));
        assert!(result.tokens.contains_key("mp4"));
        assert_eq!(result.confidence, 0.75);
    }
}
