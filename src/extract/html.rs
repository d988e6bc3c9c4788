//! Webpage fetching and best-effort readable-text extraction.
//!
//! Stripping is regex-based: noisy elements are removed wholesale, the rest
//! of the tags become line separators, and common entities are decoded.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Elements whose content never contributes readable text.
const NOISE_ELEMENTS: [&str; 5] = ["script", "style", "nav", "footer", "header"];

lazy_static! {
    static ref NOISE: Vec<Regex> = NOISE_ELEMENTS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}>")).unwrap())
        .collect();
    static ref ASIDE: Regex = Regex::new(r"(?is)<aside\b[^>]*>.*?</aside>").unwrap();
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref TITLE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref MAIN: Regex = Regex::new(r"(?is)<main\b[^>]*>(.*?)</main>").unwrap();
    static ref ARTICLE: Regex = Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").unwrap();
    static ref CONTENT_DIV: Regex = Regex::new(
        r#"(?is)<div\b[^>]*(?:class|id)=["'][^"']*(?:content|main|article)[^"']*["'][^>]*>(.*?)</div>"#
    )
    .unwrap();
    static ref BODY: Regex = Regex::new(r"(?is)<body\b[^>]*>(.*?)</body>").unwrap();
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL format")]
    InvalidUrl,
    #[error("Request timed out")]
    Timeout,
    #[error("Could not connect to URL")]
    Connect,
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("Error fetching URL: {0}")]
    Other(String),
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn to_lines(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, "\n");
    let text = decode_entities(&text);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reduce an HTML document to plain readable text: comments and noisy
/// elements removed, remaining tags treated as line breaks.
pub fn strip_to_text(html: &str) -> String {
    let mut document = COMMENT.replace_all(html, "").into_owned();
    for element in NOISE.iter() {
        document = element.replace_all(&document, "").into_owned();
    }
    to_lines(&document)
}

/// Readable-text extraction with a metadata header.
///
/// Prefers a main/article/content-labeled region over the full body and
/// prepends the page title and source URL.
pub fn extract_readable(html: &str, url: &str) -> String {
    let title = TITLE
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty());

    let mut document = COMMENT.replace_all(html, "").into_owned();
    for element in NOISE.iter() {
        document = element.replace_all(&document, "").into_owned();
    }
    document = ASIDE.replace_all(&document, "").into_owned();

    let region = MAIN
        .captures(&document)
        .or_else(|| ARTICLE.captures(&document))
        .or_else(|| CONTENT_DIV.captures(&document))
        .or_else(|| BODY.captures(&document))
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| document.clone());

    let text = to_lines(&region);

    let mut parts = Vec::new();
    if let Some(title) = title {
        parts.push(format!("Title: {title}"));
    }
    parts.push(format!("URL: {url}"));
    parts.push(String::new());
    parts.push(text);
    parts.join("\n")
}

/// Fetches pages and extracts their readable text.
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch a URL and return its readable text with a metadata header.
    ///
    /// The URL must carry both a scheme and a host before any network
    /// access is attempted.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl)?;
        if parsed.host_str().is_none() {
            return Err(FetchError::InvalidUrl);
        }

        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Other(err.to_string()))?;
        Ok(extract_readable(&body, url))
    }
}

fn classify_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::Connect
    } else {
        FetchError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html>
<head><title>Tern Migration &amp; Range</title><style>body { color: red }</style></head>
<body>
<header>Site header</header>
<nav><a href="/">home</a></nav>
<main><h1>Migration</h1><p>Arctic terns travel far.</p></main>
<script>trackVisit();</script>
<footer>copyright</footer>
</body>
</html>"#;

    #[test]
    fn test_strip_removes_noise_elements() {
        let text = strip_to_text(PAGE);
        assert!(text.contains("Migration"));
        assert!(text.contains("Arctic terns travel far."));
        assert!(!text.contains("trackVisit"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("Site header"));
        assert!(!text.contains("copyright"));
    }

    #[test]
    fn test_extract_readable_prefers_main_and_adds_header() {
        let text = extract_readable(PAGE, "https://example.com/terns");
        assert!(text.starts_with("Title: Tern Migration & Range\nURL: https://example.com/terns\n"));
        assert!(text.contains("Arctic terns travel far."));
        // The nav link lives outside <main> and is dropped with it.
        assert!(!text.contains("home"));
    }

    #[test]
    fn test_extract_readable_falls_back_to_body() {
        let html = "<html><body><p>no landmark &lt;here&gt;</p></body></html>";
        let text = extract_readable(html, "https://example.com");
        assert!(text.contains("no landmark <here>"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_url_without_host() {
        let fetcher = PageFetcher::new(Duration::from_secs(1), "test-agent").unwrap();
        assert!(matches!(
            fetcher.fetch("mailto:bird@example.com").await,
            Err(FetchError::InvalidUrl)
        ));
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(FetchError::InvalidUrl)
        ));
    }
}
