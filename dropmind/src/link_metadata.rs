//! Link metadata fetching - extracts OG/Twitter tags into a `Card`

use crate::interface::{Card, ResolutionFailure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use std::time::Duration;

const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Fetches a page and turns its metadata into a card
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<Card, ResolutionFailure>;
}

pub struct HttpLinkResolver {
    client: reqwest::Client,
    max_html_bytes: usize,
}

impl HttpLinkResolver {
    pub fn new(user_agent: &str, max_html_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, max_html_bytes })
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<Card, ResolutionFailure> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(request_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionFailure::Unreachable { status: Some(status.as_u16()) });
        }

        // A missing header is treated as HTML
        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_string();
            if !is_html_content_type(&content_type) {
                return Err(ResolutionFailure::UnsupportedContentType { content_type });
            }
        }

        // Read until the cap; metadata lives in <head>
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(request_failure)? {
            let remaining = self.max_html_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= self.max_html_bytes {
                break;
            }
        }
        let html = String::from_utf8_lossy(&body);

        let final_url = response.url().to_string();
        parse_card(&html, &final_url).ok_or(ResolutionFailure::Unparseable)
    }
}

/// Map a transport error onto the failure taxonomy
pub(crate) fn request_failure(err: reqwest::Error) -> ResolutionFailure {
    if err.is_timeout() {
        ResolutionFailure::Timeout
    } else {
        ResolutionFailure::Unreachable { status: err.status().map(|s| s.as_u16()) }
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    HTML_CONTENT_TYPES.contains(&essence.as_str())
}

static META_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static IMAGE_SRC_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel~="image_src"]"#).unwrap());

/// Extract a card from HTML. Returns None when no field is present.
pub fn parse_card(html: &str, page_url: &str) -> Option<Card> {
    let document = Html::parse_document(html);

    let meta = |key: &str| -> Option<String> {
        document
            .select(&META_SELECTOR)
            .filter(|el| {
                let value = el.value();
                value
                    .attr("property")
                    .or_else(|| value.attr("name"))
                    .is_some_and(|k| k.trim().eq_ignore_ascii_case(key))
            })
            .filter_map(|el| el.value().attr("content").and_then(normalize))
            .next()
    };

    let title_tag = || {
        document
            .select(&TITLE_SELECTOR)
            .next()
            .and_then(|el| normalize(&el.text().collect::<String>()))
    };
    let image_src = || {
        document
            .select(&IMAGE_SRC_SELECTOR)
            .filter_map(|el| el.value().attr("href").and_then(normalize))
            .next()
    };

    let card = Card {
        title: meta("og:title").or_else(|| meta("twitter:title")).or_else(title_tag),
        description: meta("og:description")
            .or_else(|| meta("description"))
            .or_else(|| meta("twitter:description")),
        image_url: meta("og:image")
            .or_else(|| meta("twitter:image"))
            .or_else(image_src)
            .and_then(|src| resolve_url(page_url, &src)),
        site_name: meta("og:site_name").or_else(|| meta("application-name")),
    };

    (!card.is_empty()).then_some(card)
}

/// Collapse runs of whitespace; blank becomes None
fn normalize(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn resolve_url(base: &str, relative: &str) -> Option<String> {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return Some(relative.to_string());
    }
    if relative.starts_with("//") {
        let scheme = url::Url::parse(base).map(|u| u.scheme().to_string()).unwrap_or_else(|_| "https".into());
        return Some(format!("{scheme}:{relative}"));
    }
    url::Url::parse(base)
        .ok()?
        .join(relative)
        .ok()
        .map(|u| u.to_string())
}
