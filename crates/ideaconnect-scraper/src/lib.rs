//! Page fetching and heuristic field extraction for the idea source site.
//!
//! Extraction is a prioritized list of pure functions over a parsed DOM;
//! each heuristic is independently testable against fixed HTML and returns
//! `None` when nothing qualifies. Absence of metadata is never an error.

use std::time::Duration;

use async_trait::async_trait;
use ideaconnect_core::MarketSize;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "ideaconnect-scraper";

/// Courtesy pause after every request against the source, successful or not.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(2000);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Anything that can produce HTML for a URL. Strategies depend on this seam
/// so they can run against canned pages in tests.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_delay: DEFAULT_REQUEST_DELAY,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Rate-limited HTTP GET client with browser-like headers. One request at a
/// time; after every request (either outcome) it sleeps the configured delay
/// before returning, which throttles the caller's next call. No retries:
/// a failed fetch is reported once and the pipeline moves on.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    request_delay: Duration,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            request_delay: config.request_delay,
        })
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let result = match self.client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    resp.text().await.map_err(FetchError::from)
                } else {
                    Err(FetchError::Status {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    })
                }
            }
            Err(err) => Err(FetchError::Request(err)),
        };
        debug!(url, ok = result.is_ok(), "fetched source page");
        tokio::time::sleep(self.request_delay).await;
        result
    }
}

// ---------------------------------------------------------------------------
// Field extraction heuristics
// ---------------------------------------------------------------------------

static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("static selector"));
static H2: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").expect("static selector"));
static TITLE_CLASSES: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".title, .idea-title, .main-title").expect("static selector"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));
static LEAD_HEADING: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, .title").expect("static selector"));
static LEAD_BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, .description, .content").expect("static selector"));
static VOLUME: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".search-volume, .volume, .keyword-volume").expect("static selector")
});
static GROWTH: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".growth, .trend, .percentage").expect("static selector"));
static CATEGORY: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".category, .tag, .industry").expect("static selector"));

static VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*k?").expect("static regex"));
static GROWTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([+-]?\d+(?:\.\d+)?%)").expect("static regex"));
static MARKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\$(\d+(?:\.\d+)?)\s*([bmk])").expect("static regex"));

fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn body_text(document: &Html) -> String {
    document.root_element().text().collect::<String>()
}

/// Headline boilerplate the source wraps around every page.
fn is_plausible_title(text: &str) -> bool {
    let lower = text.to_lowercase();
    !text.is_empty()
        && text != "Idea of the Day"
        && text != "IdeaBrowser"
        && text != "Daily Idea"
        && lower != "today's idea"
        && !lower.contains("welcome")
        && !lower.contains("sign up")
        && !lower.contains("login")
        && !lower.contains("ideabrowser")
        && text.chars().count() > 15
        && text.contains(' ')
}

/// Ordered title heuristics: filtered h1 elements, then filtered h2
/// elements, then generic title classes under a looser filter. First
/// survivor wins; `None` leaves the candidate to die in the validity filter.
pub fn extract_title(document: &Html) -> Option<String> {
    for selector in [&*H1, &*H2] {
        if let Some(text) = document
            .select(selector)
            .map(element_text)
            .find(|t| is_plausible_title(t))
        {
            return Some(text);
        }
    }
    document
        .select(&TITLE_CLASSES)
        .map(element_text)
        .find(|t| t != "Idea of the Day" && t.chars().count() > 10)
}

/// First paragraph over 50 characters that is not onboarding boilerplate,
/// falling back to the very first paragraph.
pub fn extract_description(document: &Html) -> Option<String> {
    let qualified = document.select(&PARAGRAPH).map(element_text).find(|t| {
        let lower = t.to_lowercase();
        t.chars().count() > 50
            && !lower.contains("welcome")
            && !lower.contains("sign up")
            && !lower.contains("login")
    });
    qualified.or_else(|| {
        document
            .select(&PARAGRAPH)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    })
}

/// Unfiltered first heading, used by the archive and slug strategies where
/// pages carry the idea headline directly.
pub fn first_heading(document: &Html) -> Option<String> {
    document
        .select(&LEAD_HEADING)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

pub fn first_body_text(document: &Html) -> Option<String> {
    document
        .select(&LEAD_BODY)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

pub fn extract_search_volume(document: &Html) -> Option<f64> {
    let text = document
        .select(&VOLUME)
        .map(element_text)
        .collect::<Vec<_>>()
        .join(" ");
    let captures = VOLUME_RE.captures(&text)?;
    let number: f64 = captures.get(1)?.as_str().parse().ok()?;
    if text.to_lowercase().contains('k') {
        Some(number * 1000.0)
    } else {
        Some(number)
    }
}

pub fn extract_growth(document: &Html) -> Option<String> {
    let text = document
        .select(&GROWTH)
        .map(element_text)
        .collect::<Vec<_>>()
        .join(" ");
    GROWTH_RE
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn extract_category(document: &Html) -> Option<String> {
    document
        .select(&CATEGORY)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Dollar amounts anywhere in the body text map to a size bucket by their
/// unit letter: billions are Large, millions Medium, thousands Small.
pub fn extract_market_size(document: &Html) -> Option<MarketSize> {
    let text = body_text(document);
    let captures = MARKET_RE.captures(&text)?;
    match captures.get(2)?.as_str().to_lowercase().as_str() {
        "b" => Some(MarketSize::Large),
        "m" => Some(MarketSize::Medium),
        "k" => Some(MarketSize::Small),
        _ => None,
    }
}

/// Keyword presence over the body text; the first matching tier wins.
pub fn extract_difficulty(document: &Html) -> Option<u8> {
    let text = body_text(document).to_lowercase();
    if ["complex", "advanced", "difficult"].iter().any(|k| text.contains(k)) {
        return Some(8);
    }
    if ["moderate", "medium"].iter().any(|k| text.contains(k)) {
        return Some(5);
    }
    if ["simple", "easy", "basic"].iter().any(|k| text.contains(k)) {
        return Some(3);
    }
    None
}

/// Metadata bundle pulled from a detail page. Every field independent;
/// every field optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub search_volume: Option<f64>,
    pub growth_rate: Option<String>,
    pub category: Option<String>,
    pub market_size: Option<MarketSize>,
    pub difficulty_level: Option<u8>,
}

pub fn extract_metadata(document: &Html) -> PageMetadata {
    PageMetadata {
        search_volume: extract_search_volume(document),
        growth_rate: extract_growth(document),
        category: extract_category(document),
        market_size: extract_market_size(document),
        difficulty_level: extract_difficulty(document),
    }
}
