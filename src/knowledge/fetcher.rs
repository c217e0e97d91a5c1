use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;

use crate::config::FetcherConfig;
use crate::persona::LinkType;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Retrieves the text of a knowledge link.
///
/// Implementations never fail: an unreachable resource yields placeholder
/// text so that prompt composition can always continue.
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, kind: LinkType) -> String;
}

pub struct HttpFetcher {
    client: Client,
    max_chars: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client for knowledge links")?;
        Ok(Self {
            client,
            max_chars: config.max_chars,
        })
    }

    async fn get_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {url}"))
    }
}

#[async_trait::async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, kind: LinkType) -> String {
        tracing::info!("Fetching knowledge link {url} ({})", kind.as_str());
        let body = match self.get_body(url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Knowledge link unreachable: {e:#}");
                return unavailable(url);
            }
        };
        match kind {
            LinkType::Web | LinkType::Documentation => html_to_text(&body, self.max_chars),
            LinkType::Pdf => format!("PDF content from {url} - [extraction not supported]"),
            LinkType::Gallery => String::new(),
        }
    }
}

pub fn unavailable(url: &str) -> String {
    format!("[Content unavailable from {url}]")
}

/// Strip script/style blocks and tags, collapse whitespace, cap at `max_chars`.
pub fn html_to_text(html: &str, max_chars: usize) -> String {
    let text = SCRIPT_BLOCK.replace_all(html, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().chars().take(max_chars).collect()
}
