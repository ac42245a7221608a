use crate::error::{Result, ScanError};
use crate::fetcher::{Fetcher, Page};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Retrieves nodes over HTTP. The node id is the URL, the content is the
/// response body, and the links are the page's `<a href>` targets.
pub struct HttpFetcher {
    client: Client,
    same_host: Option<String>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Strider/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            same_host: None,
        })
    }

    /// Only report links whose host is `host` or one of its subdomains.
    pub fn with_same_host(mut self, host: impl Into<String>) -> Self {
        self.same_host = Some(host.into());
        self
    }

    fn extract_links(&self, html: &str, current_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(link_selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut links = Vec::new();
        for element in document.select(&link_selector) {
            if let Some(href) = element.value().attr("href")
                && let Some(absolute_url) = resolve_url(current_url, href)
            {
                match self.same_host {
                    Some(ref host) if !is_same_host(&absolute_url, host) => {
                        debug!("Skipping off-host link {}", absolute_url);
                    }
                    _ => links.push(absolute_url),
                }
            }
        }

        links
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, node: &str) -> Result<Page> {
        let url = Url::parse(node).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", node, e)))?;

        debug!("Fetching {}", url);
        let start = Instant::now();
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::HttpStatus {
                url: node.to_string(),
                status: status.as_u16(),
            });
        }

        // A missing content type is treated as HTML.
        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true);

        let body = response.text().await?;
        debug!("Fetched {} ({} bytes) in {:?}", url, body.len(), start.elapsed());

        let links = if is_html {
            self.extract_links(&body, &url)
        } else {
            Vec::new()
        };

        Ok(Page { body, links })
    }
}

fn resolve_url(base: &Url, href: &str) -> Option<String> {
    // Skip empty, javascript:, mailto:, tel:, etc.
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);

    Some(resolved.to_string())
}

fn is_same_host(url: &str, host: &str) -> bool {
    if let Ok(parsed) = Url::parse(url)
        && let Some(link_host) = parsed.host_str()
    {
        return link_host == host || link_host.ends_with(&format!(".{}", host));
    }
    false
}
