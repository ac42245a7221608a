use crate::error::{Result, ScanError};
use crate::fetcher::{Fetcher, Page};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Fetcher that serves canned pages from an in-memory table.
///
/// Unknown ids fail with [`ScanError::NotFound`]. Every call is counted so
/// tests can assert how often a node was actually retrieved.
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    pages: HashMap<String, Page>,
    latency: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FixtureFetcher {
    pub fn new(pages: HashMap<String, Page>) -> Self {
        Self {
            pages,
            latency: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// The four-page golang.org table. `https://golang.org/cmd/` is linked
    /// from two pages but has no entry, so fetching it fails.
    pub fn golang() -> Self {
        let page = |body: &str, links: &[&str]| {
            Page::new(body, links.iter().map(|l| l.to_string()).collect())
        };

        let pages = HashMap::from([
            (
                "https://golang.org/".to_string(),
                page(
                    "The Go Programming Language",
                    &["https://golang.org/pkg/", "https://golang.org/cmd/"],
                ),
            ),
            (
                "https://golang.org/pkg/".to_string(),
                page(
                    "Packages",
                    &[
                        "https://golang.org/",
                        "https://golang.org/cmd/",
                        "https://golang.org/pkg/fmt/",
                        "https://golang.org/pkg/os/",
                    ],
                ),
            ),
            (
                "https://golang.org/pkg/fmt/".to_string(),
                page(
                    "Package fmt",
                    &["https://golang.org/", "https://golang.org/pkg/"],
                ),
            ),
            (
                "https://golang.org/pkg/os/".to_string(),
                page(
                    "Package os",
                    &["https://golang.org/", "https://golang.org/pkg/"],
                ),
            ),
        ]);

        Self::new(pages)
    }

    /// Parses a `{ "<id>": { "body": "...", "links": [...] } }` table.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let pages: HashMap<String, Page> = serde_json::from_str(json)?;
        Ok(Self::new(pages))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serializes the table in the format `from_json_str` reads, sorted by id.
    pub fn to_json(&self) -> Result<String> {
        let sorted: BTreeMap<&String, &Page> = self.pages.iter().collect();
        Ok(serde_json::to_string_pretty(&sorted)?)
    }

    /// Delay every fetch by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Number of fetches issued for `node` so far.
    pub fn fetch_count(&self, node: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(node).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total number of fetches issued across all nodes.
    pub fn total_fetches(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    fn record_call(&self, node: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(node.to_string()).or_insert(0) += 1;
        }
    }
}

impl Fetcher for FixtureFetcher {
    async fn fetch(&self, node: &str) -> Result<Page> {
        self.record_call(node);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        debug!("Fixture lookup for {}", node);
        self.pages
            .get(node)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(node.to_string()))
    }
}
