use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Content and outbound links of a single retrieved node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub body: String,
    #[serde(default)]
    pub links: Vec<String>,
}

impl Page {
    pub fn new(body: impl Into<String>, links: Vec<String>) -> Self {
        Self {
            body: body.into(),
            links,
        }
    }
}

/// Retrieval capability used by the crawler.
///
/// `fetch` returns the node's content and the ids it links to, in order. The
/// links may repeat or point back at nodes already seen; the crawler handles
/// that. A pending fetch only suspends the task that issued it.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, node: &str) -> impl Future<Output = Result<Page>> + Send;
}
