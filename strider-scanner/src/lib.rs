pub mod context;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod fixture;
pub mod http;
pub mod report;

pub use context::{CrawlStats, WorkCounter, WorkUnit};
pub use crawler::{CrawlSummary, Crawler, DedupKey};
pub use error::ScanError;
pub use fetcher::{Fetcher, Page};
pub use fixture::FixtureFetcher;
pub use http::HttpFetcher;
pub use report::{ReportCallback, VisitReport};
