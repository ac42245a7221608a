use crate::context::{AtomicStats, CrawlContext, CrawlStats, WorkUnit};
use crate::error::{Result, ScanError};
use crate::fetcher::{Fetcher, Page};
use crate::report::{ReportCallback, VisitReport};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What identifies a node as already processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// The fetched content. Distinct ids serving the same content collapse
    /// into one entry, and every failed fetch shares the empty key, so only
    /// the first failure of a traversal is reported.
    #[default]
    Content,
    /// The node id itself.
    NodeId,
}

impl DedupKey {
    fn key_for(self, node: &str, fetched: &Result<Page>) -> String {
        match (self, fetched) {
            (DedupKey::NodeId, _) => node.to_string(),
            (DedupKey::Content, Ok(page)) => page.body.clone(),
            (DedupKey::Content, Err(_)) => String::new(),
        }
    }
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "content" => Ok(DedupKey::Content),
            "node" | "node-id" | "id" => Ok(DedupKey::NodeId),
            other => Err(format!("unknown dedup key '{}'", other)),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Content => f.write_str("content"),
            DedupKey::NodeId => f.write_str("node"),
        }
    }
}

/// Outcome of one traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub seed: String,
    pub max_depth: usize,
    /// Reports in the order they were emitted.
    pub reports: Vec<VisitReport>,
    /// Final visited-set: dedup key to whether the fetch succeeded.
    pub visited: HashMap<String, bool>,
    pub stats: CrawlStats,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn found(&self) -> impl Iterator<Item = &VisitReport> {
        self.reports.iter().filter(|r| r.is_found())
    }

    pub fn failures(&self) -> impl Iterator<Item = &VisitReport> {
        self.reports.iter().filter(|r| !r.is_found())
    }

    /// Content of every successful visit.
    pub fn found_contents(&self) -> HashSet<String> {
        self.found()
            .filter_map(|r| r.content().map(str::to_string))
            .collect()
    }
}

/// Depth-bounded concurrent crawler.
///
/// Each visit runs as its own tokio task. Every call to [`Crawler::crawl`]
/// builds a fresh visited-set and work counter, so one crawler can run any
/// number of traversals at once without them seeing each other.
pub struct Crawler<F: Fetcher> {
    fetcher: Arc<F>,
    dedup_key: DedupKey,
    fetch_timeout: Option<Duration>,
    report_callback: Option<ReportCallback>,
}

impl<F: Fetcher> Crawler<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_fetcher(Arc::new(fetcher))
    }

    pub fn with_fetcher(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            dedup_key: DedupKey::default(),
            fetch_timeout: None,
            report_callback: None,
        }
    }

    pub fn with_dedup_key(mut self, dedup_key: DedupKey) -> Self {
        self.dedup_key = dedup_key;
        self
    }

    /// Abandon any single fetch that takes longer than `timeout`. Without one
    /// a fetch that never resolves keeps the traversal from finishing.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_report_callback(mut self, callback: ReportCallback) -> Self {
        self.report_callback = Some(callback);
        self
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Visits `seed` and everything reachable from it within `max_depth`
    /// hops, returning once every spawned visit has finished.
    pub async fn crawl(&self, seed: &str, max_depth: usize) -> CrawlSummary {
        info!(
            "Starting crawl of {} to depth {} (dedup by {})",
            seed, max_depth, self.dedup_key
        );
        let start = Instant::now();

        let traversal = Arc::new(Traversal {
            fetcher: Arc::clone(&self.fetcher),
            dedup_key: self.dedup_key,
            fetch_timeout: self.fetch_timeout,
            ctx: CrawlContext::new(self.report_callback.clone()),
        });

        let seed_unit = traversal.ctx.work.acquire();
        traversal.spawn(seed.to_string(), max_depth, seed_unit);
        traversal.ctx.work.wait_idle().await;

        let summary = CrawlSummary {
            seed: seed.to_string(),
            max_depth,
            reports: traversal.ctx.reports_snapshot().await,
            visited: traversal.ctx.visited_snapshot().await,
            stats: traversal.ctx.stats.snapshot(&traversal.ctx.work),
            elapsed: start.elapsed(),
        };

        info!(
            "Crawl complete. {} found, {} failed, {} duplicate fetches in {:?}",
            summary.stats.found, summary.stats.failed, summary.stats.duplicates, summary.elapsed
        );
        summary
    }
}

struct Traversal<F: Fetcher> {
    fetcher: Arc<F>,
    dedup_key: DedupKey,
    fetch_timeout: Option<Duration>,
    ctx: CrawlContext,
}

impl<F: Fetcher> Traversal<F> {
    /// Runs `visit(node, depth)` on a new task. `unit` was taken by the
    /// caller before this call and is released when the task ends, however
    /// it ends.
    fn spawn(self: &Arc<Self>, node: String, depth: usize, unit: WorkUnit) {
        let traversal = Arc::clone(self);
        tokio::spawn(async move {
            let _unit = unit;
            let visit = AssertUnwindSafe(traversal.visit(&node, depth)).catch_unwind();
            if let Err(panic) = visit.await {
                AtomicStats::bump(&traversal.ctx.stats.panicked);
                warn!("Visit of {} panicked: {}", node, panic_message(&*panic));
            }
        });
    }

    async fn visit(self: &Arc<Self>, node: &str, depth: usize) {
        let stats = &self.ctx.stats;

        if depth == 0 {
            AtomicStats::bump(&stats.depth_skipped);
            debug!("Depth budget exhausted at {}", node);
            return;
        }

        AtomicStats::bump(&stats.fetches);
        let fetched = self.fetch(node).await;

        let key = self.dedup_key.key_for(node, &fetched);
        if !self.ctx.mark_visited(key, fetched.is_ok()).await {
            AtomicStats::bump(&stats.duplicates);
            debug!("Already visited, not expanding {}", node);
            return;
        }

        match fetched {
            Err(e) => {
                AtomicStats::bump(&stats.failed);
                warn!("Fetch failed for {}: {}", node, e);
                self.ctx
                    .emit(VisitReport::failed(node, e.to_string(), depth))
                    .await;
            }
            Ok(Page { body, links }) => {
                AtomicStats::bump(&stats.found);
                self.ctx.emit(VisitReport::found(node, body, depth)).await;

                debug!("Spawning {} children of {} at depth {}", links.len(), node, depth - 1);
                for link in links {
                    let unit = self.ctx.work.acquire();
                    self.spawn(link, depth - 1, unit);
                }
            }
        }
    }

    async fn fetch(&self, node: &str) -> Result<Page> {
        match self.fetch_timeout {
            Some(after) => tokio::time::timeout(after, self.fetcher.fetch(node))
                .await
                .map_err(|_| ScanError::Timeout {
                    node: node.to_string(),
                    after,
                })?,
            None => self.fetcher.fetch(node).await,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureFetcher;
    use std::sync::Mutex as StdMutex;

    const GO: &str = "https://golang.org/";
    const PKG: &str = "https://golang.org/pkg/";
    const CMD: &str = "https://golang.org/cmd/";

    fn page(body: &str, links: &[&str]) -> Page {
        Page::new(body, links.iter().map(|l| l.to_string()).collect())
    }

    /// Fixture scenario from the golang.org table at depth 4
    #[tokio::test]
    async fn test_golang_fixture_depth_four() {
        let crawler = Crawler::new(FixtureFetcher::golang());
        let summary = crawler.crawl(GO, 4).await;

        let go_reports = summary
            .found()
            .filter(|r| r.content() == Some("The Go Programming Language"))
            .count();
        assert_eq!(go_reports, 1);

        let failures: Vec<_> = summary.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), format!("not found: {}", CMD));

        let expected: HashSet<String> = ["The Go Programming Language", "Packages", "Package fmt", "Package os"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(summary.found_contents(), expected);
        assert_eq!(summary.reports.len(), 5);
        assert_eq!(summary.visited.get(""), Some(&false));
        assert_eq!(summary.visited.get("Packages"), Some(&true));
        assert_eq!(summary.stats.idle_transitions, 1);
    }

    #[tokio::test]
    async fn test_depth_zero_does_nothing() {
        let fetcher = Arc::new(FixtureFetcher::golang());
        let crawler = Crawler::with_fetcher(fetcher.clone());
        let summary = crawler.crawl(GO, 0).await;

        assert!(summary.reports.is_empty());
        assert!(summary.visited.is_empty());
        assert_eq!(fetcher.total_fetches(), 0);
        assert_eq!(summary.stats.depth_skipped, 1);
    }

    #[tokio::test]
    async fn test_depth_one_fetches_only_seed() {
        let fetcher = Arc::new(FixtureFetcher::golang());
        let crawler = Crawler::with_fetcher(fetcher.clone());
        let summary = crawler.crawl(GO, 1).await;

        assert_eq!(summary.reports, vec![VisitReport::found(GO, "The Go Programming Language", 1)]);
        assert_eq!(summary.reports[0].depth(), 1);
        assert_eq!(fetcher.total_fetches(), 1);
        assert_eq!(fetcher.fetch_count(PKG), 0);
        // Both children were spawned and short-circuited without fetching.
        assert_eq!(summary.stats.depth_skipped, 2);
    }

    #[tokio::test]
    async fn test_back_links_are_not_reexpanded() {
        let crawler = Crawler::new(FixtureFetcher::golang());
        let summary = crawler.crawl(GO, 4).await;
        let fetcher = crawler.fetcher();

        // Each fetch either recorded a new key or was counted as a duplicate.
        assert_eq!(
            summary.stats.fetches,
            summary.stats.found + summary.stats.failed + summary.stats.duplicates
        );
        assert_eq!(summary.stats.fetches, fetcher.total_fetches());
        assert_eq!(summary.stats.panicked, 0);

        // Budget counts down one per hop from the seed.
        let depth_of = |content: &str| {
            summary
                .found()
                .find(|r| r.content() == Some(content))
                .map(|r| r.depth())
        };
        assert_eq!(depth_of("The Go Programming Language"), Some(4));
        assert_eq!(depth_of("Packages"), Some(3));
        assert_eq!(depth_of("Package fmt"), Some(2));
    }

    #[tokio::test]
    async fn test_content_key_swallows_later_failures() {
        let pages = HashMap::from([(
            "root".to_string(),
            page("Root", &["missing-1", "missing-2", "missing-3"]),
        )]);
        let crawler = Crawler::new(FixtureFetcher::new(pages));
        let summary = crawler.crawl("root", 2).await;

        assert_eq!(summary.failures().count(), 1);
        assert_eq!(summary.stats.failed, 1);
        assert_eq!(summary.stats.duplicates, 2);
    }

    #[tokio::test]
    async fn test_node_id_key_reports_every_failure() {
        let pages = HashMap::from([(
            "root".to_string(),
            page("Root", &["missing-1", "missing-2", "missing-3"]),
        )]);
        let crawler = Crawler::new(FixtureFetcher::new(pages)).with_dedup_key(DedupKey::NodeId);
        let summary = crawler.crawl("root", 2).await;

        let failed: HashSet<&str> = summary.failures().map(|r| r.node()).collect();
        assert_eq!(failed, HashSet::from(["missing-1", "missing-2", "missing-3"]));
        assert_eq!(summary.visited.len(), 4);
    }

    #[tokio::test]
    async fn test_identical_content_collapses_under_content_key() {
        let pages = HashMap::from([
            ("root".to_string(), page("Root", &["mirror-a", "mirror-b"])),
            ("mirror-a".to_string(), page("Same", &["leaf-a"])),
            ("mirror-b".to_string(), page("Same", &["leaf-b"])),
            ("leaf-a".to_string(), page("Leaf A", &[])),
            ("leaf-b".to_string(), page("Leaf B", &[])),
        ]);
        let fetcher = FixtureFetcher::new(pages).with_latency(Duration::from_millis(10));
        let crawler = Crawler::new(fetcher);
        let summary = crawler.crawl("root", 3).await;

        let same: Vec<_> = summary
            .found()
            .filter(|r| r.content() == Some("Same"))
            .collect();
        assert_eq!(same.len(), 1);

        // Only the winner's child is expanded.
        let leaves = summary
            .found()
            .filter(|r| r.content().is_some_and(|c| c.starts_with("Leaf")))
            .count();
        assert_eq!(leaves, 1);
        assert_eq!(summary.stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_racing_duplicate_links_report_once() {
        let many_links: Vec<&str> = std::iter::repeat_n("target", 50).collect();
        let pages = HashMap::from([
            ("root".to_string(), page("Root", &many_links)),
            ("target".to_string(), page("Target", &["root"])),
        ]);
        let fetcher = Arc::new(FixtureFetcher::new(pages).with_latency(Duration::from_millis(5)));
        let crawler = Crawler::with_fetcher(fetcher.clone());
        let summary = crawler.crawl("root", 3).await;

        assert_eq!(summary.found().filter(|r| r.node() == "target").count(), 1);
        assert_eq!(fetcher.fetch_count("target"), 50);
        // Only the single winning "target" visit expands back to root.
        assert_eq!(fetcher.fetch_count("root"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_key_reported_at_most_once_multi_thread() {
        // Dense graph where every node links to every other node.
        let ids: Vec<String> = (0..12).map(|i| format!("n{}", i)).collect();
        let pages: HashMap<String, Page> = ids
            .iter()
            .map(|id| {
                let links = ids.clone();
                (id.clone(), Page::new(format!("content of {}", id), links))
            })
            .collect();

        let crawler = Crawler::new(FixtureFetcher::new(pages));
        let summary = crawler.crawl("n0", 3).await;

        let mut seen = HashSet::new();
        for report in summary.found() {
            assert!(seen.insert(report.content().unwrap_or_default().to_string()));
        }
        assert_eq!(seen.len(), 12);
        assert_eq!(summary.stats.idle_transitions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_report_log_matches_sink_order_multi_thread() {
        let leaves: Vec<String> = (0..200).map(|i| format!("leaf-{}", i)).collect();
        let mut pages: HashMap<String, Page> = leaves
            .iter()
            .map(|id| (id.clone(), Page::new(format!("body of {}", id), vec![])))
            .collect();
        pages.insert("hub".to_string(), Page::new("Hub", leaves.clone()));
        let fetcher = Arc::new(FixtureFetcher::new(pages));

        for _ in 0..20 {
            let sink: Arc<StdMutex<Vec<VisitReport>>> = Arc::new(StdMutex::new(Vec::new()));
            let sink_clone = sink.clone();
            let crawler = Crawler::with_fetcher(fetcher.clone()).with_report_callback(Arc::new(
                move |report: &VisitReport| {
                    sink_clone.lock().unwrap().push(report.clone());
                },
            ));

            let summary = crawler.crawl("hub", 2).await;

            assert_eq!(summary.reports.len(), 201);
            assert_eq!(*sink.lock().unwrap(), summary.reports);
            assert_eq!(summary.stats.idle_transitions, 1);
        }
    }

    #[tokio::test]
    async fn test_no_reports_after_crawl_returns() {
        let sink: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink_clone = sink.clone();
        let crawler = Crawler::new(FixtureFetcher::golang().with_latency(Duration::from_millis(2)))
            .with_report_callback(Arc::new(move |report: &VisitReport| {
                sink_clone.lock().unwrap().push(report.to_string());
            }));

        let summary = crawler.crawl(GO, 4).await;
        let at_return = sink.lock().unwrap().len();
        assert_eq!(at_return, summary.reports.len());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.lock().unwrap().len(), at_return);
    }

    #[tokio::test]
    async fn test_repeated_crawls_are_idempotent() {
        let crawler = Crawler::new(FixtureFetcher::golang());
        let first = crawler.crawl(GO, 4).await;
        let second = crawler.crawl(GO, 4).await;

        assert_eq!(first.found_contents(), second.found_contents());
        assert_eq!(first.visited, second.visited);
    }

    #[tokio::test]
    async fn test_concurrent_crawls_do_not_share_state() {
        let crawler = Crawler::new(FixtureFetcher::golang().with_latency(Duration::from_millis(5)));
        let (a, b) = tokio::join!(crawler.crawl(GO, 4), crawler.crawl(GO, 4));

        assert_eq!(a.found_contents().len(), 4);
        assert_eq!(b.found_contents().len(), 4);
    }

    struct SlowFetcher;

    impl Fetcher for SlowFetcher {
        async fn fetch(&self, node: &str) -> Result<Page> {
            if node == "stuck" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Page::new(format!("body of {}", node), vec!["stuck".to_string()]))
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout_turns_stall_into_failure() {
        let crawler = Crawler::new(SlowFetcher).with_fetch_timeout(Duration::from_millis(50));
        let summary = tokio::time::timeout(Duration::from_secs(5), crawler.crawl("start", 2))
            .await
            .expect("timeout should let the traversal finish");

        let failures: Vec<_> = summary.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].node(), "stuck");
        assert!(failures[0].to_string().contains("timed out"));
    }

    struct PanickingFetcher;

    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, node: &str) -> Result<Page> {
            if node == "bomb" {
                panic!("fetcher blew up on {}", node);
            }
            Ok(Page::new("root", vec!["bomb".to_string(), "ok".to_string()]))
        }
    }

    #[tokio::test]
    async fn test_panicking_visit_is_counted_and_released() {
        let crawler = Crawler::new(PanickingFetcher).with_dedup_key(DedupKey::NodeId);
        let summary = tokio::time::timeout(Duration::from_secs(5), crawler.crawl("root", 2))
            .await
            .expect("a panicking task must still release its work unit");

        assert_eq!(summary.stats.panicked, 1);
        assert_eq!(summary.found().count(), 2);
    }

    #[test]
    fn test_dedup_key_parse() {
        assert_eq!("content".parse::<DedupKey>(), Ok(DedupKey::Content));
        assert_eq!("node".parse::<DedupKey>(), Ok(DedupKey::NodeId));
        assert!("bogus".parse::<DedupKey>().is_err());
        assert_eq!(DedupKey::NodeId.to_string(), "node");
    }
}
