use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strider_scanner::{
    CrawlSummary, Crawler, DedupKey, Fetcher, FixtureFetcher, HttpFetcher, ReportCallback,
    VisitReport,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Where node content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Canned pages; `None` is the built-in golang.org table.
    Fixture(Option<PathBuf>),
    Http { same_host: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Everything the `crawl` subcommand was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlArgs {
    pub seed: String,
    pub depth: usize,
    pub source: Source,
    pub dedup_key: DedupKey,
    pub timeout: Option<Duration>,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl CrawlArgs {
    pub fn from_matches(sub_matches: &ArgMatches, quiet: bool) -> Result<Self> {
        let seed = sub_matches
            .get_one::<String>("SEED")
            .cloned()
            .ok_or_else(|| anyhow!("a seed node is required"))?;
        let depth = *sub_matches
            .get_one::<usize>("depth")
            .ok_or_else(|| anyhow!("--depth is required"))?;

        let source = if sub_matches.get_flag("http") {
            Source::Http {
                same_host: sub_matches.get_flag("same-host"),
            }
        } else {
            Source::Fixture(sub_matches.get_one::<PathBuf>("fixture").cloned())
        };

        let dedup_key = sub_matches
            .get_one::<String>("dedup-by")
            .map(|s| DedupKey::from_str(s))
            .transpose()
            .map_err(|e| anyhow!(e))?
            .unwrap_or_default();

        let format = sub_matches
            .get_one::<String>("format")
            .map(|s| OutputFormat::from_str(s))
            .transpose()
            .map_err(|e| anyhow!(e))?
            .unwrap_or(OutputFormat::Text);

        let timeout = sub_matches
            .get_one::<u64>("timeout")
            .map(|secs| Duration::from_secs(*secs));

        Ok(Self {
            seed,
            depth,
            source,
            dedup_key,
            timeout,
            format,
            quiet,
        })
    }

    /// The closing summary goes to stderr only for text output, so a JSON
    /// stream stays machine-readable end to end.
    pub fn wants_summary(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "strider=debug,strider_scanner=debug"
    } else {
        "error"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn load_fixture(path: Option<&Path>) -> Result<FixtureFetcher> {
    match path {
        Some(path) => FixtureFetcher::from_json_file(path)
            .with_context(|| format!("Failed to load fixture {}", path.display())),
        None => Ok(FixtureFetcher::golang()),
    }
}

pub fn build_http_fetcher(seed: &str, same_host: bool, timeout: Option<Duration>) -> Result<HttpFetcher> {
    let fetcher = match timeout {
        Some(timeout) => HttpFetcher::with_timeout(timeout.as_secs())?,
        None => HttpFetcher::new()?,
    };

    if !same_host {
        return Ok(fetcher);
    }

    let host = Url::parse(seed)
        .with_context(|| format!("Seed '{}' is not a URL", seed))?
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Seed '{}' has no host", seed))?;
    Ok(fetcher.with_same_host(host))
}

/// One observation line in the requested format.
pub fn format_report(report: &VisitReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => report.to_string(),
        OutputFormat::Json => serde_json::to_string(report).unwrap_or_else(|_| report.to_string()),
    }
}

pub fn generate_summary(summary: &CrawlSummary) -> String {
    let stats = &summary.stats;
    let mut out = String::new();

    out.push_str(&format!("{}\n", "━".repeat(52).bright_blue()));
    out.push_str(&format!(
        "{} {} (depth {})\n",
        "Seed:".bold(),
        summary.seed,
        summary.max_depth
    ));
    out.push_str(&format!("  {} {}\n", "Found:".green(), stats.found));
    out.push_str(&format!("  {} {}\n", "Failed:".red(), stats.failed));
    out.push_str(&format!("  {} {}\n", "Duplicate fetches:".yellow(), stats.duplicates));
    out.push_str(&format!("  {} {}\n", "Fetches issued:".cyan(), stats.fetches));
    out.push_str(&format!("  {} {}\n", "Depth-exhausted visits:".cyan(), stats.depth_skipped));
    if stats.panicked > 0 {
        out.push_str(&format!("  {} {}\n", "Panicked visits:".red().bold(), stats.panicked));
    }
    out.push_str(&format!("  {} {:?}\n", "Elapsed:".cyan(), summary.elapsed));

    out
}

/// Crawl with `fetcher`, printing each report on stdout as it arrives.
pub async fn run_crawl<F: Fetcher>(fetcher: F, args: &CrawlArgs) -> CrawlSummary {
    let format = args.format;
    let printer: ReportCallback = Arc::new(move |report: &VisitReport| {
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", format_report(report, format)) {
            debug!("Dropped report for {}: {}", report.node(), e);
        }
    });

    let mut crawler = Crawler::new(fetcher)
        .with_dedup_key(args.dedup_key)
        .with_report_callback(printer);
    if let Some(timeout) = args.timeout {
        crawler = crawler.with_fetch_timeout(timeout);
    }

    crawler.crawl(&args.seed, args.depth).await
}

pub async fn handle_crawl(args: CrawlArgs) -> Result<CrawlSummary> {
    info!("Crawl requested: {:?}", args);

    let summary = match args.source {
        Source::Fixture(ref path) => {
            let fetcher = load_fixture(path.as_deref())?;
            run_crawl(fetcher, &args).await
        }
        Source::Http { same_host } => {
            let fetcher = build_http_fetcher(&args.seed, same_host, args.timeout)?;
            run_crawl(fetcher, &args).await
        }
    };

    if args.wants_summary() {
        eprint!("{}", generate_summary(&summary));
    }

    Ok(summary)
}

pub fn handle_fixture() -> Result<()> {
    let json = FixtureFetcher::golang().to_json()?;
    println!("{}", json);
    Ok(())
}
