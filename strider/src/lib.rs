pub mod commands;
pub mod handlers;

pub use commands::{CLAP_STYLING, DEFAULT_SEED, command_argument_builder};
pub use handlers::{
    CrawlArgs, OutputFormat, Source, format_report, generate_summary, handle_crawl,
    handle_fixture, load_fixture,
};
