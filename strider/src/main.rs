use strider::commands::command_argument_builder;
use strider::handlers::{CrawlArgs, handle_crawl, handle_fixture, init_tracing};

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_tracing(chosen_command.get_flag("verbose"));

    let outcome = match chosen_command.subcommand() {
        Some(("crawl", sub_matches)) => match CrawlArgs::from_matches(sub_matches, quiet) {
            Ok(args) => handle_crawl(args).await.map(|_| ()),
            Err(e) => Err(e),
        },
        Some(("fixture", _)) => handle_fixture(),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}
