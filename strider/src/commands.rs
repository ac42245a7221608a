use clap::builder::RangedU64ValueParser;
use clap::{arg, command};

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const DEFAULT_SEED: &str = "https://golang.org/";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("strider")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("strider")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress the closing summary").required(false))
        .arg(arg!(-v --"verbose" "Log every visit to stderr").required(false))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("crawl")
                .about("Crawl from a seed node to a fixed depth, reporting each node once")
                .arg(
                    arg!([SEED])
                        .required(false)
                        .help("The node to start from")
                        .default_value(DEFAULT_SEED),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Maximum number of hops to follow, counting the seed")
                        .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                        .default_value("4"),
                )
                .arg(
                    arg!(--"fixture" <PATH>)
                        .required(false)
                        .help("JSON table of canned pages to crawl (default: built-in golang.org table)")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("http"),
                )
                .arg(
                    arg!(--"http")
                        .required(false)
                        .help("Fetch nodes over HTTP instead of from a fixture")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("fixture"),
                )
                .arg(
                    arg!(--"same-host")
                        .required(false)
                        .help("With --http, only follow links on the seed's host")
                        .action(clap::ArgAction::SetTrue)
                        .requires("http"),
                )
                .arg(
                    arg!(--"dedup-by" <KEY>)
                        .required(false)
                        .help("What marks a node as already seen: its fetched content or its id")
                        .value_parser(["content", "node"])
                        .default_value("content"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Give up on any single fetch after this many seconds")
                        .value_parser(RangedU64ValueParser::<u64>::new().range(1..)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("fixture")
                .about("Print the built-in fixture table as JSON, for use with --fixture"),
        )
}
