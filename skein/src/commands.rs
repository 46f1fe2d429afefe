use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("skein")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("skein")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl outward from a seed URL, then rank and analyze the pages and links \
                it found.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The seed URL to crawl from")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link depth from the seed")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    arg!(-p --"max-pages" <NUM>)
                        .required(false)
                        .help("Maximum number of pages to visit")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of async workers fetching pages concurrently.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"rps" <RATE>)
                        .required(false)
                        .help("Requests per second per host when no domain rule sets one")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    arg!(--"user-agent" <AGENT>)
                        .required(false)
                        .help("User-Agent header sent with every request"),
                )
                .arg(
                    arg!(--"follow-external")
                        .required(false)
                        .help("Follow links that leave the seed's domain (default: record them only)")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"ignore-robots")
                        .required(false)
                        .help("Do not fetch or honor robots.txt")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-i --"include" <REGEX>)
                        .required(false)
                        .help("Only crawl URLs matching this pattern (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-x --"exclude" <REGEX>)
                        .required(false)
                        .help("Never crawl URLs matching this pattern (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"policy" <PATH>)
                        .required(false)
                        .help("Domain policy JSON file (whitelist, blacklist, patterns, domain rules)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"cache-dir" <DIR>)
                        .required(false)
                        .help("Keep fetched pages in an on-disk cache under this directory"),
                )
                .arg(
                    arg!(--"extract-content")
                        .required(false)
                        .help("Keep page text and metadata in the results")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"no-analysis")
                        .required(false)
                        .help("Skip link-graph analysis")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("graph"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(--"graph" <PATH>)
                        .required(false)
                        .help("Write the link graph to this file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"graph-format" <FORMAT>)
                        .required(false)
                        .help("Link graph format: json, dot, csv, matrix")
                        .value_parser(["json", "dot", "csv", "matrix"])
                        .default_value("json"),
                )
                .arg(
                    arg!(--"pages")
                        .required(false)
                        .help("Print a per-host listing of crawled pages")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("policy")
                .about("Inspect domain policy files")
                .subcommand(
                    command!("check")
                        .about("Show the decision a policy makes for a URL")
                        .arg(
                            arg!(--"policy" <PATH>)
                                .required(true)
                                .help("Domain policy JSON file")
                                .value_parser(clap::value_parser!(std::path::PathBuf)),
                        )
                        .arg(
                            arg!(-d --"depth" <DEPTH>)
                                .required(false)
                                .help("Link depth to evaluate the URL at")
                                .value_parser(clap::value_parser!(usize)),
                        )
                        .arg(arg!(<URL>).required(true).help("The URL to evaluate")),
                )
                .subcommand(
                    command!("show")
                        .about("Validate a policy file and print it normalized")
                        .arg(
                            arg!(--"policy" <PATH>)
                                .required(true)
                                .help("Domain policy JSON file")
                                .value_parser(clap::value_parser!(std::path::PathBuf)),
                        ),
                ),
        )
        .subcommand(
            command!("cache")
                .about("Maintain the on-disk page cache")
                .subcommand(
                    command!("purge").about("Remove expired entries").arg(
                        arg!([DIR])
                            .required(false)
                            .help("Cache directory")
                            .default_value("~/.cache/skein/"),
                    ),
                )
                .subcommand(
                    command!("clear").about("Remove every entry").arg(
                        arg!([DIR])
                            .required(false)
                            .help("Cache directory")
                            .default_value("~/.cache/skein/"),
                    ),
                ),
        )
}
