use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use skein_core::crawl::{CrawlSettings, execute_crawl, generate_crawl_report};
use skein_core::graph::{ExportFormat, LinkAnalysis};
use skein_core::report::{ReportFormat, render_report, save_report};
use skein_scanner::{CacheConfig, CrawlOptions, DomainPolicy, PageCache};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// File name of the page cache inside a cache directory.
pub const CACHE_FILE_NAME: &str = "pages.db";

pub fn print_banner() {
    println!(
        "{} {}",
        "skein".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("{}", "a polite web crawler and link-graph analyzer".bright_black());
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Load a domain policy from a JSON file.
pub fn load_policy(path: &Path) -> Result<DomainPolicy> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    DomainPolicy::from_json(&json)
        .with_context(|| format!("Invalid policy file {}", path.display()))
}

/// Tilde-expand a cache directory and point at the cache file inside it.
pub fn cache_db_path(dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(dir);
    Path::new(expanded.as_ref()).join(CACHE_FILE_NAME)
}

/// Open (creating if needed) the two-tier page cache under `dir`.
pub fn open_cache(dir: &str) -> Result<PageCache> {
    let db_path = cache_db_path(dir);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
    }
    let cache = PageCache::new(CacheConfig::default().with_disk_path(&db_path))
        .with_context(|| format!("Failed to open page cache {}", db_path.display()))?;
    Ok(cache)
}

/// Translate `crawl` arguments into scanner options.
pub fn build_crawl_options(args: &ArgMatches) -> Result<CrawlOptions> {
    let mut options = CrawlOptions::default()
        .with_max_depth(*args.get_one::<usize>("depth").unwrap_or(&3))
        .with_max_pages(*args.get_one::<usize>("max-pages").unwrap_or(&100))
        .with_concurrency(*args.get_one::<usize>("threads").unwrap_or(&5))
        .with_requests_per_second(*args.get_one::<f64>("rps").unwrap_or(&5.0))
        .with_timeout(Duration::from_secs(
            *args.get_one::<u64>("timeout").unwrap_or(&10),
        ))
        .with_follow_external(args.get_flag("follow-external"))
        .with_respect_robots(!args.get_flag("ignore-robots"))
        .with_extract_content(args.get_flag("extract-content"));

    if let Some(agent) = args.get_one::<String>("user-agent") {
        options = options.with_user_agent(agent);
    }
    if let Some(patterns) = args.get_many::<String>("include") {
        for pattern in patterns {
            options = options.with_include_pattern(pattern);
        }
    }
    if let Some(patterns) = args.get_many::<String>("exclude") {
        for pattern in patterns {
            options = options.with_exclude_pattern(pattern);
        }
    }
    if let Some(path) = args.get_one::<PathBuf>("policy") {
        options = options.with_policy(Arc::new(load_policy(path)?));
    }

    if options.max_pages == 0 {
        bail!("--max-pages must be at least 1");
    }
    if options.concurrency == 0 {
        bail!("--threads must be at least 1");
    }
    if !options.requests_per_second.is_finite() || options.requests_per_second <= 0.0 {
        bail!("--rps must be greater than zero");
    }

    Ok(options)
}

/// Write the analyzed link graph in the chosen format.
pub fn write_graph(analysis: &LinkAnalysis, format: ExportFormat, path: &Path) -> Result<()> {
    let content = analysis.export(format)?;
    save_report(&content, path)
        .with_context(|| format!("Failed to write link graph to {}", path.display()))?;
    Ok(())
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> Result<()> {
    let url = args
        .get_one::<Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let options = build_crawl_options(args)?;

    let format_name = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    let format = ReportFormat::from_str(format_name)
        .ok_or_else(|| anyhow!("Unknown report format '{}'", format_name))?;
    let graph_format: ExportFormat = args
        .get_one::<String>("graph-format")
        .map(String::as_str)
        .unwrap_or("json")
        .parse()?;

    let mut settings = CrawlSettings::new(options);
    settings.show_progress_bars = !quiet;
    if args.get_flag("no-analysis") {
        settings.analysis = None;
    }
    if let Some(dir) = args.get_one::<String>("cache-dir") {
        settings.cache = Some(Arc::new(open_cache(dir)?));
    }

    if !quiet {
        let options = &settings.options;
        println!("\n🕷️  Crawling {}", url);
        println!("Workers: {}", options.concurrency);
        println!("Max depth: {}", options.max_depth);
        println!("Max pages: {}", options.max_pages);
        println!(
            "Cross-domain: {}\n",
            if options.follow_external {
                "follow"
            } else {
                "record only"
            }
        );
    }

    info!(seed = %url, "Starting crawl");
    let report = execute_crawl(url.as_str(), settings, None, None)
        .await
        .context("Crawl failed")?;

    if !quiet {
        println!(
            "\n{} Crawl complete: {} pages, {} errors, {} blocked\n",
            "✓".green().bold(),
            report.stats.pages_crawled,
            report.stats.pages_failed,
            report.stats.pages_blocked
        );
    }

    if args.get_flag("pages") {
        print!("{}", generate_crawl_report(&report.results));
    }

    if let Some(path) = args.get_one::<PathBuf>("graph") {
        match report.link_analysis {
            Some(ref analysis) => {
                write_graph(analysis, graph_format, path)?;
                if !quiet {
                    println!(
                        "{} Link graph ({}) written to {}",
                        "✓".green().bold(),
                        graph_format,
                        path.display().to_string().bright_white()
                    );
                }
            }
            None => bail!("No link analysis available to export"),
        }
    }

    let rendered = render_report(&report, format)?;
    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&rendered, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!(
                    "{} Report ({}) written to {}",
                    "✓".green().bold(),
                    format.extension(),
                    path.display().to_string().bright_white()
                );
            }
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

pub fn handle_policy_check(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("policy")
        .ok_or_else(|| anyhow!("--policy is required"))?;
    let url = args
        .get_one::<String>("URL")
        .ok_or_else(|| anyhow!("a URL is required"))?;
    let policy = load_policy(path)?;

    let decision = match args.get_one::<usize>("depth") {
        Some(depth) => policy.is_allowed_at_depth(url, *depth),
        None => policy.is_allowed(url),
    };

    if decision.allowed {
        println!("{} {} ({})", "✓ allowed".green().bold(), url, decision.reason);
    } else {
        println!("{} {} ({})", "✗ denied".red().bold(), url, decision.reason);
    }
    Ok(())
}

pub fn handle_policy_show(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("policy")
        .ok_or_else(|| anyhow!("--policy is required"))?;
    let policy = load_policy(path)?;
    println!("{}", policy.to_json()?);
    Ok(())
}

pub fn handle_cache_purge(args: &ArgMatches) -> Result<()> {
    let dir = args
        .get_one::<String>("DIR")
        .ok_or_else(|| anyhow!("a cache directory is required"))?;
    let cache = open_cache(dir)?;
    let removed = cache.purge_expired()?;

    print_divider();
    println!(
        "{} Removed {} expired entries from {}",
        "✓".green().bold(),
        removed.to_string().cyan(),
        cache_db_path(dir).display().to_string().bright_white()
    );
    println!("{} {} entries remain on disk", "→".blue(), cache.disk_len()?);
    print_divider();
    Ok(())
}

pub fn handle_cache_clear(args: &ArgMatches) -> Result<()> {
    let dir = args
        .get_one::<String>("DIR")
        .ok_or_else(|| anyhow!("a cache directory is required"))?;
    let cache = open_cache(dir)?;
    cache.clear()?;

    println!(
        "{} Cleared {}",
        "✓".green().bold(),
        cache_db_path(dir).display().to_string().bright_white()
    );
    Ok(())
}
