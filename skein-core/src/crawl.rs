use crate::graph::{AnalysisOptions, LinkAnalysis, LinkGraph};
use chrono::{DateTime, Utc};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use skein_scanner::{
    CrawlErrorRecord, CrawlOptions, CrawlOutcome, CrawlStats, Crawler, FilterDecision, PageCache,
    PageRecord, ScanError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;
use url::Url;
use uuid::Uuid;

/// Everything needed to run one crawl session
pub struct CrawlSettings {
    pub options: CrawlOptions,
    /// `None` skips link analysis
    pub analysis: Option<AnalysisOptions>,
    pub cache: Option<Arc<PageCache>>,
    pub show_progress_bars: bool,
}

impl CrawlSettings {
    pub fn new(options: CrawlOptions) -> Self {
        Self {
            options,
            analysis: Some(AnalysisOptions::default()),
            cache: None,
            show_progress_bars: false,
        }
    }
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback for reporting individual pages as they come in
pub type CrawlResultCallback = Arc<dyn Fn(PageRecord) + Send + Sync>;

/// The result of one crawl session, with link analysis when requested.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub id: Uuid,
    pub seed: String,
    pub started_at: DateTime<Utc>,
    pub urls: Vec<String>,
    pub results: Vec<PageRecord>,
    pub errors: Vec<CrawlErrorRecord>,
    pub filter_decisions: Vec<FilterDecision>,
    pub stats: CrawlStats,
    pub link_analysis: Option<LinkAnalysis>,
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Graph of every crawled page plus every recorded link.
pub fn build_link_graph(outcome: &CrawlOutcome) -> LinkGraph {
    let mut graph = LinkGraph::new();
    for record in &outcome.results {
        graph.add_node(&record.url);
    }
    for edge in &outcome.edges {
        graph.add_link(&edge.from, &edge.to, edge.metadata.clone());
    }
    graph
}

/// Crawl from `seed`, then analyze the discovered link graph.
///
/// Per-page failures end up in the report. Only an invalid or denied seed,
/// or an invalid pattern in the options, is returned as an error.
pub async fn execute_crawl(
    seed: &str,
    settings: CrawlSettings,
    progress_callback: Option<CrawlProgressCallback>,
    result_callback: Option<CrawlResultCallback>,
) -> Result<CrawlReport, ScanError> {
    let CrawlSettings {
        options,
        analysis,
        cache,
        show_progress_bars,
    } = settings;
    let started_at = Utc::now();

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        pb.set_message("Starting crawl...");
        Some(pb)
    } else {
        None
    };

    let processed_count = Arc::new(AtomicUsize::new(0));
    let internal_progress_callback: skein_scanner::ProgressCallback = match progress_bar.clone() {
        Some(pb) => {
            let count_clone = processed_count.clone();
            Arc::new(move |_worker_id: usize, url: String| {
                let count = count_clone.fetch_add(1, Ordering::Relaxed) + 1;
                pb.set_message(format!("Crawling... {} URLs processed ({})", count, url));
                pb.tick();
            })
        }
        None => {
            let count_clone = processed_count.clone();
            Arc::new(move |_worker_id: usize, _url: String| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            })
        }
    };

    let mut crawler = Crawler::new().with_progress_callback(internal_progress_callback);
    if let Some(cache) = cache {
        crawler = crawler.with_cache(cache);
    }
    if let Some(cb) = result_callback {
        crawler = crawler.with_result_callback(cb);
    }

    if let Some(ref callback) = progress_callback {
        callback(format!("Crawling {}", seed));
    }

    let outcome = match crawler.crawl(seed, &options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_with_message(format!("Crawl failed: {}", e));
            }
            return Err(e);
        }
    };

    if let Some(ref pb) = progress_bar {
        let total = processed_count.load(Ordering::Relaxed);
        pb.finish_with_message(format!("Crawl complete! {} URLs processed", total));
    }

    let link_analysis = analysis.map(|analysis_options| {
        if let Some(ref callback) = progress_callback {
            callback(format!("Analyzing {} links", outcome.edges.len()));
        }
        LinkAnalysis::analyze(build_link_graph(&outcome), &analysis_options)
    });

    info!(
        seed = %outcome.seed,
        pages = outcome.results.len(),
        errors = outcome.errors.len(),
        analyzed = link_analysis.is_some(),
        "Crawl session finished"
    );

    Ok(CrawlReport {
        id: Uuid::new_v4(),
        seed: outcome.seed,
        started_at,
        urls: outcome.urls,
        results: outcome.results,
        errors: outcome.errors,
        filter_decisions: outcome.filter_decisions,
        stats: outcome.stats,
        link_analysis,
    })
}

fn colored_status(status_code: u16) -> String {
    let code = status_code.to_string();
    match status_code {
        100..=199 => code.white().to_string(),
        200..=299 => code.green().to_string(),
        300..=399 => code.cyan().to_string(),
        400..=499 => code.yellow().to_string(),
        500..=599 => code.red().to_string(),
        _ => code,
    }
}

/// Generate a per-host listing of crawled pages
pub fn generate_crawl_report(results: &[PageRecord]) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Pages crawled: {}\n", results.len()));

    let total_links: usize = results.iter().map(|r| r.links_found).sum();
    report.push_str(&format!("  Total links found: {}\n", total_links));

    let cached = results.iter().filter(|r| r.from_cache).count();
    report.push_str(&format!("  Served from cache: {}\n", cached));

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    let mut by_host: BTreeMap<String, Vec<&PageRecord>> = BTreeMap::new();
    for result in results {
        if let Ok(url) = Url::parse(&result.url)
            && let Some(host) = url.host_str()
        {
            by_host.entry(host.to_string()).or_default().push(result);
        }
    }

    for (host, host_results) in by_host.iter_mut() {
        host_results.sort_by_key(|r| (r.depth, r.url.clone()));
        report.push_str(&format!("## {}\n", host));
        report.push_str(&format!("  {} pages found\n\n", host_results.len()));

        for result in host_results.iter() {
            let path = extract_url_path(&result.url);
            let mut line = format!(
                "  {} {} {}",
                colored_status(result.status_code),
                format!("d{}", result.depth).dimmed(),
                path
            );

            if let Some(ref title) = result.title {
                line.push_str(&format!(" {}", format!("\"{}\"", title).bright_black()));
            }
            if let Some(ref content_type) = result.content_type
                && !content_type.starts_with("text/html")
            {
                line.push_str(&format!(" {}", content_type.bright_black()));
            }

            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
    }

    report
}
