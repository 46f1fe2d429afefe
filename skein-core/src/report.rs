// Report rendering for crawl sessions

use crate::crawl::{CrawlReport, extract_url_path};
use crate::graph::LinkAnalysis;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

pub fn render_report(report: &CrawlReport, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(report)),
        ReportFormat::Json => generate_json_report(report),
        ReportFormat::Markdown => Ok(generate_markdown_report(report)),
    }
}

fn section(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push_str(title);
    report.push('\n');
    report.push_str(RULE);
    report.push('\n');
}

pub fn generate_text_report(data: &CrawlReport) -> String {
    let mut report = String::new();
    let stats = &data.stats;

    report.push_str(RULE);
    report.push_str("                          SKEIN CRAWL REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Session ID:   {}\n", data.id));
    report.push_str(&format!("Seed:         {}\n", data.seed));
    report.push_str(&format!(
        "Started:      {}\n",
        data.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("Duration:     {:.2?}\n", stats.duration));
    if stats.stopped {
        report.push_str("Status:       Stopped early\n");
    }
    report.push('\n');

    section(&mut report, "SUMMARY");
    report.push_str(&format!("  Pages crawled:     {}\n", stats.pages_crawled));
    report.push_str(&format!("  Pages failed:      {}\n", stats.pages_failed));
    report.push_str(&format!("  URLs blocked:      {}\n", stats.pages_blocked));
    report.push_str(&format!("  Links discovered:  {}\n", stats.links_discovered));
    report.push_str(&format!("  External links:    {}\n", stats.external_links));
    report.push_str(&format!("  Deepest level:     {}\n", stats.max_depth_reached));
    if stats.redirects > 0 {
        report.push_str(&format!("  Redirects:         {}\n", stats.redirects));
    }
    if stats.cache_hits + stats.cache_misses > 0 {
        report.push_str(&format!(
            "  Cache hits/misses: {}/{}\n",
            stats.cache_hits, stats.cache_misses
        ));
    }
    report.push('\n');

    if !stats.filter.by_reason.is_empty() {
        section(&mut report, "FILTER DECISIONS");
        report.push_str(&format!(
            "  {} evaluated, {} allowed, {} blocked\n\n",
            stats.filter.total, stats.filter.allowed, stats.filter.blocked
        ));
        for (reason, count) in &stats.filter.by_reason {
            report.push_str(&format!("  {:>5}  {}\n", count, reason));
        }
        report.push('\n');
    }

    section(&mut report, "PAGES");
    let mut pages: Vec<_> = data.results.iter().collect();
    pages.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.cmp(&b.url)));
    for page in pages {
        report.push_str(&format!(
            "  [d{}] {} {}",
            page.depth,
            page.status_code,
            page.url
        ));
        if let Some(ref title) = page.title {
            report.push_str(&format!("  \"{}\"", title));
        }
        report.push('\n');
    }
    report.push('\n');

    if !data.errors.is_empty() {
        section(&mut report, "ERRORS");
        for error in &data.errors {
            report.push_str(&format!("  [d{}] {}\n        {}\n", error.depth, error.url, error.error));
        }
        report.push('\n');
    }

    if let Some(ref analysis) = data.link_analysis {
        append_text_analysis(&mut report, analysis);
    }

    report.push_str(RULE);
    report.push_str("                            End of Report\n");
    report.push_str(RULE);
    report.push_str("\nGenerated by Skein - a polite web crawler and link-graph analyzer\n\n");

    report
}

fn append_text_analysis(report: &mut String, analysis: &LinkAnalysis) {
    section(report, "LINK ANALYSIS");
    let summary = &analysis.summary;
    report.push_str(&format!(
        "  {} nodes, {} links ({} distinct), {} dangling\n",
        summary.nodes, summary.edges, summary.unique_edges, summary.dangling_nodes
    ));
    report.push_str(&format!(
        "  Importance: {} iterations, {}\n\n",
        analysis.importance.iterations,
        if analysis.importance.converged {
            "converged"
        } else {
            "not converged"
        }
    ));

    if !analysis.top_pages.is_empty() {
        report.push_str("Top pages by importance:\n");
        for (idx, page) in analysis.top_pages.iter().enumerate() {
            report.push_str(&format!(
                "  {:>2}. {:.4}  {} (in {}, out {})\n",
                idx + 1,
                page.score,
                page.url,
                page.in_degree,
                page.out_degree
            ));
        }
        report.push('\n');
    }

    if !analysis.cycles.is_empty() {
        report.push_str(&format!("Link cycles ({}):\n", analysis.cycles.len()));
        for cycle in &analysis.cycles {
            let paths: Vec<String> = cycle.nodes.iter().map(|u| extract_url_path(u)).collect();
            report.push_str(&format!(
                "  {} -> {}  (strength {:.2})\n",
                paths.join(" -> "),
                paths.first().cloned().unwrap_or_default(),
                cycle.strength
            ));
        }
        report.push('\n');
    }

    if !analysis.hubs.is_empty() {
        report.push_str("Hubs:\n");
        for hub in &analysis.hubs {
            report.push_str(&format!("  {:>4} out  {}\n", hub.out_degree, hub.url));
        }
        report.push('\n');
    }

    if !analysis.authorities.is_empty() {
        report.push_str("Authorities:\n");
        for authority in &analysis.authorities {
            report.push_str(&format!("  {:>4} in   {}\n", authority.in_degree, authority.url));
        }
        report.push('\n');
    }

    let patterns = &analysis.patterns;
    report.push_str(&format!(
        "Links: {} internal, {} external, {} cross-domain\n",
        patterns.internal_links, patterns.external_links, patterns.cross_domain_links
    ));
    let connectivity = &analysis.connectivity;
    report.push_str(&format!(
        "Domains: {} ({} cross-domain connections, density {:.3})\n\n",
        connectivity.domains.len(),
        connectivity.unique_connections,
        connectivity.density
    ));
}

pub fn generate_json_report(data: &CrawlReport) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Skein",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "session": {
                "id": data.id,
                "seed": data.seed,
                "started_at": data.started_at.to_rfc3339(),
                "duration_ms": data.stats.duration.as_millis() as u64,
                "stopped": data.stats.stopped
            },
            "urls": data.urls,
            "results": data.results,
            "errors": data.errors,
            "filter_decisions": data.filter_decisions,
            "stats": data.stats,
            "link_analysis": data.link_analysis
        }
    });

    serde_json::to_string_pretty(&json_report)
}

fn md_escape(value: &str) -> String {
    value.replace('|', "\\|")
}

pub fn generate_markdown_report(data: &CrawlReport) -> String {
    let stats = &data.stats;
    let mut md = String::new();

    md.push_str(&format!("# Crawl report: {}\n\n", data.seed));
    md.push_str(&format!(
        "Session `{}`, started {}, took {:.2?}.\n\n",
        data.id,
        data.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        stats.duration
    ));

    md.push_str("## Summary\n\n");
    md.push_str("| Metric | Value |\n|---|---|\n");
    md.push_str(&format!("| Pages crawled | {} |\n", stats.pages_crawled));
    md.push_str(&format!("| Pages failed | {} |\n", stats.pages_failed));
    md.push_str(&format!("| URLs blocked | {} |\n", stats.pages_blocked));
    md.push_str(&format!("| Links discovered | {} |\n", stats.links_discovered));
    md.push_str(&format!("| External links | {} |\n", stats.external_links));
    md.push_str(&format!("| Cache hits | {} |\n\n", stats.cache_hits));

    if !stats.filter.by_reason.is_empty() {
        md.push_str("## Blocked URLs\n\n| Reason | Count |\n|---|---|\n");
        for (reason, count) in &stats.filter.by_reason {
            md.push_str(&format!("| {} | {} |\n", md_escape(reason), count));
        }
        md.push('\n');
    }

    md.push_str("## Pages\n\n| Depth | Status | URL | Title |\n|---|---|---|---|\n");
    for page in &data.results {
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            page.depth,
            page.status_code,
            md_escape(&page.url),
            md_escape(page.title.as_deref().unwrap_or(""))
        ));
    }
    md.push('\n');

    if !data.errors.is_empty() {
        md.push_str("## Errors\n\n| URL | Depth | Error |\n|---|---|---|\n");
        for error in &data.errors {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                md_escape(&error.url),
                error.depth,
                md_escape(&error.error)
            ));
        }
        md.push('\n');
    }

    if let Some(ref analysis) = data.link_analysis {
        md.push_str("## Link analysis\n\n");
        md.push_str(&format!(
            "{} nodes, {} links, {} cycles, domain density {:.3}.\n\n",
            analysis.summary.nodes,
            analysis.summary.edges,
            analysis.cycles.len(),
            analysis.connectivity.density
        ));
        if !analysis.top_pages.is_empty() {
            md.push_str("| Rank | Score | URL | In | Out |\n|---|---|---|---|---|\n");
            for (idx, page) in analysis.top_pages.iter().enumerate() {
                md.push_str(&format!(
                    "| {} | {:.4} | {} | {} | {} |\n",
                    idx + 1,
                    page.score,
                    md_escape(&page.url),
                    page.in_degree,
                    page.out_degree
                ));
            }
            md.push('\n');
        }
    }

    md
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
