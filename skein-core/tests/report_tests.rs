// Tests for report rendering

use chrono::Utc;
use skein_core::crawl::CrawlReport;
use skein_core::graph::{AnalysisOptions, LinkAnalysis, LinkGraph};
use skein_core::report::{
    ReportFormat, generate_json_report, generate_markdown_report, generate_text_report,
    render_report, save_report,
};
use skein_scanner::{
    CrawlErrorRecord, CrawlStats, EdgeMetadata, FilterDecision, FilterSummary, LinkEdge,
    PageRecord,
};
use std::time::Duration;
use uuid::Uuid;

fn page(url: &str, depth: usize, title: Option<&str>) -> PageRecord {
    PageRecord {
        url: url.to_string(),
        depth,
        status_code: 200,
        content_type: Some("text/html".to_string()),
        title: title.map(|t| t.to_string()),
        content_length: 512,
        links_found: 2,
        content: None,
        metadata: None,
        response_time: Duration::from_millis(12),
        from_cache: false,
        timestamp: Utc::now(),
    }
}

fn link(from: &str, to: &str) -> LinkEdge {
    LinkEdge {
        from: from.to_string(),
        to: to.to_string(),
        metadata: EdgeMetadata {
            anchor_text: "go".to_string(),
            title: None,
            context: "nav".to_string(),
        },
    }
}

fn sample_report(with_analysis: bool) -> CrawlReport {
    let decisions = vec![
        FilterDecision::new("https://site.test/", true, "allowed"),
        FilterDecision::new("https://site.test/admin", false, "blocked path"),
    ];
    let stats = CrawlStats {
        pages_crawled: 2,
        pages_failed: 1,
        pages_blocked: 1,
        links_discovered: 4,
        external_links: 1,
        max_depth_reached: 1,
        duration: Duration::from_millis(850),
        filter: FilterSummary::from_decisions(&decisions),
        ..Default::default()
    };
    let link_analysis = with_analysis.then(|| {
        let graph = LinkGraph::from_edges(&[
            link("https://site.test/", "https://site.test/about"),
            link("https://site.test/about", "https://site.test/"),
        ]);
        LinkAnalysis::analyze(graph, &AnalysisOptions::default())
    });

    CrawlReport {
        id: Uuid::new_v4(),
        seed: "https://site.test/".to_string(),
        started_at: Utc::now(),
        urls: vec![
            "https://site.test/".to_string(),
            "https://site.test/about".to_string(),
        ],
        results: vec![
            page("https://site.test/", 0, Some("Home")),
            page("https://site.test/about", 1, Some("About | Team")),
        ],
        errors: vec![CrawlErrorRecord::new(
            "https://site.test/broken",
            1,
            "HTTP status 500",
        )],
        filter_decisions: decisions,
        stats,
        link_analysis,
    }
}

// ============================================================================
// Format Parsing
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("TXT"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("json"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
    assert_eq!(ReportFormat::from_str("Markdown"), Some(ReportFormat::Markdown));
    assert_eq!(ReportFormat::from_str("pdf"), None);
}

#[test]
fn test_report_format_extension() {
    assert_eq!(ReportFormat::Text.extension(), "txt");
    assert_eq!(ReportFormat::Json.extension(), "json");
    assert_eq!(ReportFormat::Markdown.extension(), "md");
}

// ============================================================================
// Text Reports
// ============================================================================

#[test]
fn test_text_report_sections() {
    let report = sample_report(true);
    let text = generate_text_report(&report);

    assert!(text.contains("SKEIN CRAWL REPORT"));
    assert!(text.contains(&report.id.to_string()));
    assert!(text.contains("Pages crawled:     2"));
    assert!(text.contains("FILTER DECISIONS"));
    assert!(text.contains("blocked path"));
    assert!(text.contains("https://site.test/broken"));
    assert!(text.contains("HTTP status 500"));
    assert!(text.contains("LINK ANALYSIS"));
    assert!(text.contains("Link cycles (1)"));
    assert!(text.contains("End of Report"));
}

#[test]
fn test_text_report_orders_pages_by_depth() {
    let text = generate_text_report(&sample_report(false));
    let home = text.find("[d0] 200 https://site.test/").unwrap();
    let about = text.find("[d1] 200 https://site.test/about").unwrap();
    assert!(home < about);
    assert!(!text.contains("LINK ANALYSIS"));
}

// ============================================================================
// JSON and Markdown Reports
// ============================================================================

#[test]
fn test_json_report_structure() {
    let report = sample_report(true);
    let json = generate_json_report(&report).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["report"]["metadata"]["generator"], "Skein");
    assert_eq!(value["report"]["session"]["seed"], "https://site.test/");
    assert_eq!(value["report"]["session"]["duration_ms"], 850);
    assert_eq!(value["report"]["results"].as_array().unwrap().len(), 2);
    assert_eq!(value["report"]["errors"][0]["error"], "HTTP status 500");
    assert_eq!(value["report"]["stats"]["filter"]["blocked"], 1);
    assert_eq!(value["report"]["link_analysis"]["summary"]["nodes"], 2);
}

#[test]
fn test_json_report_without_analysis_is_null() {
    let json = generate_json_report(&sample_report(false)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["report"]["link_analysis"].is_null());
}

#[test]
fn test_markdown_report_escapes_pipes() {
    let md = generate_markdown_report(&sample_report(true));

    assert!(md.starts_with("# Crawl report: https://site.test/"));
    assert!(md.contains("| Pages crawled | 2 |"));
    assert!(md.contains(r"About \| Team"));
    assert!(md.contains("## Blocked URLs"));
    assert!(md.contains("## Errors"));
    assert!(md.contains("## Link analysis"));
}

#[test]
fn test_render_report_dispatches_on_format() {
    let report = sample_report(false);
    assert!(
        render_report(&report, ReportFormat::Text)
            .unwrap()
            .contains("SKEIN CRAWL REPORT")
    );
    assert!(
        render_report(&report, ReportFormat::Markdown)
            .unwrap()
            .starts_with("# Crawl report")
    );
    assert!(
        render_report(&report, ReportFormat::Json)
            .unwrap()
            .trim_start()
            .starts_with('{')
    );
}

// ============================================================================
// Saving
// ============================================================================

#[test]
fn test_save_report_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.md");
    let content = generate_markdown_report(&sample_report(false));

    save_report(&content, &path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn test_save_report_into_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("report.txt");
    assert!(save_report("content", &path).is_err());
}
