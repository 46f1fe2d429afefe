// Tests for crawl sessions

use skein_core::crawl::{
    CrawlSettings, build_link_graph, execute_crawl, extract_url_path, generate_crawl_report,
};
use skein_scanner::{CrawlOptions, DomainPolicy, PageCache, PageRecord, ScanError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

// ============================================================================
// URL Path Extraction Tests
// ============================================================================

#[test]
fn test_extract_url_path_root() {
    assert_eq!(extract_url_path("http://example.com/"), "/");
    assert_eq!(extract_url_path("http://example.com"), "/");
}

#[test]
fn test_extract_url_path_nested() {
    assert_eq!(extract_url_path("http://example.com/api/v1/users"), "/api/v1/users");
}

#[test]
fn test_extract_url_path_drops_query_and_fragment() {
    assert_eq!(extract_url_path("http://example.com/api?key=value#top"), "/api");
}

#[test]
fn test_extract_url_path_invalid_url() {
    assert_eq!(extract_url_path("not a url"), "not a url");
}

// ============================================================================
// Session Tests
// ============================================================================

async fn mock_site() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();
    let pages = [
        (
            "/",
            format!(
                r#"<html><head><title>Home</title></head><body>
                <nav><a href="{base}/about">About</a><a href="{base}/blog">Blog</a></nav>
                <a href="https://external.example/">Elsewhere</a>
                </body></html>"#
            ),
        ),
        (
            "/about",
            format!(r#"<html><head><title>About</title></head><body><a href="{base}/">Home</a></body></html>"#),
        ),
        (
            "/blog",
            format!(r#"<html><head><title>Blog</title></head><body><a href="{base}/about">About us</a></body></html>"#),
        ),
    ];
    for (route, html) in pages {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(&server)
            .await;
    }
    server
}

fn test_options() -> CrawlOptions {
    CrawlOptions::default()
        .with_requests_per_second(1000.0)
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_execute_crawl_produces_analysis() {
    let server = mock_site().await;
    let report = execute_crawl(&server.uri(), CrawlSettings::new(test_options()), None, None)
        .await
        .unwrap();

    assert_eq!(report.results.len(), 3);
    assert!(report.errors.is_empty());
    assert_eq!(report.urls.len(), 3);

    let analysis = report.link_analysis.as_ref().unwrap();
    // Three crawled pages plus the external target.
    assert_eq!(analysis.summary.nodes, 4);
    assert!((analysis.importance.total() - 1.0).abs() < 1e-9);
    // Home -> About -> Home
    assert!(analysis.cycles.iter().any(|c| c.length == 2));
    assert_eq!(analysis.patterns.external_links, 1);
}

#[tokio::test]
async fn test_execute_crawl_without_analysis() {
    let server = mock_site().await;
    let mut settings = CrawlSettings::new(test_options().with_max_depth(0));
    settings.analysis = None;

    let report = execute_crawl(&server.uri(), settings, None, None).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert!(report.link_analysis.is_none());
}

#[tokio::test]
async fn test_execute_crawl_callbacks() {
    let server = mock_site().await;
    let messages = Arc::new(Mutex::new(Vec::new()));
    let pages = Arc::new(Mutex::new(Vec::new()));

    let message_sink = messages.clone();
    let page_sink = pages.clone();
    execute_crawl(
        &server.uri(),
        CrawlSettings::new(test_options()),
        Some(Arc::new(move |msg: String| message_sink.lock().unwrap().push(msg))),
        Some(Arc::new(move |page: PageRecord| page_sink.lock().unwrap().push(page))),
    )
    .await
    .unwrap();

    assert_eq!(pages.lock().unwrap().len(), 3);
    let messages = messages.lock().unwrap();
    assert!(messages[0].starts_with("Crawling"));
    assert!(messages.iter().any(|m| m.starts_with("Analyzing")));
}

#[tokio::test]
async fn test_execute_crawl_denied_seed() {
    let server = mock_site().await;
    let policy = Arc::new(DomainPolicy::new());
    policy.add_whitelist_domain("allowed.example").unwrap();

    let result = execute_crawl(
        &server.uri(),
        CrawlSettings::new(test_options().with_policy(policy)),
        None,
        None,
    )
    .await;

    assert!(matches!(result, Err(ScanError::PolicyDenied { .. })));
}

#[tokio::test]
async fn test_execute_crawl_with_disk_cache() {
    let server = mock_site().await;
    let dir = tempfile::tempdir().unwrap();
    let config = skein_scanner::CacheConfig::default().with_disk_path(dir.path().join("cache.db"));

    let first_cache = Arc::new(PageCache::new(config.clone()).unwrap());
    let mut settings = CrawlSettings::new(test_options());
    settings.cache = Some(first_cache.clone());
    execute_crawl(&server.uri(), settings, None, None).await.unwrap();
    assert_eq!(first_cache.disk_len().unwrap(), 3);
    drop(first_cache);

    // A fresh cache on the same file serves everything from disk.
    let second_cache = Arc::new(PageCache::new(config).unwrap());
    let mut settings = CrawlSettings::new(test_options());
    settings.cache = Some(second_cache.clone());
    let report = execute_crawl(&server.uri(), settings, None, None).await.unwrap();

    assert!(report.results.iter().all(|r| r.from_cache));
    assert_eq!(second_cache.stats().disk_hits, 3);
}

#[tokio::test]
async fn test_build_link_graph_keeps_pages_without_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html><body>No links</body></html>", "text/html"))
        .mount(&server)
        .await;

    let outcome = skein_scanner::Crawler::new()
        .crawl(&server.uri(), &test_options())
        .await
        .unwrap();
    let graph = build_link_graph(&outcome);

    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
}

#[tokio::test]
async fn test_generate_crawl_report_groups_by_host() {
    let server = mock_site().await;
    let report = execute_crawl(&server.uri(), CrawlSettings::new(test_options()), None, None)
        .await
        .unwrap();

    let text = generate_crawl_report(&report.results);
    assert!(text.contains("Pages crawled: 3"));
    assert!(text.contains("## 127.0.0.1"));
    assert!(text.contains("3 pages found"));
    assert!(text.contains("/about"));
    assert!(text.contains("/blog"));
}
