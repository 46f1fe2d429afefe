// Orchestrator tests against a local mock site

use reqwest::redirect;
use skein_scanner::crawler::{REASON_ROBOTS, REDIRECT_CONTEXT};
use skein_scanner::{
    CrawlOptions, CrawlOutcome, Crawler, DomainPolicy, DomainRule, PageCache, PageRecord,
    ScanError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{header, method, path, path_regex},
};

fn html_page(title: &str, links: &[String]) -> String {
    let mut html = format!("<html><head><title>{}</title></head><body><nav>", title);
    for (i, link) in links.iter().enumerate() {
        html.push_str(&format!(r#"<a href="{}">Link {}</a>"#, link, i));
    }
    html.push_str("</nav><p>Body text</p></body></html>");
    html
}

async fn mount_page(server: &MockServer, route: &str, title: &str, links: &[String]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html_page(title, links), "text/html"))
        .mount(server)
        .await;
}

/// When each request reached the mock server.
#[derive(Clone, Default)]
struct ArrivalLog(Arc<Mutex<Vec<Instant>>>);

impl ArrivalLog {
    fn sorted(&self) -> Vec<Instant> {
        let mut arrivals = self.0.lock().unwrap().clone();
        arrivals.sort();
        arrivals
    }
}

struct LoggedResponse {
    log: ArrivalLog,
    template: ResponseTemplate,
}

impl Respond for LoggedResponse {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.log.0.lock().unwrap().push(Instant::now());
        self.template.clone()
    }
}

fn logged_page(
    log: &ArrivalLog,
    title: &str,
    links: &[String],
    delay: Duration,
) -> LoggedResponse {
    LoggedResponse {
        log: log.clone(),
        template: ResponseTemplate::new(200)
            .set_body_raw(html_page(title, links), "text/html")
            .set_delay(delay),
    }
}

fn fast_options() -> CrawlOptions {
    CrawlOptions::default()
        .with_requests_per_second(1000.0)
        .with_timeout(Duration::from_secs(5))
}

fn result_urls(outcome: &CrawlOutcome) -> Vec<String> {
    outcome.results.iter().map(|r| r.url.clone()).collect()
}

#[tokio::test]
async fn test_internal_links_followed_external_recorded_only() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(
        &server,
        "/",
        "Home",
        &[
            format!("{}/a", base),
            format!("{}/b", base),
            format!("{}/c", base),
            "https://external.example/".to_string(),
        ],
    )
    .await;
    for route in ["/a", "/b", "/c"] {
        mount_page(&server, route, route, &[]).await;
    }

    let options = fast_options().with_max_depth(1).with_max_pages(10);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.errors.is_empty());

    let urls = result_urls(&outcome);
    assert!(!urls.iter().any(|u| u.contains("external.example")));
    assert!(
        outcome
            .edges
            .iter()
            .any(|e| e.to == "https://external.example/")
    );
    assert_eq!(outcome.stats.external_links, 1);
    assert_eq!(outcome.stats.links_discovered, 4);

    let seed = outcome.results.iter().find(|r| r.depth == 0).unwrap();
    assert_eq!(seed.title.as_deref(), Some("Home"));
    assert_eq!(seed.links_found, 4);
}

#[tokio::test]
async fn test_results_are_unique_and_within_budgets() {
    let server = MockServer::start().await;
    let base = server.uri();
    let links: Vec<String> = (0..10).map(|i| format!("{}/p{}", base, i)).collect();
    mount_page(&server, "/", "Home", &links).await;
    for i in 0..10 {
        // Every page links back to all others.
        mount_page(&server, &format!("/p{}", i), "Page", &links).await;
    }

    let options = fast_options().with_max_depth(2).with_max_pages(4);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert!(outcome.urls.len() <= 4);
    assert!(outcome.results.len() <= 4);
    let unique: HashSet<_> = result_urls(&outcome).into_iter().collect();
    assert_eq!(unique.len(), outcome.results.len());
    assert!(outcome.results.iter().all(|r| r.depth <= 2));
}

#[tokio::test]
async fn test_max_depth_is_respected() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", "Root", &[format!("{}/one", base)]).await;
    mount_page(&server, "/one", "One", &[format!("{}/two", base)]).await;
    mount_page(&server, "/two", "Two", &[format!("{}/three", base)]).await;

    let options = fast_options().with_max_depth(1);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    let urls = result_urls(&outcome);
    assert_eq!(outcome.results.len(), 2);
    assert!(urls.contains(&format!("{}/one", base)));
    assert!(!urls.contains(&format!("{}/two", base)));
    assert_eq!(outcome.stats.max_depth_reached, 1);
    // The edge to the page beyond the depth budget is still recorded.
    assert!(outcome.edges.iter().any(|e| e.to == format!("{}/two", base)));
}

#[tokio::test]
async fn test_blacklisted_domain_is_never_fetched() {
    let server = MockServer::start().await;
    let base = server.uri();
    let port = server.address().port();
    let other_host = format!("http://localhost:{}/elsewhere", port);
    mount_page(&server, "/", "Home", &[other_host.clone()]).await;
    mount_page(&server, "/elsewhere", "Elsewhere", &[]).await;

    let policy = Arc::new(DomainPolicy::new());
    policy.add_blacklist_domain("localhost").unwrap();

    let options = fast_options()
        .with_follow_external(true)
        .with_policy(policy.clone());
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    let decision = outcome
        .filter_decisions
        .iter()
        .find(|d| d.url == other_host)
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "blacklisted");
    assert_eq!(outcome.stats.pages_blocked, 1);
    assert_eq!(outcome.stats.filter.by_reason.get("blacklisted"), Some(&1));
    assert!(policy.stats().blacklist_hits >= 1);
}

#[tokio::test]
async fn test_denied_seed_is_fatal() {
    let server = MockServer::start().await;
    let policy = Arc::new(DomainPolicy::new());
    policy.add_blacklist_domain("127.0.0.1").unwrap();

    let options = fast_options().with_policy(policy);
    let result = Crawler::new().crawl(&server.uri(), &options).await;

    match result {
        Err(ScanError::PolicyDenied { reason, .. }) => assert_eq!(reason, "blacklisted"),
        other => panic!("expected PolicyDenied, got {:?}", other.map(|o| o.results.len())),
    }
}

#[tokio::test]
async fn test_invalid_seed_is_rejected() {
    let result = Crawler::new()
        .crawl("ftp://example.com/", &fast_options())
        .await;
    assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_robots_disallow_is_a_filter_decision_not_an_error() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        "Home",
        &[format!("{}/private/page", base), format!("{}/public", base)],
    )
    .await;
    mount_page(&server, "/public", "Public", &[]).await;
    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = Crawler::new().crawl(&base, &fast_options()).await.unwrap();
    let private = format!("{}/private/page", base);

    assert!(!result_urls(&outcome).contains(&private));
    assert!(outcome.errors.iter().all(|e| e.url != private));
    let decision = outcome
        .filter_decisions
        .iter()
        .find(|d| d.url == private)
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, REASON_ROBOTS);
    assert_eq!(outcome.stats.robots_blocked, 1);
}

#[tokio::test]
async fn test_robots_ignored_when_disabled() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/", "Home", &[]).await;

    let options = fast_options().with_respect_robots(false);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn test_domain_rule_rate_limit_spaces_requests() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", "Home", &[format!("{}/next", base)]).await;
    mount_page(&server, "/next", "Next", &[]).await;

    let policy = Arc::new(DomainPolicy::new());
    policy
        .set_domain_rules("127.0.0.1", DomainRule::new().with_rate_limit(1.0))
        .unwrap();

    let options = fast_options().with_policy(policy).with_concurrency(2);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    let mut stamps: Vec<_> = outcome.results.iter().map(|r| r.timestamp).collect();
    stamps.sort();
    let spacing = stamps[1] - stamps[0];
    assert!(
        spacing.num_milliseconds() >= 900,
        "requests only {}ms apart",
        spacing.num_milliseconds()
    );
}

#[tokio::test]
async fn test_domain_rule_headers_are_sent() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html_page("Keyed", &[]), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let policy = Arc::new(DomainPolicy::new());
    policy
        .set_domain_rules("127.0.0.1", DomainRule::new().with_header("X-Api-Key", "secret"))
        .unwrap();

    let options = fast_options().with_policy(policy);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].title.as_deref(), Some("Keyed"));
}

#[tokio::test]
async fn test_domain_rule_timeout_records_error() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html_page("Slow", &[]), "text/html")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let policy = Arc::new(DomainPolicy::new());
    policy
        .set_domain_rules(
            "127.0.0.1",
            DomainRule::new().with_timeout(Duration::from_millis(100)),
        )
        .unwrap();

    let options = fast_options().with_policy(policy);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.stats.pages_failed, 1);
}

#[tokio::test]
async fn test_http_errors_and_non_html_are_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(
        &server,
        "/",
        "Home",
        &[format!("{}/missing", base), format!("{}/data.json", base)],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let outcome = Crawler::new().crawl(&base, &fast_options()).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.errors.len(), 2);
    let missing = outcome
        .errors
        .iter()
        .find(|e| e.url.ends_with("/missing"))
        .unwrap();
    assert!(missing.error.contains("404"));
    assert_eq!(missing.depth, 1);
    let json = outcome
        .errors
        .iter()
        .find(|e| e.url.ends_with("/data.json"))
        .unwrap();
    assert!(json.error.contains("application/json"));
}

#[tokio::test]
async fn test_exclude_pattern_from_options() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(
        &server,
        "/",
        "Home",
        &[format!("{}/keep", base), format!("{}/skip/me", base)],
    )
    .await;
    mount_page(&server, "/keep", "Keep", &[]).await;

    let options = fast_options().with_exclude_pattern("/skip/");
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    let skipped = outcome
        .filter_decisions
        .iter()
        .find(|d| d.url.ends_with("/skip/me"))
        .unwrap();
    assert_eq!(skipped.reason, "excluded by pattern");
}

#[tokio::test]
async fn test_invalid_pattern_fails_before_traversal() {
    let options = fast_options().with_exclude_pattern("[broken");
    let result = Crawler::new().crawl("http://127.0.0.1:9/", &options).await;
    assert!(matches!(result, Err(ScanError::Policy(_))));
}

#[tokio::test]
async fn test_shared_cache_serves_second_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html_page("Home", &[format!("{}/a", base)]), "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html_page("A", &[]), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(PageCache::in_memory());
    let crawler = Crawler::new().with_cache(cache.clone());
    let options = fast_options();

    let first = crawler.crawl(&base, &options).await.unwrap();
    assert_eq!(first.results.len(), 2);
    assert_eq!(first.stats.cache_misses, 2);
    assert!(first.results.iter().all(|r| !r.from_cache));

    let second = crawler.crawl(&base, &options).await.unwrap();
    assert_eq!(second.results.len(), 2);
    assert_eq!(second.stats.cache_hits, 2);
    assert!(second.results.iter().all(|r| r.from_cache));
    assert_eq!(second.edges, first.edges);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_extract_content_populates_records() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><head><title>T</title><meta name="description" content="About us"></head><body><p>Hello world</p><script>var x;</script></body></html>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    let options = fast_options().with_extract_content(true);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();
    let record = &outcome.results[0];

    let content = record.content.as_deref().unwrap();
    assert!(content.contains("Hello world"));
    assert!(!content.contains("var x"));
    assert_eq!(
        record.metadata.as_ref().unwrap().description.as_deref(),
        Some("About us")
    );

    let plain = Crawler::new().crawl(&base, &fast_options()).await.unwrap();
    assert!(plain.results[0].content.is_none());
}

#[tokio::test]
async fn test_stop_halts_traversal() {
    let server = MockServer::start().await;
    let base = server.uri();
    let links: Vec<String> = (0..5).map(|i| format!("{}/p{}", base, i)).collect();
    mount_page(&server, "/", "Home", &links).await;
    for i in 0..5 {
        mount_page(&server, &format!("/p{}", i), "Page", &[]).await;
    }

    let crawler = Crawler::new();
    let handle = crawler.handle();
    let crawler = crawler.with_result_callback(Arc::new(move |_record: PageRecord| handle.stop()));

    let outcome = crawler.crawl(&base, &fast_options()).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.stats.stopped);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", "Home", &[format!("{}/a", base), format!("{}/b", base)]).await;
    mount_page(&server, "/a", "A", &[]).await;
    mount_page(&server, "/b", "B", &[]).await;

    let crawler = Crawler::new();
    let handle = crawler.handle();
    let pauses = Arc::new(AtomicUsize::new(0));
    let pause_count = pauses.clone();
    let crawler = crawler.with_result_callback(Arc::new(move |record: PageRecord| {
        if record.depth == 0 {
            handle.pause();
            pause_count.fetch_add(1, Ordering::SeqCst);
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.resume();
            });
        }
    }));

    let outcome = crawler.crawl(&base, &fast_options()).await.unwrap();

    assert_eq!(pauses.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.results.len(), 3);
    assert!(!outcome.stats.stopped);
    assert!(outcome.stats.duration >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_progress_callback_sees_every_task() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", "Home", &[format!("{}/a", base)]).await;
    mount_page(&server, "/a", "A", &[]).await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let crawler = Crawler::new().with_progress_callback(Arc::new(move |_worker: usize, url: String| {
        sink.lock().unwrap().push(url);
    }));

    crawler.crawl(&base, &fast_options()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&format!("{}/a", base)));
}

// ============================================================================
// Redirects
// ============================================================================

#[tokio::test]
async fn test_redirect_to_blacklisted_host_is_not_followed() {
    let server = MockServer::start().await;
    let base = server.uri();
    let port = server.address().port();
    let secret = format!("http://localhost:{}/secret", port);
    mount_page(&server, "/", "Home", &[format!("{}/go", base)]).await;
    Mock::given(method("GET"))
        .and(path("/go"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", secret.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html_page("Secret", &[]), "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let policy = Arc::new(DomainPolicy::new());
    policy.add_blacklist_domain("localhost").unwrap();
    let options = fast_options()
        .with_respect_robots(false)
        .with_follow_external(true)
        .with_policy(policy);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert!(!result_urls(&outcome).contains(&secret));
    assert!(outcome.results.iter().all(|r| r.title.as_deref() != Some("Secret")));

    let hop = outcome
        .results
        .iter()
        .find(|r| r.url == format!("{}/go", base))
        .unwrap();
    assert_eq!(hop.status_code, 302);
    assert!(hop.title.is_none());

    let decision = outcome
        .filter_decisions
        .iter()
        .find(|d| d.url == secret)
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "blacklisted");

    let edge = outcome.edges.iter().find(|e| e.to == secret).unwrap();
    assert_eq!(edge.metadata.context, REDIRECT_CONTEXT);
    assert_eq!(outcome.stats.redirects, 1);
}

#[tokio::test]
async fn test_same_site_redirect_is_admitted_and_fetched() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", "Home", &[format!("{}/old", base)]).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", "New", &[]).await;

    let options = fast_options().with_max_depth(1);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 3);
    let moved = outcome
        .results
        .iter()
        .find(|r| r.url == format!("{}/new", base))
        .unwrap();
    // Same depth as the hop that pointed at it.
    assert_eq!(moved.depth, 1);
    assert_eq!(moved.title.as_deref(), Some("New"));
    assert!(outcome.edges.iter().any(|e| {
        e.from == format!("{}/old", base)
            && e.to == format!("{}/new", base)
            && e.metadata.context == REDIRECT_CONTEXT
    }));
    assert!(
        outcome
            .filter_decisions
            .iter()
            .any(|d| d.url == format!("{}/new", base) && d.allowed)
    );
}

// ============================================================================
// Per-host politeness
// ============================================================================

#[tokio::test]
async fn test_robots_crawl_delay_spaces_requests() {
    let server = MockServer::start().await;
    let base = server.uri();
    let log = ArrivalLog::default();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(logged_page(
            &log,
            "Home",
            &[format!("{}/d1", base), format!("{}/d2", base)],
            Duration::ZERO,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/d[12]$"))
        .respond_with(logged_page(&log, "Delayed", &[], Duration::ZERO))
        .mount(&server)
        .await;

    let options = fast_options().with_concurrency(3);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 3);
    let arrivals = log.sorted();
    assert_eq!(arrivals.len(), 3);
    for pair in arrivals.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(900), "requests only {:?} apart", gap);
    }
}

#[tokio::test]
async fn test_domain_rule_concurrency_caps_in_flight_fetches() {
    let server = MockServer::start().await;
    let base = server.uri();
    let log = ArrivalLog::default();
    let links: Vec<String> = (0..4).map(|i| format!("{}/s{}", base, i)).collect();
    mount_page(&server, "/", "Home", &links).await;
    Mock::given(method("GET"))
        .and(path_regex("^/s[0-3]$"))
        .respond_with(logged_page(&log, "Slow", &[], Duration::from_millis(300)))
        .mount(&server)
        .await;

    let policy = Arc::new(DomainPolicy::new());
    policy
        .set_domain_rules("127.0.0.1", DomainRule::new().with_concurrency(2))
        .unwrap();
    let options = fast_options().with_policy(policy).with_concurrency(4);
    let outcome = Crawler::new().crawl(&base, &options).await.unwrap();

    assert_eq!(outcome.results.len(), 5);
    let arrivals = log.sorted();
    assert_eq!(arrivals.len(), 4);
    // With two slots, the third request waits for one of the first two.
    for i in 0..2 {
        let gap = arrivals[i + 2] - arrivals[i];
        assert!(gap >= Duration::from_millis(250), "only {:?} between slot reuse", gap);
    }
}

#[tokio::test]
async fn test_parent_domain_concurrency_spans_subdomains() {
    let server = MockServer::start().await;
    let addr = *server.address();
    let port = addr.port();
    let log = ArrivalLog::default();
    let links = vec![
        format!("http://a.site.test:{}/a1", port),
        format!("http://a.site.test:{}/a2", port),
        format!("http://b.site.test:{}/b1", port),
        format!("http://b.site.test:{}/b2", port),
    ];
    mount_page(&server, "/", "Home", &links).await;
    Mock::given(method("GET"))
        .and(path_regex("^/[ab][12]$"))
        .respond_with(logged_page(&log, "Sub", &[], Duration::from_millis(200)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .resolve("site.test", addr)
        .resolve("a.site.test", addr)
        .resolve("b.site.test", addr)
        .redirect(redirect::Policy::none())
        .build()
        .unwrap();

    let policy = Arc::new(DomainPolicy::new());
    policy
        .set_domain_rules("site.test", DomainRule::new().with_concurrency(1))
        .unwrap();
    let options = fast_options()
        .with_respect_robots(false)
        .with_policy(policy)
        .with_concurrency(4);
    let seed = format!("http://site.test:{}/", port);
    let outcome = Crawler::with_client(client)
        .crawl(&seed, &options)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 5);
    let arrivals = log.sorted();
    assert_eq!(arrivals.len(), 4);
    // One slot for the whole domain: no two subdomain fetches overlap.
    for pair in arrivals.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(150), "fetches only {:?} apart", gap);
    }
}
