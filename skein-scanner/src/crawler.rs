use crate::cache::{FetchKeyOptions, PageCache, cache_key};
use crate::error::{Result, ScanError};
use crate::parser::parse_html;
use crate::policy::{DomainPolicy, DomainRule, PatternKind};
use crate::rate_limit::{RateLimiter, rate_from_delay};
use crate::result::{
    CrawlErrorRecord, CrawlOutcome, CrawlStats, EdgeMetadata, FilterDecision, FilterSummary,
    LinkEdge, PageFetchResult, PageRecord,
};
use crate::robots::RobotsChecker;
use crate::url_utils::{host_of, is_same_domain, normalize_url, resolve_url};
use chrono::Utc;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::redirect;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;
pub type ResultCallback = Arc<dyn Fn(PageRecord) + Send + Sync>;

/// Reason recorded when robots.txt disallows a URL the policy admitted.
pub const REASON_ROBOTS: &str = "disallowed by robots.txt";

/// Edge context for a 3xx hop from a page to its `Location`.
pub const REDIRECT_CONTEXT: &str = "redirect";

pub const DEFAULT_USER_AGENT: &str = concat!("skein/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: usize,
    pub max_pages: usize,
    pub follow_external: bool,
    pub respect_robots: bool,
    pub user_agent: String,
    pub timeout: Duration,
    pub concurrency: usize,
    /// Throttle for hosts without a domain rule rate.
    pub requests_per_second: f64,
    pub policy: Option<Arc<DomainPolicy>>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub extract_content: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            follow_external: false,
            respect_robots: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            concurrency: 5,
            requests_per_second: 5.0,
            policy: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            extract_content: false,
        }
    }
}

impl CrawlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_follow_external(mut self, follow: bool) -> Self {
        self.follow_external = follow;
        self
    }

    pub fn with_respect_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_policy(mut self, policy: Arc<DomainPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_include_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    pub fn with_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn with_extract_content(mut self, extract: bool) -> Self {
        self.extract_content = extract;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Pause, resume or stop a crawl from outside the worker pool.
#[derive(Clone)]
pub struct CrawlHandle {
    state: Arc<watch::Sender<RunState>>,
}

impl CrawlHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Running);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Stop dequeuing. Pending tasks are kept.
    pub fn pause(&self) {
        self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Clear the frontier and halt. In-flight fetches finish but enqueue nothing.
    pub fn stop(&self) {
        self.state.send_replace(RunState::Stopped);
    }

    pub fn is_paused(&self) -> bool {
        *self.state.borrow() == RunState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow() == RunState::Stopped
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn reset(&self) {
        self.state.send_replace(RunState::Running);
    }

    fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }
}

struct Task {
    url: String,
    depth: usize,
}

#[derive(Default)]
struct Frontier {
    queue: VecDeque<Task>,
    in_flight: usize,
    discovered: HashSet<String>,
}

#[derive(Default)]
struct SessionState {
    visited: HashSet<String>,
    urls: Vec<String>,
    results: Vec<PageRecord>,
    errors: Vec<CrawlErrorRecord>,
    decisions: Vec<FilterDecision>,
    edges: Vec<LinkEdge>,
    stats: CrawlStats,
}

/// State shared by the workers of one `crawl` call.
struct Session {
    seed_host: String,
    options: CrawlOptions,
    policy: Arc<DomainPolicy>,
    robots: Option<RobotsChecker>,
    limiter: RateLimiter,
    client: Client,
    cache: Option<Arc<PageCache>>,
    frontier: Mutex<Frontier>,
    wake: Notify,
    state: Mutex<SessionState>,
    slots: DomainSlots,
    result_callback: Option<ResultCallback>,
}

struct DomainSlot {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

/// Per-domain fetch permits, keyed by the domain a rule was registered under.
#[derive(Default)]
struct DomainSlots {
    slots: Mutex<HashMap<String, DomainSlot>>,
}

impl DomainSlots {
    /// Waits for a permit. A changed limit replaces the domain's semaphore;
    /// permits already held on the old one drain on their own.
    async fn acquire(&self, domain: &str, limit: usize) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut slots = self.slots.lock().await;
            match slots.get(domain) {
                Some(slot) if slot.limit == limit => slot.semaphore.clone(),
                _ => {
                    let semaphore = Arc::new(Semaphore::new(limit));
                    slots.insert(
                        domain.to_string(),
                        DomainSlot {
                            limit,
                            semaphore: semaphore.clone(),
                        },
                    );
                    semaphore
                }
            }
        };
        semaphore.acquire_owned().await.ok()
    }
}

/// What one GET produced.
enum Fetched {
    Page(PageFetchResult),
    Redirect {
        status_code: u16,
        content_type: Option<String>,
        target: String,
        response_time: Duration,
    },
}

pub struct Crawler {
    client: Client,
    robots_client: Client,
    cache: Option<Arc<PageCache>>,
    control: CrawlHandle,
    progress_callback: Option<ProgressCallback>,
    result_callback: Option<ResultCallback>,
}

impl Crawler {
    /// Page fetches never follow redirects: a 3xx becomes a link to its
    /// target, which is admitted like any other. robots.txt lookups follow
    /// up to five hops.
    pub fn new() -> Self {
        let mut crawler = Self::with_client(build_client(redirect::Policy::none()));
        crawler.robots_client = build_client(redirect::Policy::limited(5));
        crawler
    }

    /// Use `client` for pages and robots.txt. Redirects are only routed
    /// through admission if the client leaves them unfollowed.
    pub fn with_client(client: Client) -> Self {
        Self {
            robots_client: client.clone(),
            client,
            cache: None,
            control: CrawlHandle::new(),
            progress_callback: None,
            result_callback: None,
        }
    }

    /// Share a page cache across crawls.
    pub fn with_cache(mut self, cache: Arc<PageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.result_callback = Some(callback);
        self
    }

    pub fn handle(&self) -> CrawlHandle {
        self.control.clone()
    }

    pub async fn crawl(&self, seed: &str, options: &CrawlOptions) -> Result<CrawlOutcome> {
        let started = Instant::now();
        let seed = normalize_url(seed)?;
        let seed_host = host_of(&seed)
            .ok_or_else(|| ScanError::InvalidUrl(format!("missing host in {}", seed)))?;

        let policy = session_policy(options)?;
        let decision = policy.is_allowed(&seed);
        if !decision.allowed {
            return Err(ScanError::PolicyDenied {
                url: seed,
                reason: decision.reason,
            });
        }

        let workers = options.concurrency.max(1);
        info!(
            seed = %seed,
            workers,
            max_depth = options.max_depth,
            max_pages = options.max_pages,
            "Starting crawl"
        );

        self.control.reset();

        let mut frontier = Frontier::default();
        frontier.discovered.insert(seed.clone());
        frontier.queue.push_back(Task {
            url: seed.clone(),
            depth: 0,
        });

        let session = Arc::new(Session {
            seed_host,
            options: options.clone(),
            policy,
            robots: options.respect_robots.then(|| {
                RobotsChecker::new(self.robots_client.clone(), options.user_agent.clone())
            }),
            limiter: RateLimiter::new(options.requests_per_second),
            client: self.client.clone(),
            cache: self.cache.clone(),
            frontier: Mutex::new(frontier),
            wake: Notify::new(),
            state: Mutex::new(SessionState::default()),
            slots: DomainSlots::default(),
            result_callback: self.result_callback.clone(),
        });

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let session = session.clone();
            let progress_cb = self.progress_callback.clone();
            let control = self.control.subscribe();
            worker_handles.push(tokio::spawn(async move {
                run_worker(worker_id, session, control, progress_cb).await;
            }));
        }

        for result in futures::future::join_all(worker_handles).await {
            result?;
        }

        let stopped = self.control.is_stopped();
        let mut state = std::mem::take(&mut *session.state.lock().await);
        state.stats.stopped = stopped;
        state.stats.duration = started.elapsed();
        state.stats.filter = FilterSummary::from_decisions(&state.decisions);

        info!(
            pages = state.stats.pages_crawled,
            failed = state.stats.pages_failed,
            blocked = state.stats.pages_blocked,
            edges = state.edges.len(),
            "Crawl complete in {:.2?}",
            state.stats.duration
        );

        Ok(CrawlOutcome {
            seed,
            urls: state.urls,
            results: state.results,
            errors: state.errors,
            filter_decisions: state.decisions,
            edges: state.edges,
            stats: state.stats,
        })
    }
}

fn build_client(policy: redirect::Policy) -> Client {
    Client::builder()
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .redirect(policy)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

/// The injected policy, or a session copy of it when the options add patterns.
fn session_policy(options: &CrawlOptions) -> Result<Arc<DomainPolicy>> {
    if options.include_patterns.is_empty() && options.exclude_patterns.is_empty() {
        return Ok(options.policy.clone().unwrap_or_default());
    }

    let policy = match &options.policy {
        Some(base) => DomainPolicy::from_config(base.export_config())?,
        None => DomainPolicy::new(),
    };
    for pattern in &options.include_patterns {
        policy.add_pattern(pattern, PatternKind::Include)?;
    }
    for pattern in &options.exclude_patterns {
        policy.add_pattern(pattern, PatternKind::Exclude)?;
    }
    Ok(Arc::new(policy))
}

/// Returns false once the crawl is stopped.
async fn wait_until_runnable(control: &mut watch::Receiver<RunState>) -> bool {
    loop {
        let state = *control.borrow_and_update();
        match state {
            RunState::Running => return true,
            RunState::Stopped => return false,
            RunState::Paused => {
                if control.changed().await.is_err() {
                    return false;
                }
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    session: Arc<Session>,
    mut control: watch::Receiver<RunState>,
    progress_cb: Option<ProgressCallback>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if !wait_until_runnable(&mut control).await {
            session.frontier.lock().await.queue.clear();
            session.wake.notify_waiters();
            break;
        }

        let wake = session.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let (next, drained) = {
            let mut frontier = session.frontier.lock().await;
            let next = frontier.queue.pop_front();
            if next.is_some() {
                frontier.in_flight += 1;
            }
            (next, frontier.in_flight == 0)
        };

        let task = match next {
            Some(task) => task,
            None if drained => {
                session.wake.notify_waiters();
                break;
            }
            None => {
                tokio::select! {
                    _ = &mut wake => {}
                    _ = control.changed() => {}
                }
                continue;
            }
        };

        if let Some(ref callback) = progress_cb {
            callback(worker_id, task.url.clone());
        }

        let children = process_task(&session, &task).await;

        {
            let mut frontier = session.frontier.lock().await;
            if *control.borrow() != RunState::Stopped {
                for child in children {
                    if frontier.discovered.insert(child.url.clone()) {
                        frontier.queue.push_back(child);
                    }
                }
            }
            frontier.in_flight -= 1;
        }
        session.wake.notify_waiters();
    }

    debug!("Worker {} finished", worker_id);
}

/// Admit, fetch, parse and record one URL. Returns the children to enqueue.
async fn process_task(session: &Session, task: &Task) -> Vec<Task> {
    let options = &session.options;
    let Task { url, depth } = task;
    let depth = *depth;

    {
        let state = session.state.lock().await;
        if depth > options.max_depth
            || state.visited.len() >= options.max_pages
            || state.visited.contains(url)
        {
            return Vec::new();
        }
    }

    if !admit(session, url, depth).await {
        return Vec::new();
    }

    {
        let mut state = session.state.lock().await;
        if state.visited.len() >= options.max_pages || !state.visited.insert(url.clone()) {
            return Vec::new();
        }
        state.urls.push(url.clone());
    }

    let (rule_domain, rule) =
        match host_of(url).and_then(|host| session.policy.matching_rule(&host)) {
            Some((domain, rule)) => (Some(domain), rule),
            None => (None, DomainRule::default()),
        };

    let key = cache_key(
        url,
        &FetchKeyOptions {
            user_agent: options.user_agent.clone(),
            headers: rule.custom_headers.clone(),
            extract_content: options.extract_content,
        },
    );

    let cached = match &session.cache {
        Some(cache) => match cache.get(&key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read failed for {}: {}", url, e);
                record_error(session, url, depth, &ScanError::from(e)).await;
                return Vec::new();
            }
        },
        None => None,
    };

    let (fetched, from_cache, timestamp) = match cached {
        Some(hit) => {
            debug!(url = %url, "Served from page cache");
            session.state.lock().await.stats.cache_hits += 1;
            (hit, true, Utc::now())
        }
        None => {
            if session.cache.is_some() {
                session.state.lock().await.stats.cache_misses += 1;
            }

            let _slot = acquire_domain_slot(session, rule_domain.as_deref(), &rule).await;
            let rate = effective_rate(session, url, &rule).await;
            session.limiter.check_limit_with_rate(url, rate).await;
            let timestamp = Utc::now();

            let timeout = rule.timeout().unwrap_or(options.timeout);
            match fetch_page(
                &session.client,
                url,
                &options.user_agent,
                &rule.custom_headers,
                timeout,
            )
            .await
            {
                Ok(Fetched::Page(fetched)) => {
                    if let Some(cache) = &session.cache
                        && let Err(e) = cache.set(&key, fetched.clone(), None)
                    {
                        warn!("Cache write failed for {}: {}", url, e);
                    }
                    (fetched, false, timestamp)
                }
                Ok(Fetched::Redirect {
                    status_code,
                    content_type,
                    target,
                    response_time,
                }) => {
                    let record = PageRecord {
                        url: url.clone(),
                        depth,
                        status_code,
                        content_type,
                        title: None,
                        content_length: 0,
                        links_found: 1,
                        content: None,
                        metadata: None,
                        response_time,
                        from_cache: false,
                        timestamp,
                    };
                    return record_redirect(session, record, target).await;
                }
                Err(e) => {
                    warn!("Crawl error for {}: {}", url, e);
                    record_error(session, url, depth, &e).await;
                    return Vec::new();
                }
            }
        }
    };

    let page = &fetched.page;
    let record = PageRecord {
        url: url.clone(),
        depth,
        status_code: fetched.status_code,
        content_type: fetched.content_type.clone(),
        title: page.title.clone(),
        content_length: fetched.content_length,
        links_found: page.links.len(),
        content: options.extract_content.then(|| page.content.clone()),
        metadata: options.extract_content.then(|| page.metadata.clone()),
        response_time: fetched.response_time,
        from_cache,
        timestamp,
    };

    let mut children = Vec::new();
    let mut edges = Vec::with_capacity(page.links.len());
    let mut external = 0;
    for link in &page.links {
        edges.push(LinkEdge {
            from: url.clone(),
            to: link.url.clone(),
            metadata: EdgeMetadata {
                anchor_text: link.anchor_text.clone(),
                title: link.title.clone(),
                context: link.context.clone(),
            },
        });

        if !is_same_domain(&link.url, &session.seed_host) {
            external += 1;
            if !options.follow_external {
                continue;
            }
        }
        if depth < options.max_depth {
            children.push(Task {
                url: link.url.clone(),
                depth: depth + 1,
            });
        }
    }

    {
        let mut state = session.state.lock().await;
        state.stats.pages_crawled += 1;
        state.stats.links_discovered += edges.len();
        state.stats.external_links += external;
        state.stats.max_depth_reached = state.stats.max_depth_reached.max(depth);
        state.edges.extend(edges);
        state.results.push(record.clone());
        if state.visited.len() >= options.max_pages {
            children.clear();
        }
    }

    if let Some(ref callback) = session.result_callback {
        callback(record);
    }

    children
}

/// Policy then robots.txt. Records exactly one decision.
async fn admit(session: &Session, url: &str, depth: usize) -> bool {
    let decision = session.policy.is_allowed_at_depth(url, depth);
    let robots_blocked = match &session.robots {
        Some(robots) if decision.allowed => !robots.can_fetch(url).await,
        _ => false,
    };

    let (allowed, reason) = if robots_blocked {
        (false, REASON_ROBOTS.to_string())
    } else {
        (decision.allowed, decision.reason)
    };

    if !allowed {
        debug!(url = %url, reason = %reason, "Skipping blocked URL");
    }

    let mut state = session.state.lock().await;
    if !allowed {
        state.stats.pages_blocked += 1;
        if robots_blocked {
            state.stats.robots_blocked += 1;
        }
    }
    state.decisions.push(FilterDecision::new(url, allowed, reason));
    allowed
}

/// The domain rule rate, else the default capped by robots.txt Crawl-delay.
async fn effective_rate(session: &Session, url: &str, rule: &DomainRule) -> Option<f64> {
    if rule.rate_limit.is_some() {
        return rule.rate_limit;
    }
    let delay = match &session.robots {
        Some(robots) => robots.crawl_delay(url).await,
        None => None,
    }?;
    rate_from_delay(delay).map(|rate| rate.min(session.options.requests_per_second))
}

/// Caps fetches across every host the matched rule covers.
async fn acquire_domain_slot(
    session: &Session,
    rule_domain: Option<&str>,
    rule: &DomainRule,
) -> Option<OwnedSemaphorePermit> {
    let limit = rule.concurrency.filter(|c| *c > 0)?;
    session.slots.acquire(rule_domain?, limit).await
}

/// Record a 3xx hop as a page with one edge. The target is enqueued at the
/// same depth so it passes policy and robots.txt before it is fetched.
async fn record_redirect(session: &Session, record: PageRecord, target: String) -> Vec<Task> {
    let options = &session.options;
    let external = !is_same_domain(&target, &session.seed_host);
    debug!(from = %record.url, to = %target, status = record.status_code, "Redirect");

    let mut children = Vec::new();
    if !external || options.follow_external {
        children.push(Task {
            url: target.clone(),
            depth: record.depth,
        });
    }

    {
        let mut state = session.state.lock().await;
        state.stats.pages_crawled += 1;
        state.stats.redirects += 1;
        state.stats.links_discovered += 1;
        if external {
            state.stats.external_links += 1;
        }
        state.stats.max_depth_reached = state.stats.max_depth_reached.max(record.depth);
        state.edges.push(LinkEdge {
            from: record.url.clone(),
            to: target,
            metadata: EdgeMetadata {
                anchor_text: String::new(),
                title: None,
                context: REDIRECT_CONTEXT.to_string(),
            },
        });
        state.results.push(record.clone());
        if state.visited.len() >= options.max_pages {
            children.clear();
        }
    }

    if let Some(ref callback) = session.result_callback {
        callback(record);
    }

    children
}

async fn record_error(session: &Session, url: &str, depth: usize, error: &ScanError) {
    let mut state = session.state.lock().await;
    state.stats.pages_failed += 1;
    state
        .errors
        .push(CrawlErrorRecord::new(url, depth, error.to_string()));
}

fn is_html(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        }
    }
}

async fn fetch_page(
    client: &Client,
    url: &str,
    user_agent: &str,
    headers: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<Fetched> {
    debug!("Fetching {}", url);

    let mut request = client
        .get(url)
        .header(USER_AGENT, user_agent)
        .timeout(timeout);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let start = Instant::now();
    let response = request.send().await?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if status.is_redirection() {
        let target = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| resolve_url(url, location));
        return match target {
            Some(target) => Ok(Fetched::Redirect {
                status_code: status.as_u16(),
                content_type,
                target,
                response_time: start.elapsed(),
            }),
            None => Err(ScanError::HttpStatus(status.as_u16())),
        };
    }
    if !status.is_success() {
        return Err(ScanError::HttpStatus(status.as_u16()));
    }

    if !is_html(content_type.as_deref()) {
        return Err(ScanError::UnsupportedContentType(
            content_type.unwrap_or_default(),
        ));
    }

    let final_url = response.url().to_string();
    let body = response.text().await?;
    let response_time = start.elapsed();

    Ok(Fetched::Page(PageFetchResult {
        url: url.to_string(),
        status_code: status.as_u16(),
        content_type,
        content_length: body.len(),
        response_time,
        page: parse_html(&body, &final_url),
        fetched_at: Utc::now(),
    }))
}
