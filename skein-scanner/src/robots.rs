//! robots.txt compliance: fetch once per origin, then answer per-URL questions.

use reqwest::Client;
use reqwest::header::USER_AGENT;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A fetched robots.txt. `body == None` means it was missing or unreachable
/// and everything is allowed.
#[derive(Debug, Clone, Default)]
pub struct RobotsFile {
    body: Option<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsFile {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(body: &str, user_agent: &str) -> Self {
        Self {
            crawl_delay: parse_crawl_delay(body, user_agent),
            body: Some(body.to_string()),
        }
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.body {
            None => true,
            Some(body) => DefaultMatcher::default().one_agent_allowed_by_robots(
                body,
                product_token(user_agent),
                url,
            ),
        }
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// The product token robots.txt groups are matched against: `skein/0.2 (+url)` -> `skein`.
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or("*")
}

/// Crawl-delay for our agent; a group naming the agent beats the `*` group.
fn parse_crawl_delay(body: &str, user_agent: &str) -> Option<Duration> {
    let token = product_token(user_agent).to_lowercase();
    let mut specific: Option<Duration> = None;
    let mut wildcard: Option<Duration> = None;
    let mut group_agents: Vec<String> = Vec::new();
    let mut in_agent_lines = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_lowercase();
        let value = value.trim();

        if directive == "user-agent" {
            if !in_agent_lines {
                group_agents.clear();
            }
            group_agents.push(value.to_lowercase());
            in_agent_lines = true;
            continue;
        }
        in_agent_lines = false;

        if directive == "crawl-delay"
            && let Ok(seconds) = value.parse::<f64>()
            && seconds.is_finite()
            && seconds >= 0.0
        {
            let delay = Duration::from_secs_f64(seconds);
            if group_agents.iter().any(|a| a != "*" && token.contains(a.as_str())) {
                specific = Some(delay);
            } else if group_agents.iter().any(|a| a == "*") {
                wildcard = Some(delay);
            }
        }
    }

    specific.or(wildcard)
}

pub struct RobotsChecker {
    client: Client,
    user_agent: String,
    files: Mutex<HashMap<String, Arc<OnceCell<RobotsFile>>>>,
}

impl RobotsChecker {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the configured agent may fetch `url`. Fails open.
    pub async fn can_fetch(&self, url: &str) -> bool {
        match self.robots_for(url).await {
            Some(file) => file.is_allowed(url, &self.user_agent),
            None => true,
        }
    }

    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        self.robots_for(url).await.and_then(|f| f.crawl_delay())
    }

    /// Number of origins whose robots.txt has been requested.
    pub async fn cached_origins(&self) -> usize {
        self.files.lock().await.len()
    }

    async fn robots_for(&self, url: &str) -> Option<RobotsFile> {
        let parsed = Url::parse(url).ok()?;
        let origin = parsed.origin().ascii_serialization();
        if origin == "null" {
            return None;
        }

        let cell = {
            let mut files = self.files.lock().await;
            files.entry(origin.clone()).or_default().clone()
        };

        let file = cell
            .get_or_init(|| self.fetch_robots(origin))
            .await;
        Some(file.clone())
    }

    async fn fetch_robots(&self, origin: String) -> RobotsFile {
        let robots_url = format!("{}/robots.txt", origin);
        let response = self
            .client
            .get(&robots_url)
            .header(USER_AGENT, &self.user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => {
                    debug!(robots_url = %robots_url, "Loaded robots.txt");
                    RobotsFile::parse(&body, &self.user_agent)
                }
                Err(e) => {
                    debug!(robots_url = %robots_url, error = %e, "Unreadable robots.txt, allowing all");
                    RobotsFile::allow_all()
                }
            },
            Ok(resp) => {
                debug!(robots_url = %robots_url, status = resp.status().as_u16(), "No robots.txt, allowing all");
                RobotsFile::allow_all()
            }
            Err(e) => {
                debug!(robots_url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                RobotsFile::allow_all()
            }
        }
    }
}
