//! Domain policy engine: the allow/deny half of admission control.
//!
//! A [`DomainPolicy`] answers "may this URL be fetched" from blacklist,
//! whitelist, per-domain rules and regex patterns, in that order, and keeps
//! the per-domain [`DomainRule`] overrides the crawler reads for throttling,
//! headers and timeouts. Policies are plain values: build one, share it
//! behind an `Arc`, mutate it through `&self`, export it and replay it.

use lru::LruCache;
use regex::Regex;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::PolicyError;
use crate::url_utils::host_matches_domain;

pub const REASON_ALLOWED: &str = "allowed";
pub const REASON_BLACKLISTED: &str = "blacklisted";
pub const REASON_NOT_WHITELISTED: &str = "not whitelisted";
pub const REASON_EXCLUDED: &str = "excluded by pattern";
pub const REASON_NO_INCLUDE: &str = "no include pattern matched";
pub const REASON_BLOCKED_PATH: &str = "blocked path";
pub const REASON_PATH_NOT_ALLOWED: &str = "path not allowed";
pub const REASON_DOMAIN_DEPTH: &str = "exceeds domain max depth";
pub const REASON_INVALID_URL: &str = "invalid url";

/// Decisions remembered by a policy built with [`DomainPolicy::new`].
pub const DEFAULT_DECISION_CAPACITY: usize = 10_000;

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Per-domain overrides, looked up by hostname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainRule {
    /// Requests per second for this domain.
    pub rate_limit: Option<f64>,
    pub custom_headers: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub max_depth: Option<usize>,
    pub allowed_paths: Vec<String>,
    pub blocked_paths: Vec<String>,
    /// Maximum simultaneous fetches against this domain.
    pub concurrency: Option<usize>,
}

impl DomainRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64) -> Self {
        self.rate_limit = Some(requests_per_second);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.custom_headers
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_allowed_path(mut self, path: &str) -> Self {
        self.allowed_paths.push(path.to_string());
        self
    }

    pub fn with_blocked_path(mut self, path: &str) -> Self {
        self.blocked_paths.push(path.to_string());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self, domain: &str) -> PolicyResult<()> {
        let invalid = |reason: String| PolicyError::InvalidRule {
            domain: domain.to_string(),
            reason,
        };

        if let Some(rate) = self.rate_limit
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(invalid(format!("rate_limit must be positive, got {}", rate)));
        }
        if self.timeout_ms == Some(0) {
            return Err(invalid("timeout_ms must be positive".to_string()));
        }
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency must be positive".to_string()));
        }
        for (name, value) in &self.custom_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name '{}'", name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("invalid value for header '{}'", name)))?;
        }
        for path in self.allowed_paths.iter().chain(&self.blocked_paths) {
            if !path.starts_with('/') {
                return Err(invalid(format!("path '{}' must start with '/'", path)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Include,
    Exclude,
}

/// Serializable snapshot of a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub domain_rules: BTreeMap<String, DomainRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: REASON_ALLOWED.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub evaluations: u64,
    pub cache_hits: u64,
    pub whitelist_hits: u64,
    pub whitelist_misses: u64,
    pub blacklist_hits: u64,
    pub blacklist_misses: u64,
    pub pattern_hits: u64,
    pub pattern_misses: u64,
    pub rule_blocks: u64,
}

#[derive(Default)]
struct PolicyCounters {
    evaluations: AtomicU64,
    cache_hits: AtomicU64,
    whitelist_hits: AtomicU64,
    whitelist_misses: AtomicU64,
    blacklist_hits: AtomicU64,
    blacklist_misses: AtomicU64,
    pattern_hits: AtomicU64,
    pattern_misses: AtomicU64,
    rule_blocks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str) -> PolicyResult<Self> {
        let regex = Regex::new(source).map_err(|e| PolicyError::InvalidPattern {
            pattern: source.to_string(),
            source: e,
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct PolicyState {
    whitelist: BTreeSet<String>,
    blacklist: BTreeSet<String>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    rules: BTreeMap<String, DomainRule>,
}

impl PolicyState {
    fn from_config(config: &PolicyConfig) -> PolicyResult<Self> {
        let mut state = PolicyState::default();
        for domain in &config.whitelist {
            state.whitelist.insert(normalize_domain(domain)?);
        }
        for domain in &config.blacklist {
            state.blacklist.insert(normalize_domain(domain)?);
        }
        for pattern in &config.include_patterns {
            state.include.push(Pattern::compile(pattern)?);
        }
        for pattern in &config.exclude_patterns {
            state.exclude.push(Pattern::compile(pattern)?);
        }
        for (domain, rule) in &config.domain_rules {
            let domain = normalize_domain(domain)?;
            rule.validate(&domain)?;
            state.rules.insert(domain, rule.clone());
        }
        Ok(state)
    }

    fn to_config(&self) -> PolicyConfig {
        PolicyConfig {
            whitelist: self.whitelist.iter().cloned().collect(),
            blacklist: self.blacklist.iter().cloned().collect(),
            include_patterns: self.include.iter().map(|p| p.source.clone()).collect(),
            exclude_patterns: self.exclude.iter().map(|p| p.source.clone()).collect(),
            domain_rules: self.rules.clone(),
        }
    }

    /// Exact host first, then the nearest parent domain with a rule.
    fn rule_for(&self, host: &str) -> Option<(&String, &DomainRule)> {
        let mut candidate = host;
        loop {
            if let Some(entry) = self.rules.get_key_value(candidate) {
                return Some(entry);
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return None,
            }
        }
    }
}

/// Lowercase a domain entry and strip any scheme, path or wildcard prefix.
fn normalize_domain(raw: &str) -> PolicyResult<String> {
    let mut domain = raw.trim().to_lowercase();
    if let Some((_, rest)) = domain.split_once("://") {
        domain = rest.to_string();
    }
    if let Some((host, _)) = domain.split_once('/') {
        domain = host.to_string();
    }
    let domain = domain.trim_start_matches("*.").trim_end_matches('.').to_string();

    if domain.is_empty() || domain.chars().any(|c| c.is_whitespace() || c == '*') {
        return Err(PolicyError::InvalidDomain(raw.to_string()));
    }
    Ok(domain)
}

type DecisionKey = (String, Option<usize>);

/// Memoized decisions. `generation` moves on every policy mutation so a
/// decision computed against older state is never stored.
struct DecisionCache {
    entries: LruCache<DecisionKey, PolicyDecision>,
    generation: u64,
}

impl DecisionCache {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            generation: 0,
        }
    }
}

pub struct DomainPolicy {
    state: RwLock<PolicyState>,
    decisions: Mutex<DecisionCache>,
    counters: PolicyCounters,
}

impl DomainPolicy {
    /// An empty policy that allows every URL.
    pub fn new() -> Self {
        Self::with_decision_capacity(DEFAULT_DECISION_CAPACITY)
    }

    /// An empty policy remembering at most `capacity` recent decisions.
    pub fn with_decision_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(PolicyState::default()),
            decisions: Mutex::new(DecisionCache::new(capacity)),
            counters: PolicyCounters::default(),
        }
    }

    pub fn from_config(config: PolicyConfig) -> PolicyResult<Self> {
        let policy = Self::new();
        policy.import_config(config)?;
        Ok(policy)
    }

    pub fn from_json(json: &str) -> PolicyResult<Self> {
        let config: PolicyConfig = serde_json::from_str(json)?;
        Self::from_config(config)
    }

    pub fn to_json(&self) -> PolicyResult<String> {
        Ok(serde_json::to_string_pretty(&self.export_config())?)
    }

    pub fn export_config(&self) -> PolicyConfig {
        self.read_state().to_config()
    }

    /// Replace the whole configuration. Nothing changes if any entry is invalid.
    pub fn import_config(&self, config: PolicyConfig) -> PolicyResult<()> {
        let state = PolicyState::from_config(&config)?;
        *self.write_state() = state;
        self.invalidate();
        Ok(())
    }

    pub fn add_whitelist_domain(&self, domain: &str) -> PolicyResult<()> {
        let domain = normalize_domain(domain)?;
        self.write_state().whitelist.insert(domain);
        self.invalidate();
        Ok(())
    }

    pub fn remove_whitelist_domain(&self, domain: &str) -> PolicyResult<bool> {
        let domain = normalize_domain(domain)?;
        let removed = self.write_state().whitelist.remove(&domain);
        self.invalidate();
        Ok(removed)
    }

    pub fn add_blacklist_domain(&self, domain: &str) -> PolicyResult<()> {
        let domain = normalize_domain(domain)?;
        self.write_state().blacklist.insert(domain);
        self.invalidate();
        Ok(())
    }

    pub fn remove_blacklist_domain(&self, domain: &str) -> PolicyResult<bool> {
        let domain = normalize_domain(domain)?;
        let removed = self.write_state().blacklist.remove(&domain);
        self.invalidate();
        Ok(removed)
    }

    pub fn add_pattern(&self, pattern: &str, kind: PatternKind) -> PolicyResult<()> {
        let compiled = Pattern::compile(pattern)?;
        {
            let mut state = self.write_state();
            match kind {
                PatternKind::Include => state.include.push(compiled),
                PatternKind::Exclude => state.exclude.push(compiled),
            }
        }
        self.invalidate();
        Ok(())
    }

    pub fn set_domain_rules(&self, domain: &str, rule: DomainRule) -> PolicyResult<()> {
        let domain = normalize_domain(domain)?;
        rule.validate(&domain)?;
        self.write_state().rules.insert(domain, rule);
        self.invalidate();
        Ok(())
    }

    pub fn remove_domain_rules(&self, domain: &str) -> PolicyResult<Option<DomainRule>> {
        let domain = normalize_domain(domain)?;
        let removed = self.write_state().rules.remove(&domain);
        self.invalidate();
        Ok(removed)
    }

    /// Overrides for a hostname, falling back to the nearest parent domain.
    pub fn get_domain_rules(&self, hostname: &str) -> Option<DomainRule> {
        let host = hostname.to_lowercase();
        self.read_state().rule_for(&host).map(|(_, rule)| rule.clone())
    }

    /// Like [`get_domain_rules`](Self::get_domain_rules), also naming the
    /// domain the rule was registered under.
    pub fn matching_rule(&self, hostname: &str) -> Option<(String, DomainRule)> {
        let host = hostname.to_lowercase();
        self.read_state()
            .rule_for(&host)
            .map(|(domain, rule)| (domain.clone(), rule.clone()))
    }

    pub fn is_allowed(&self, url: &str) -> PolicyDecision {
        self.evaluate(url, None)
    }

    /// Like [`is_allowed`](Self::is_allowed), also enforcing a rule's `max_depth`.
    pub fn is_allowed_at_depth(&self, url: &str, depth: usize) -> PolicyDecision {
        self.evaluate(url, Some(depth))
    }

    fn evaluate(&self, url: &str, depth: Option<usize>) -> PolicyDecision {
        bump(&self.counters.evaluations);

        let key = (url.to_string(), depth);
        let generation = {
            let mut cache = self.lock_decisions();
            if let Some(decision) = cache.entries.get(&key) {
                bump(&self.counters.cache_hits);
                return decision.clone();
            }
            cache.generation
        };

        let decision = self.decide(url, depth);
        debug!(url = %url, allowed = decision.allowed, reason = %decision.reason, "Policy decision");
        self.remember(key, decision.clone(), generation);
        decision
    }

    fn remember(&self, key: DecisionKey, decision: PolicyDecision, generation: u64) {
        let mut cache = self.lock_decisions();
        if cache.generation == generation {
            cache.entries.put(key, decision);
        }
    }

    /// Number of memoized decisions.
    pub fn cached_decisions(&self) -> usize {
        self.lock_decisions().entries.len()
    }

    fn decide(&self, url: &str, depth: Option<usize>) -> PolicyDecision {
        let Ok(parsed) = Url::parse(url) else {
            return PolicyDecision::deny(REASON_INVALID_URL);
        };
        let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) else {
            return PolicyDecision::deny(REASON_INVALID_URL);
        };

        let state = self.read_state();

        if state
            .blacklist
            .iter()
            .any(|domain| host_matches_domain(&host, domain))
        {
            bump(&self.counters.blacklist_hits);
            return PolicyDecision::deny(REASON_BLACKLISTED);
        }
        bump(&self.counters.blacklist_misses);

        if !state.whitelist.is_empty() {
            if state
                .whitelist
                .iter()
                .any(|domain| host_matches_domain(&host, domain))
            {
                bump(&self.counters.whitelist_hits);
            } else {
                bump(&self.counters.whitelist_misses);
                return PolicyDecision::deny(REASON_NOT_WHITELISTED);
            }
        }

        if let Some((_, rule)) = state.rule_for(&host) {
            let path = parsed.path();
            let reason = if rule.blocked_paths.iter().any(|p| path.starts_with(p.as_str())) {
                Some(REASON_BLOCKED_PATH)
            } else if !rule.allowed_paths.is_empty()
                && !rule.allowed_paths.iter().any(|p| path.starts_with(p.as_str()))
            {
                Some(REASON_PATH_NOT_ALLOWED)
            } else if let (Some(max), Some(depth)) = (rule.max_depth, depth)
                && depth > max
            {
                Some(REASON_DOMAIN_DEPTH)
            } else {
                None
            };
            if let Some(reason) = reason {
                bump(&self.counters.rule_blocks);
                return PolicyDecision::deny(reason);
            }
        }

        if state.exclude.iter().any(|p| p.regex.is_match(url)) {
            bump(&self.counters.pattern_hits);
            return PolicyDecision::deny(REASON_EXCLUDED);
        }

        if !state.include.is_empty() {
            if state.include.iter().any(|p| p.regex.is_match(url)) {
                bump(&self.counters.pattern_hits);
            } else {
                bump(&self.counters.pattern_misses);
                return PolicyDecision::deny(REASON_NO_INCLUDE);
            }
        }

        PolicyDecision::allow()
    }

    pub fn stats(&self) -> PolicyStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let c = &self.counters;
        PolicyStats {
            evaluations: load(&c.evaluations),
            cache_hits: load(&c.cache_hits),
            whitelist_hits: load(&c.whitelist_hits),
            whitelist_misses: load(&c.whitelist_misses),
            blacklist_hits: load(&c.blacklist_hits),
            blacklist_misses: load(&c.blacklist_misses),
            pattern_hits: load(&c.pattern_hits),
            pattern_misses: load(&c.pattern_misses),
            rule_blocks: load(&c.rule_blocks),
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.counters;
        for counter in [
            &c.evaluations,
            &c.cache_hits,
            &c.whitelist_hits,
            &c.whitelist_misses,
            &c.blacklist_hits,
            &c.blacklist_misses,
            &c.pattern_hits,
            &c.pattern_misses,
            &c.rule_blocks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn invalidate(&self) {
        let mut cache = self.lock_decisions();
        cache.entries.clear();
        cache.generation = cache.generation.wrapping_add(1);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, PolicyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, PolicyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_decisions(&self) -> std::sync::MutexGuard<'_, DecisionCache> {
        self.decisions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DomainPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainPolicy")
            .field("config", &self.export_config())
            .finish()
    }
}
