pub mod cache;
pub mod crawler;
pub mod error;
pub mod parser;
pub mod policy;
pub mod rate_limit;
pub mod result;
pub mod robots;
pub mod url_utils;

pub use cache::{CacheConfig, CacheStats, FetchKeyOptions, PageCache, cache_key};
pub use crawler::{CrawlHandle, CrawlOptions, Crawler, ProgressCallback, ResultCallback, RunState};
pub use error::{CacheError, PolicyError, Result, ScanError};
pub use parser::{ExtractedLink, PageMetadata, ParsedPage, parse_html};
pub use policy::{DomainPolicy, DomainRule, PatternKind, PolicyConfig, PolicyDecision, PolicyStats};
pub use rate_limit::RateLimiter;
pub use result::{
    CrawlErrorRecord, CrawlOutcome, CrawlStats, EdgeMetadata, FilterDecision, FilterSummary,
    LinkEdge, PageFetchResult, PageRecord,
};
pub use robots::RobotsChecker;
