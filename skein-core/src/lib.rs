pub mod crawl;
pub mod graph;
pub mod report;

pub use crawl::{CrawlReport, CrawlSettings, execute_crawl};
pub use graph::{AnalysisOptions, ExportFormat, LinkAnalysis, LinkGraph};
