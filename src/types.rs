use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Strategy the service uses to discover pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    Auto,
    SitemapUrl,
    SitemapUpload,
    Recursive,
    SinglePage,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlMode::Auto => "auto",
            CrawlMode::SitemapUrl => "sitemap_url",
            CrawlMode::SitemapUpload => "sitemap_upload",
            CrawlMode::Recursive => "recursive",
            CrawlMode::SinglePage => "single_page",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CrawlMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(CrawlMode::Auto),
            "sitemap_url" => Ok(CrawlMode::SitemapUrl),
            "sitemap_upload" => Ok(CrawlMode::SitemapUpload),
            "recursive" => Ok(CrawlMode::Recursive),
            "single_page" => Ok(CrawlMode::SinglePage),
            _ => Err(anyhow!(
                "unknown crawl mode {}, expected one of auto, sitemap_url, sitemap_upload, recursive, single_page",
                s
            )),
        }
    }
}

/// Phase a conversion job is in, as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    Analyzing,
    Crawling,
    Processing,
    Generating,
    Completed,
    Failed,
}

impl CrawlStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlStatus::Completed | CrawlStatus::Failed)
    }

    // ordering of the phases, used to reject status regressions
    pub(crate) fn rank(&self) -> u8 {
        match self {
            CrawlStatus::Pending => 0,
            CrawlStatus::Analyzing => 1,
            CrawlStatus::Crawling => 2,
            CrawlStatus::Processing => 3,
            CrawlStatus::Generating => 4,
            CrawlStatus::Completed => 5,
            CrawlStatus::Failed => 5,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Analyzing => "analyzing",
            CrawlStatus::Crawling => "crawling",
            CrawlStatus::Processing => "processing",
            CrawlStatus::Generating => "generating",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Sitemap details discovered during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapInfo {
    pub url: Option<String>,
    #[serde(default)]
    pub url_count: u32,
    #[serde(default)]
    pub valid: bool,
    // robots.txt, common_path or html_link
    pub source: Option<String>,
}

/// Result of the preflight analysis of a target site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub url: String,
    pub domain: String,
    pub suggested_mode: CrawlMode,
    pub sitemap_detected: Option<SitemapInfo>,
    #[serde(default)]
    pub robots_txt_found: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub estimated_pages: Option<u32>,
}

/// Crawl parameters sent along with a job. Everything except `max_urls`
/// is fixed by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub max_urls: u32,
    pub max_depth: u32,
    pub include_images: bool,
    pub respect_canonical: bool,
    pub exclude_patterns: Vec<String>,
    pub request_delay: f64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            max_urls: 100,
            max_depth: 3,
            include_images: true,
            respect_canonical: true,
            exclude_patterns: vec![],
            request_delay: 1.0,
        }
    }
}

/// Body of the job creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    pub mode: CrawlMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sitemap_url: Option<String>,
    pub config: CrawlConfig,
}

/// Returned when a job is created. `job_id` is the sole identifier used
/// for polling and artifact retrieval afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub status: CrawlStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Success,
    Failed,
    Pending,
}

impl Default for PageStatus {
    fn default() -> Self {
        PageStatus::Pending
    }
}

/// One entry per page the crawl discovered. Entries may move from pending
/// to success/failed across polls but never disappear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: Option<String>,
    pub size: u64,
    pub has_images: bool,
    pub word_count: Option<u32>,
    #[serde(default)]
    pub status: PageStatus,
}

/// Snapshot of a running job. Replaced wholesale on every poll; identity
/// is `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: CrawlStatus,
    #[serde(default)]
    pub progress: f64,
    pub current_step: Option<String>,
    #[serde(default)]
    pub pages_found: u32,
    #[serde(default)]
    pub pages_processed: u32,
    #[serde(default)]
    pub pages: Vec<PageInfo>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn crawl_config_defaults_are_fixed() {
        let config = CrawlConfig::default();

        assert_eq!(config.max_urls, 100);
        assert_eq!(config.max_depth, 3);
        assert!(config.include_images);
        assert!(config.respect_canonical);
        assert!(config.exclude_patterns.is_empty());
        assert_eq!(config.request_delay, 1.0);
    }

    #[test]
    fn crawl_mode_round_trips_through_str() {
        for s in [
            "auto",
            "sitemap_url",
            "sitemap_upload",
            "recursive",
            "single_page",
        ] {
            let mode = CrawlMode::from_str(s).unwrap();
            assert_eq!(mode.to_string(), s);
        }
        assert!(CrawlMode::from_str("sitemap").is_err());
    }

    #[test]
    fn analysis_deserializes_from_wire_json() {
        let analysis: Analysis = serde_json::from_value(json!({
            "url": "https://docs.example.com",
            "domain": "example.com",
            "suggested_mode": "sitemap_url",
            "sitemap_detected": { "valid": true, "url_count": 42 },
            "robots_txt_found": true
        }))
        .unwrap();

        assert_eq!(analysis.suggested_mode, CrawlMode::SitemapUrl);
        assert_eq!(analysis.estimated_pages, None);
        let sitemap = analysis.sitemap_detected.unwrap();
        assert!(sitemap.valid);
        assert_eq!(sitemap.url_count, 42);
        assert_eq!(sitemap.url, None);
    }

    #[test]
    fn job_status_deserializes_from_wire_json() {
        let status: JobStatus = serde_json::from_value(json!({
            "job_id": "j-123",
            "status": "crawling",
            "progress": 42.5,
            "current_step": "Crawling page 5 of 12",
            "pages_found": 12,
            "pages_processed": 5,
            "pages": [
                { "url": "https://example.com/", "size": 2048, "has_images": true, "status": "success" },
                { "url": "https://example.com/about", "size": 0, "has_images": false }
            ],
            "logs": ["started", "sitemap found"],
            "created_at": "2024-05-01T10:00:00.123456"
        }))
        .unwrap();

        assert_eq!(status.status, CrawlStatus::Crawling);
        assert_eq!(status.progress, 42.5);
        assert_eq!(status.pages.len(), 2);
        assert_eq!(status.pages[0].status, PageStatus::Success);
        // the service may omit the status of a page it has not fetched yet
        assert_eq!(status.pages[1].status, PageStatus::Pending);
        assert_eq!(status.logs.len(), 2);
        assert_eq!(status.completed_at, None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(CrawlStatus::Completed.is_terminal());
        assert!(CrawlStatus::Failed.is_terminal());
        assert!(!CrawlStatus::Generating.is_terminal());
        assert!(CrawlStatus::Generating.rank() > CrawlStatus::Crawling.rank());
    }
}
