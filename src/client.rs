use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::{
    errors::ServiceError,
    types::{Analysis, CrawlRequest, JobHandle, JobStatus},
    utils::{HEALTH_TIMEOUT_SECS, SERVICE_URL},
};

/// Which artifact of a completed job to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactVariant {
    Download,
    Preview,
}

/// The four operations the conversion service exposes. The controller only
/// talks to the service through this seam, so tests can substitute a fake.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Preflight inspection of a target site. The caller validates the URL
    /// before calling.
    async fn analyze(&self, url: &str) -> Result<Analysis, ServiceError>;

    /// Launches an asynchronous conversion job.
    async fn start_job(&self, request: &CrawlRequest) -> Result<JobHandle, ServiceError>;

    /// Fetches the current status of a running job. Once a job exists, only
    /// transport failures are expected here.
    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, ServiceError>;

    /// Pure URL construction, no network call. The view opens or embeds the
    /// result once a job has completed.
    fn artifact_url(&self, job_id: &str, variant: ArtifactVariant) -> String;
}

pub struct ServiceClient {
    client: Client,
    base_url: String,
}

#[derive(Builder, Debug)]
#[builder(setter(into))]
pub struct ServiceClientOptions {
    #[builder(default = "self.default_base_url()")]
    base_url: String,
    #[builder(default = "self.default_client()")]
    client: Client,
}

impl ServiceClientOptions {
    pub fn default_builder() -> ServiceClientOptionsBuilder {
        ServiceClientOptionsBuilder::default()
    }
}

impl ServiceClientOptionsBuilder {
    fn default_base_url(&self) -> String {
        SERVICE_URL.clone()
    }
    fn default_client(&self) -> Client {
        Client::new()
    }
}

impl ServiceClient {
    pub fn new(lo: ServiceClientOptions) -> Self {
        ServiceClient {
            client: lo.client,
            base_url: lo.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness probe, bounded to a short timeout. Used for connectivity
    /// diagnostics only, never as part of the conversion flow.
    pub async fn is_healthy(&self) -> bool {
        let res = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        matches!(res, Ok(r) if r.status().is_success())
    }

    async fn rejection(res: reqwest::Response, fallback: &str) -> ServiceError {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        ServiceError::rejection(status, &body, fallback)
    }
}

#[async_trait]
impl RemoteService for ServiceClient {
    async fn analyze(&self, url: &str) -> Result<Analysis, ServiceError> {
        debug!("analyzing {}", url);
        let res = self
            .client
            .post(format!("{}/api/analyze", self.base_url))
            .json(&json!({ "url": url, "check_sitemap": true }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::rejection(
                res,
                "Failed to analyze URL. Please check the URL and try again.",
            )
            .await);
        }
        Ok(res.json::<Analysis>().await?)
    }

    async fn start_job(&self, request: &CrawlRequest) -> Result<JobHandle, ServiceError> {
        debug!("starting {} job for {}", request.mode, request.url);
        let res = self
            .client
            .post(format!("{}/api/crawl", self.base_url))
            .json(request)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::rejection(res, "Failed to start crawl. Please try again.").await);
        }
        Ok(res.json::<JobHandle>().await?)
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, ServiceError> {
        let res = self
            .client
            .get(format!("{}/api/job/{}", self.base_url, job_id))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::rejection(res, "Failed to fetch job status.").await);
        }
        Ok(res.json::<JobStatus>().await?)
    }

    fn artifact_url(&self, job_id: &str, variant: ArtifactVariant) -> String {
        let path = match variant {
            ArtifactVariant::Download => "download",
            ArtifactVariant::Preview => "preview",
        };
        format!("{}/api/{}/{}", self.base_url, path, job_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn client_at(base_url: &str) -> ServiceClient {
        ServiceClient::new(
            ServiceClientOptions::default_builder()
                .base_url(base_url)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn artifact_urls_are_built_without_network_calls() {
        let client = client_at("http://localhost:8000");

        assert_eq!(
            client.artifact_url("j-42", ArtifactVariant::Download),
            "http://localhost:8000/api/download/j-42"
        );
        assert_eq!(
            client.artifact_url("j-42", ArtifactVariant::Preview),
            "http://localhost:8000/api/preview/j-42"
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let client = client_at("http://conversion.internal:9000/");
        assert_eq!(client.base_url(), "http://conversion.internal:9000");
    }
}
