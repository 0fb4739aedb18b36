use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time::sleep};

use crate::{
    client::RemoteService,
    errors::Failure,
    types::{Analysis, CrawlConfig, CrawlMode, CrawlRequest, CrawlStatus, JobStatus},
};

/// The lifecycle of one conversion attempt. A single discriminated value
/// rather than independent flags, so the view cannot observe a
/// contradictory combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Analyzing,
    Analyzed,
    Starting,
    Polling,
    Terminal(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// What the view renders: the phase plus whatever data the controller has
/// retained for it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub phase: Phase,
    pub analysis: Option<Analysis>,
    pub status: Option<JobStatus>,
    pub failure: Option<Failure>,
}

#[derive(Builder)]
#[builder(setter(into))]
pub struct JobControllerOptions {
    service: Arc<dyn RemoteService>,
    // delay between the end of one poll and the start of the next
    #[builder(default = "Duration::from_millis(2000)")]
    poll_interval: Duration,
}

impl JobControllerOptions {
    pub fn default_builder() -> JobControllerOptionsBuilder {
        JobControllerOptionsBuilder::default()
    }
}

struct Inner {
    phase: Phase,
    analysis: Option<Analysis>,
    status: Option<JobStatus>,
    failure: Option<Failure>,
    job_id: Option<String>,
    // bumped by submit/reset; a response carrying a stale epoch is discarded
    epoch: u64,
    poll_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn abort_poll(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn clear(&mut self) {
        self.analysis = None;
        self.status = None;
        self.failure = None;
        self.job_id = None;
    }
}

/// Drives a URL through analysis, job creation and polling until a terminal
/// outcome. All service calls go through the [`RemoteService`] seam;
/// observers subscribe to state snapshots through a watch channel.
#[derive(Clone)]
pub struct JobController {
    service: Arc<dyn RemoteService>,
    poll_interval: Duration,
    inner: Arc<Mutex<Inner>>,
    snapshot_tx: Arc<watch::Sender<Snapshot>>,
}

impl JobController {
    pub fn new(lo: JobControllerOptions) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        JobController {
            service: lo.service,
            poll_interval: lo.poll_interval,
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                analysis: None,
                status: None,
                failure: None,
                job_id: None,
                epoch: 0,
                poll_task: None,
            })),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Clears any previous result and runs the preflight analysis. At most
    /// one submit is expected at a time; the view disables its trigger
    /// while one is in flight.
    pub async fn submit(&self, url: &str) {
        let epoch = {
            let mut inner = self.inner.lock().unwrap();
            inner.abort_poll();
            inner.epoch += 1;
            inner.clear();
            inner.phase = Phase::Analyzing;
            publish(&inner, &self.snapshot_tx);
            inner.epoch
        };

        let result = self.service.analyze(url).await;

        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            debug!("discarding analysis of {} for a superseded request", url);
            return;
        }
        match result {
            Ok(analysis) => {
                info!(
                    "analysis of {} complete, suggested mode {}",
                    url, analysis.suggested_mode
                );
                inner.analysis = Some(analysis);
                inner.phase = Phase::Analyzed;
            }
            Err(e) => {
                warn!("analysis of {} failed: {}", url, e);
                inner.failure = Some(Failure::classify(&e));
                inner.phase = Phase::Idle;
            }
        }
        publish(&inner, &self.snapshot_tx);
    }

    /// Launches a job for the analyzed URL. The crawl configuration is
    /// fixed apart from `max_urls`. On success polling starts immediately
    /// with the returned job id, without waiting for a first status fetch.
    pub async fn start_job(&self, mode: CrawlMode, max_urls: u32, sitemap_url: Option<String>) {
        let (epoch, request) = {
            let mut inner = self.inner.lock().unwrap();
            let analysis = match (&inner.phase, &inner.analysis) {
                (Phase::Analyzed, Some(a)) => a.clone(),
                _ => {
                    debug!("start_job ignored, no analysis to start from");
                    return;
                }
            };
            let request = CrawlRequest {
                url: analysis.url,
                mode,
                sitemap_url,
                config: CrawlConfig {
                    max_urls,
                    ..CrawlConfig::default()
                },
            };
            inner.phase = Phase::Starting;
            publish(&inner, &self.snapshot_tx);
            (inner.epoch, request)
        };

        let result = self.service.start_job(&request).await;

        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            debug!("discarding job creation response for a superseded request");
            return;
        }
        match result {
            Ok(handle) => {
                info!("job {} accepted: {}", handle.job_id, handle.message);
                inner.job_id = Some(handle.job_id.clone());
                inner.failure = None;
                inner.phase = Phase::Polling;
                publish(&inner, &self.snapshot_tx);
                self.spawn_poll_loop(&mut inner, handle.job_id, epoch);
            }
            Err(e) => {
                warn!("job creation failed: {}", e);
                inner.failure = Some(Failure::classify(&e));
                inner.phase = Phase::Analyzed;
                publish(&inner, &self.snapshot_tx);
            }
        }
    }

    /// Returns to Idle from any state. Cancels a pending poll; a poll
    /// response still in flight at reset time is discarded when it lands.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        inner.abort_poll();
        inner.clear();
        inner.phase = Phase::Idle;
        publish(&inner, &self.snapshot_tx);
        debug!("controller reset");
    }

    // Self-rescheduling chain: each tick fires only after the previous
    // response was observed, so no two polls for the same job overlap. A
    // failed poll is logged and the retained status left untouched.
    fn spawn_poll_loop(&self, inner: &mut Inner, job_id: String, epoch: u64) {
        let service = self.service.clone();
        let state = self.inner.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let interval = self.poll_interval;

        let task = tokio::spawn(async move {
            loop {
                let result = service.poll_status(&job_id).await;

                let terminal = {
                    let mut inner = state.lock().unwrap();
                    if inner.epoch != epoch || inner.job_id.as_deref() != Some(job_id.as_str()) {
                        debug!("dropping poll response for abandoned job {}", job_id);
                        return;
                    }
                    match result {
                        Ok(status) => apply_status(&mut inner, status, &snapshot_tx),
                        Err(e) => {
                            // transient, the next tick will try again
                            warn!("poll for job {} failed: {}", job_id, e);
                            false
                        }
                    }
                };
                if terminal {
                    return;
                }

                sleep(interval).await;
            }
        });
        inner.poll_task = Some(task);
    }
}

// Replaces the retained status and decides whether polling is over.
// Progress never goes backwards and the job phase never regresses; a
// stray out-of-order response keeps the furthest values already seen.
fn apply_status(
    inner: &mut Inner,
    mut status: JobStatus,
    snapshot_tx: &watch::Sender<Snapshot>,
) -> bool {
    if let Some(prev) = &inner.status {
        if status.progress < prev.progress {
            status.progress = prev.progress;
        }
        if status.status.rank() < prev.status.rank() {
            warn!(
                "job {} reported {} after {}, keeping the later phase",
                status.job_id, status.status, prev.status
            );
            status.status = prev.status;
        }
    }

    let terminal = status.status.is_terminal();
    if terminal {
        inner.phase = Phase::Terminal(match status.status {
            CrawlStatus::Completed => Outcome::Completed,
            _ => Outcome::Failed,
        });
        inner.poll_task = None;
        info!("job {} reached terminal status {}", status.job_id, status.status);
    }
    inner.status = Some(status);
    publish(inner, snapshot_tx);
    terminal
}

fn publish(inner: &Inner, snapshot_tx: &watch::Sender<Snapshot>) {
    snapshot_tx.send_replace(Snapshot {
        phase: inner.phase,
        analysis: inner.analysis.clone(),
        status: inner.status.clone(),
        failure: inner.failure.clone(),
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDateTime;

    fn status_at(status: CrawlStatus, progress: f64) -> JobStatus {
        JobStatus {
            job_id: "j-1".into(),
            status,
            progress,
            current_step: None,
            pages_found: 0,
            pages_processed: 0,
            pages: vec![],
            logs: vec![],
            error: None,
            created_at: NaiveDateTime::from_timestamp_opt(0, 0).unwrap(),
            completed_at: None,
        }
    }

    fn polling_inner() -> Inner {
        Inner {
            phase: Phase::Polling,
            analysis: None,
            status: None,
            failure: None,
            job_id: Some("j-1".into()),
            epoch: 1,
            poll_task: None,
        }
    }

    #[test]
    fn progress_never_decreases_across_accepted_updates() {
        let (tx, _rx) = watch::channel(Snapshot::default());
        let mut inner = polling_inner();

        assert!(!apply_status(&mut inner, status_at(CrawlStatus::Crawling, 60.0), &tx));
        assert!(!apply_status(&mut inner, status_at(CrawlStatus::Processing, 40.0), &tx));

        let kept = inner.status.as_ref().unwrap();
        assert_eq!(kept.progress, 60.0);
        assert_eq!(kept.status, CrawlStatus::Processing);
    }

    #[test]
    fn job_phase_never_regresses() {
        let (tx, _rx) = watch::channel(Snapshot::default());
        let mut inner = polling_inner();

        assert!(!apply_status(&mut inner, status_at(CrawlStatus::Generating, 80.0), &tx));
        assert!(!apply_status(&mut inner, status_at(CrawlStatus::Crawling, 85.0), &tx));

        let kept = inner.status.as_ref().unwrap();
        assert_eq!(kept.status, CrawlStatus::Generating);
        assert_eq!(kept.progress, 85.0);
    }

    #[test]
    fn terminal_status_ends_polling_and_sets_the_outcome() {
        let (tx, rx) = watch::channel(Snapshot::default());
        let mut inner = polling_inner();

        assert!(!apply_status(&mut inner, status_at(CrawlStatus::Generating, 90.0), &tx));
        assert!(apply_status(&mut inner, status_at(CrawlStatus::Completed, 100.0), &tx));

        assert_eq!(inner.phase, Phase::Terminal(Outcome::Completed));
        assert_eq!(rx.borrow().phase, Phase::Terminal(Outcome::Completed));
    }
}
