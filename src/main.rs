use std::{
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{debug, warn};
use pageforge::{
    client::{ArtifactVariant, RemoteService, ServiceClient, ServiceClientOptions},
    controller::{JobController, JobControllerOptions, Outcome, Phase, Snapshot},
    types::{CrawlMode, CrawlStatus, JobStatus},
    utils::{parse_target_url, SERVICE_URL},
};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Pageforge website-to-PDF CLI", long_about = None)]
struct Args {
    /// Website to convert
    url: String,
    /// Crawl mode; defaults to the strategy suggested by the analysis
    #[arg(short, long)]
    mode: Option<String>,
    /// Maximum number of pages to include in the PDF
    #[arg(long, default_value_t = 100)]
    max_urls: u32,
    /// Explicit sitemap URL, for sitemap_url mode
    #[arg(long)]
    sitemap_url: Option<String>,
    /// Analyze the site and exit without starting a job
    #[arg(long, default_value_t = false)]
    analyze_only: bool,
    /// Write the finished PDF to this path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let target = parse_target_url(&args.url)?;
    let mode_override = match &args.mode {
        Some(m) => Some(CrawlMode::from_str(m)?),
        None => None,
    };

    let client = Arc::new(ServiceClient::new(
        ServiceClientOptions::default_builder().build()?,
    ));

    if !client.is_healthy().await {
        warn!(
            "conversion service at {} did not answer the health probe; it may not be running",
            SERVICE_URL.as_str()
        );
    }

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let controller = JobController::new(
        JobControllerOptions::default_builder()
            .service(client.clone() as Arc<dyn RemoteService>)
            .build()?,
    );
    let mut snapshots = controller.subscribe();

    controller.submit(target.as_str()).await;

    let snapshot = controller.snapshot();
    let analysis = match (&snapshot.phase, snapshot.analysis.clone()) {
        (Phase::Analyzed, Some(analysis)) => analysis,
        _ => return Err(bail_with_failure(&snapshot, "analysis failed")),
    };

    println!("Analysis of {}", analysis.url);
    println!("  domain:         {}", analysis.domain);
    if let Some(title) = &analysis.title {
        println!("  title:          {}", title);
    }
    println!("  suggested mode: {}", analysis.suggested_mode);
    if let Some(sitemap) = &analysis.sitemap_detected {
        println!(
            "  sitemap:        {} urls ({})",
            sitemap.url_count,
            if sitemap.valid { "valid" } else { "invalid" }
        );
    }
    println!(
        "  robots.txt:     {}",
        if analysis.robots_txt_found { "found" } else { "not found" }
    );
    if let Some(estimated) = analysis.estimated_pages {
        println!("  estimated pages: {}", estimated);
    }

    if args.analyze_only {
        return Ok(());
    }

    let mode = mode_override.unwrap_or(analysis.suggested_mode);
    debug!("starting {} job with max_urls {}", mode, args.max_urls);
    controller
        .start_job(mode, args.max_urls, args.sitemap_url.clone())
        .await;

    let snapshot = controller.snapshot();
    if snapshot.failure.is_some() {
        return Err(bail_with_failure(&snapshot, "could not start the job"));
    }

    let mut printed_logs = 0usize;
    let mut last_line: Option<(f64, CrawlStatus)> = None;

    render(&controller.snapshot(), &mut printed_logs, &mut last_line);

    loop {
        if should_terminate.load(Ordering::Relaxed) {
            controller.reset();
            return Err(anyhow!("interrupted before the job finished"));
        }

        // wake up periodically so the signal flag is honored while polling
        match tokio::time::timeout(Duration::from_millis(500), snapshots.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => continue,
        }

        let snapshot = snapshots.borrow_and_update().clone();
        render(&snapshot, &mut printed_logs, &mut last_line);

        match snapshot.phase {
            Phase::Terminal(Outcome::Completed) => {
                let status = snapshot
                    .status
                    .ok_or_else(|| anyhow!("completed without a job status"))?;
                finish(&args, client.as_ref(), &status).await?;
                break;
            }
            Phase::Terminal(Outcome::Failed) => {
                let message = snapshot
                    .status
                    .and_then(|s| s.error)
                    .unwrap_or_else(|| "conversion failed".into());
                return Err(anyhow!(message));
            }
            _ => {}
        }
    }

    Ok(())
}

fn render(snapshot: &Snapshot, printed_logs: &mut usize, last_line: &mut Option<(f64, CrawlStatus)>) {
    let status = match &snapshot.status {
        Some(s) => s,
        None => return,
    };

    for line in status.logs.iter().skip(*printed_logs) {
        println!("    {}", line);
    }
    *printed_logs = status.logs.len();

    let line = (status.progress, status.status);
    if *last_line != Some(line) {
        let step = status.current_step.as_deref().unwrap_or("");
        println!(
            "[{:>3.0}%] {} ({}/{} pages) {}",
            status.progress, status.status, status.pages_processed, status.pages_found, step
        );
        *last_line = Some(line);
    }
}

async fn finish(args: &Args, client: &ServiceClient, status: &JobStatus) -> anyhow::Result<()> {
    let download = client.artifact_url(&status.job_id, ArtifactVariant::Download);
    let preview = client.artifact_url(&status.job_id, ArtifactVariant::Preview);

    println!("PDF ready ({} pages processed)", status.pages_processed);
    println!("  preview:  {}", preview);
    println!("  download: {}", download);

    if let Some(path) = &args.output {
        let res = match reqwest::get(&download).await {
            Ok(res) => res.error_for_status()?,
            Err(e) => return Err(anyhow!(e.to_string())),
        };
        let bytes = res.bytes().await?;
        tokio::fs::write(path, &bytes)
            .await
            .context(format!("could not write PDF to {:?}", path))?;
        println!("  saved to: {:?}", path);
    }

    Ok(())
}

fn bail_with_failure(snapshot: &Snapshot, fallback: &str) -> anyhow::Error {
    match &snapshot.failure {
        Some(failure) => {
            if !failure.service_reachable {
                eprintln!(
                    "tip: make sure the conversion service is running at {}",
                    SERVICE_URL.as_str()
                );
            }
            anyhow!(failure.message.clone())
        }
        None => anyhow!(fallback.to_string()),
    }
}
