//! pcap_timeline - ingest capture files and report job outcomes
//!
//! Usage:
//!   pcap_timeline <capture>... [--summary <ip>]
//!
//! Environment variables:
//!   PCAP_TIMELINE_DB_PATH - SQLite database path (default: pcap_timeline.db)
//!   MAX_CONCURRENT_JOBS - Files ingested at once (default: 2)
//!   DECODER_BUFFER_BYTES - Initial pcap reader buffer, grows for larger records (default: 65536)
//!   PROGRESS_LOG_EVERY - Throughput log interval in frames (default: 10000)
//!   JOB_HISTORY_LIMIT - Finished jobs kept in memory (default: 32)

use dotenv::dotenv;
use log::{error, info, warn};
use pcap_timeline::api::TimelineService;
use pcap_timeline::pipeline::{EventStore, JobState, PipelineConfig, SqliteEventStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Command-line arguments
struct RunArgs {
    captures: Vec<PathBuf>,
    summary_ip: Option<String>,
}

impl RunArgs {
    fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let mut captures = Vec::new();
        let mut summary_ip = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "--summary" {
                let ip = args.next().ok_or("--summary needs an address")?;
                summary_ip = Some(ip);
            } else {
                captures.push(PathBuf::from(arg));
            }
        }

        if captures.is_empty() {
            return Err("No capture files given. Usage: pcap_timeline <capture>... [--summary <ip>]".into());
        }

        Ok(Self { captures, summary_ip })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = RunArgs::from_args()?;
    let config = PipelineConfig::try_from_env()?;

    info!("🚀 pcap_timeline starting");
    info!("   ├─ Database: {}", config.db_path.display());
    info!("   ├─ Captures: {}", args.captures.len());
    info!("   └─ Max concurrent jobs: {}", config.max_concurrent_jobs);

    // Startup-fatal: no point decoding anything without a reachable store
    let store = SqliteEventStore::open(&config.db_path)?;
    store.ensure_schema()?;

    let service = TimelineService::new(Arc::new(store), &config);
    let handles: Vec<_> = args
        .captures
        .iter()
        .map(|path| service.ingest_path(path))
        .collect();

    let mut ticker = interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let jobs = service.jobs();
                for job in jobs.iter().filter(|job| !job.state.is_finished()) {
                    info!("📊 Job {} ({}): {:.1}%", job.id, job.file_name, job.progress);
                }
                if jobs.iter().all(|job| job.state.is_finished()) {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("⚠️  Received CTRL+C, abandoning running jobs"),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                return Ok(());
            }
        }
    }

    let mut snapshots = Vec::with_capacity(handles.len());
    for handle in handles {
        snapshots.push(handle.wait().await?);
    }
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    if let Some(ip) = args.summary_ip.as_deref() {
        let points = service.timeline(Some(ip), None, None).await?;
        println!("{}", serde_json::to_string_pretty(&points)?);
    }

    let failed = snapshots
        .iter()
        .filter(|snapshot| snapshot.state == JobState::Failed)
        .count();
    if failed > 0 {
        return Err(format!("{} of {} jobs failed", failed, snapshots.len()).into());
    }

    info!("✅ All {} jobs succeeded", snapshots.len());
    Ok(())
}
