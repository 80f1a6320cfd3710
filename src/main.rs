use anyhow::{bail, Context, Result};
use config_manager::SystemConfig;
use job_orchestrator::{JobOrchestrator, RunOutcome, StatusKind};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wrapped_analyzer=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        bail!("usage: wrapped_analyzer <address> [fid]");
    };
    let fid = args
        .next()
        .map(|raw| raw.parse::<u64>().with_context(|| format!("invalid fid '{}'", raw)))
        .transpose()?;

    let config = SystemConfig::load()?;
    info!("✅ Configuration loaded");

    let orchestrator = JobOrchestrator::new(config).await?;

    match orchestrator.run_analysis(&address, fid).await? {
        RunOutcome::Cached(_) => info!("📦 Analysis already cached"),
        RunOutcome::Started(job) => {
            info!("🚀 Started job {}", job.id);
            orchestrator.wait_for_terminal(&address).await?;
        }
        RunOutcome::AlreadyRunning(Some(job)) => {
            info!("⏳ Joining running job {}", job.id);
            orchestrator.wait_for_terminal(&address).await?;
        }
        RunOutcome::AlreadyRunning(None) => {
            warn!("Another process is analyzing {}; reporting its current status", address);
        }
    }

    let status = orchestrator.get_status(&address).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.status == StatusKind::Failed {
        bail!(
            "analysis failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
