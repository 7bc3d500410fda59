//! `subforge run` – recover leftovers, then work the queue until it is empty.

use anyhow::Result;
use subforge_core::studio::Studio;
use tokio_util::sync::CancellationToken;

pub async fn run_workers(studio: &Studio, jobs: Option<usize>) -> Result<()> {
    let report = studio.recover().await?;
    if report.requeued > 0 || report.cancelled > 0 {
        println!(
            "Recovered {} interrupted job(s), finished {} cancelled job(s)",
            report.requeued, report.cancelled
        );
    }
    if report.leased > 0 {
        println!(
            "Skipping {} job(s) still running in another subforge process",
            report.leased
        );
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted: finishing running jobs, not starting new ones.");
                shutdown.cancel();
            }
        });
    }

    let run_count = studio.drain_queue(jobs, shutdown).await?;
    if run_count == 0 {
        println!("No queued jobs.");
    } else {
        println!("Ran {run_count} job(s).");
        tracing::info!("run completed {} job(s)", run_count);
    }
    Ok(())
}
