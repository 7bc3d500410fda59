//! `subforge cancel <id>` – cancel a queued job or ask a running one to stop.

use anyhow::Result;
use subforge_core::job_store::CancelOutcome;
use subforge_core::studio::Studio;

pub async fn run_cancel(studio: &Studio, id: &str) -> Result<()> {
    match studio.cancel(id).await? {
        CancelOutcome::Cancelled => println!("Cancelled job {id}"),
        CancelOutcome::Requested => {
            println!("Cancel requested for job {id}; it stops after its in-flight segments")
        }
        CancelOutcome::AlreadyTerminal(status) => println!("Job {id} already {status}"),
    }
    Ok(())
}
