//! `subforge status [id]` – one job's progress and new log lines, or all jobs.

use anyhow::{anyhow, Result};
use subforge_core::job_db::JobSummary;
use subforge_core::job_store::StatusView;
use subforge_core::studio::Studio;

pub fn run_status(studio: &Studio, id: Option<&str>, since: u64, json: bool) -> Result<()> {
    match id {
        Some(id) => {
            let view = studio.status(id, since).ok_or_else(|| anyhow!("job not found: {id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_job(&view);
            }
        }
        None => {
            let jobs = studio.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print_list(&jobs);
            }
        }
    }
    Ok(())
}

fn print_job(view: &StatusView) {
    println!("job {}: {} ({:.0}%)", view.job_id, view.status, view.progress);
    if view.cancel_requested && !view.status.is_terminal() {
        println!("cancel requested");
    }
    for line in &view.logs {
        println!("  [{}] {}", line.seq, line.message);
    }
    if let Some(err) = &view.error {
        println!("error {}: {}", err.code.as_str(), err.message);
    }
    if let Some(out) = &view.download {
        println!("subtitles: {} ({})", out.path.display(), out.download_name);
    }
    println!("next: --since {}", view.next_seq);
}

fn print_list(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    println!("{:<32} {:<10} {:>5} {}", "ID", "STATE", "PCT", "FILE");
    for j in jobs {
        println!(
            "{:<32} {:<10} {:>4.0}% {}",
            j.id,
            j.status.as_str(),
            j.progress,
            j.original_name
        );
    }
}
