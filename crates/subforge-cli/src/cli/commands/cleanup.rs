//! `subforge cleanup` – one retention sweep.

use anyhow::Result;
use subforge_core::studio::Studio;

pub async fn run_cleanup(studio: &Studio) -> Result<()> {
    let removed = studio.cleanup_once().await?;
    println!("Removed {removed} expired job(s)");
    Ok(())
}
