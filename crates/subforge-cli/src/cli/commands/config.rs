//! `subforge config` – what `add` accepts, as JSON.

use anyhow::Result;
use subforge_core::studio::Studio;

pub fn run_config(studio: &Studio) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&studio.config())?);
    Ok(())
}
