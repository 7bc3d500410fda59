//! `subforge add <file>` – submit a transcription job.

use anyhow::Result;
use std::path::PathBuf;
use subforge_core::options::RecognitionOptions;
use subforge_core::studio::{Studio, SubmitRequest};

#[derive(Debug)]
pub struct AddArgs {
    pub file: PathBuf,
    pub language: String,
    pub model: String,
    pub options: Option<String>,
    pub name: Option<String>,
}

pub async fn run_add(studio: &Studio, args: AddArgs) -> Result<()> {
    let options = match args.options.as_deref() {
        Some(json) => RecognitionOptions::from_json(json)?,
        None => RecognitionOptions::default(),
    };
    let display = args.file.display().to_string();
    let id = studio
        .submit(SubmitRequest {
            file: args.file,
            original_name: args.name,
            language: args.language,
            model: args.model,
            options,
        })
        .await?;
    println!("Added job {id} for {display}");
    Ok(())
}
