//! Tests for the add and run subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::Path;

#[test]
fn cli_parse_add_defaults() {
    match parse(&["subforge", "add", "talk.wav"]) {
        CliCommand::Add {
            file,
            language,
            model,
            options,
            name,
        } => {
            assert_eq!(file, Path::new("talk.wav"));
            assert_eq!(language, "auto");
            assert_eq!(model, "nova-2-general");
            assert!(options.is_none());
            assert!(name.is_none());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_with_options() {
    match parse(&[
        "subforge",
        "add",
        "/tmp/a.wav",
        "--language",
        "ja",
        "--model",
        "whisper-large",
        "--options",
        r#"{"vad":{"preset":"asmr"}}"#,
        "--name",
        "episode 1.wav",
    ]) {
        CliCommand::Add {
            language,
            model,
            options,
            name,
            ..
        } => {
            assert_eq!(language, "ja");
            assert_eq!(model, "whisper-large");
            assert_eq!(options.as_deref(), Some(r#"{"vad":{"preset":"asmr"}}"#));
            assert_eq!(name.as_deref(), Some("episode 1.wav"));
        }
        _ => panic!("expected Add with flags"),
    }
}

#[test]
fn cli_add_requires_file() {
    assert!(Cli::try_parse_from(["subforge", "add"]).is_err());
}

#[test]
fn cli_parse_run() {
    match parse(&["subforge", "run"]) {
        CliCommand::Run { jobs } => assert!(jobs.is_none()),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_jobs() {
    match parse(&["subforge", "run", "--jobs", "3"]) {
        CliCommand::Run { jobs } => assert_eq!(jobs, Some(3)),
        _ => panic!("expected Run with --jobs"),
    }
}
