//! `contract-checkr` — check that the services of a repository agree with
//! their contract manifest and with each other.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]); without `--manifest` there is nothing to check.
//! 2. Load the run config ([`config::load_config`]).
//! 3. Load and validate the manifest ([`manifest`]); failure exits `2`.
//! 4. Discover source files ([`detector`]) and extract boundary observations
//!    per file on the blocking pool ([`extractor`]).
//! 5. Bind observations to contract endpoints ([`binder`]).
//! 6. Compare each contract ([`comparator`]) and run the cross-cutting checks
//!    ([`conventions`]).
//! 7. Map findings to rule violations ([`emitter`]) and render the report ([`report`]).
//! 8. Exit `0` (clean) or `1` (at least one violation).

mod binder;
mod cli;
mod comparator;
mod config;
mod conventions;
mod detector;
mod emitter;
mod engine;
mod error;
mod extractor;
mod manifest;
mod models;
mod report;

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, ReportFormat};
use config::load_config;
use engine::RunOptions;
use error::ManifestError;
use models::Language;

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // No manifest: the engine is disabled, which is not an error.
    let Some(manifest) = cli.manifest.clone() else {
        return Ok(());
    };

    // Resolve project path
    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let config = load_config(&path, cli.config.as_deref())?;

    let options = RunOptions {
        root: path.clone(),
        manifest,
        rule: cli.rule,
        exclude_languages: cli.exclude_lang.iter().map(Language::from).collect(),
        jobs: cli.jobs,
        verbose: cli.verbose,
        progress: cli.verbose && std::io::stderr().is_terminal(),
    };

    if cli.verbose {
        eprintln!(
            "\n {} v{}",
            "contract-checkr".bold(),
            env!("CARGO_PKG_VERSION")
        );
        eprintln!(" Scanning: {}\n", path.display());
    }

    let report = match engine::run(&options, &config).await {
        Ok(report) => report,
        Err(err) => {
            if let Some(manifest_err) = err.chain().find_map(|e| e.downcast_ref::<ManifestError>()) {
                eprintln!("{} {}", "error:".red().bold(), manifest_err);
                std::process::exit(2);
            }
            return Err(err);
        }
    };

    match cli.report {
        ReportFormat::Terminal => report::terminal::render(&report, cli.verbose),
        ReportFormat::Json => report::json::render(&report)?,
    }

    // Exit code: 1 if any violation was reported
    if report.has_violations() {
        std::process::exit(1);
    }

    Ok(())
}
