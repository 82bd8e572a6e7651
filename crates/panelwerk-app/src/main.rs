// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Panelwerk — comic page restoration pipeline
//
// Entry point. Initialises logging, loads and validates configuration, then
// dispatches to the selected command.

mod cli;
mod services;

use std::process::ExitCode;

use clap::Parser;
use panelwerk_core::AppConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::ErrorKind;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use services::pipeline::{BatchRequest, Pipeline, RunReport, stored_objects};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Panelwerk starting");

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            eprintln!("error: {e}");
            match e.kind() {
                ErrorKind::Config | ErrorKind::Validation => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

/// Execute the command. `Ok(false)` means it ran but something failed.
async fn run(cli: Cli) -> Result<bool> {
    let mut config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Restore {
            input,
            mask,
            output,
            options,
        } => {
            options.apply(&mut config)?;
            let pipeline = Pipeline::init(config)?;
            let report = pipeline.restore(&input, mask.as_deref(), &output).await?;
            Ok(print_report(&report))
        }
        Command::Batch {
            input_dir,
            mask_dir,
            output,
            combine,
            concurrency,
            stop_on_error,
            options,
        } => {
            options.apply(&mut config)?;
            config.batch.combine |= combine;
            config.batch.stop_on_error |= stop_on_error;
            if let Some(limit) = concurrency {
                config.batch.concurrency_limit = limit;
            }
            let pipeline = Pipeline::init(config)?;
            let request = BatchRequest {
                input_dir,
                mask_dir,
                output_dir: output,
            };
            let report = pipeline.batch(&request).await?;
            Ok(print_report(&report))
        }
        Command::Stored { prefix } => {
            config.validate()?;
            let objects = stored_objects(&config, &prefix)?;
            for object in &objects {
                println!(
                    "{:>10}  {}  {}",
                    object.size,
                    object.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
                    object.key
                );
            }
            println!("{} object(s)", objects.len());
            Ok(true)
        }
    }
}

fn print_report(report: &RunReport) -> bool {
    for line in &report.outcomes {
        println!("{line}");
    }
    for path in &report.written {
        println!("wrote {}", path.display());
    }
    for url in &report.staged {
        println!("staged {url}");
    }
    for failure in &report.write_failures {
        println!("not written: {failure}");
    }
    if report.empty_document {
        println!("{}", PanelwerkError::EmptyDocument);
    }
    println!("{}", report.summary);
    report.succeeded()
}
