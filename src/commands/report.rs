//! Implementation of the `report` and `regenerate-reports` subcommands.

use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use colored::Colorize as _;
use uuid::Uuid;

use crate::commands::build_pipeline;
use crate::commands::open_database;
use crate::config::Config;
use crate::execution::ReportState;

/// Arguments to the `report` subcommand.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// The ID of the analysis.
    #[arg(value_name = "ID")]
    pub id: Uuid,
}

/// Arguments to the `regenerate-reports` subcommand.
#[derive(Parser, Debug)]
pub struct RegenerateArgs {}

/// The main function for the `report` subcommand.
///
/// Prints the location of the report, generating it if the analysis has
/// completed without one.
pub async fn report(args: ReportArgs, config: Config) -> Result<()> {
    let db = open_database(&config).await?;
    let pipeline = build_pipeline(&config, db.clone())?;
    let state = pipeline.generate_report(args.id).await;
    db.close().await;

    match state? {
        ReportState::Existing(reference) => {
            println!("{reference}");
        }
        ReportState::Generated(reference) => {
            eprintln!("{} report for analysis `{}`", "generated".green().bold(), args.id);
            println!("{reference}");
        }
        ReportState::NotReady => {
            bail!(
                "analysis `{}` has not completed; no report is available",
                args.id
            );
        }
    }

    Ok(())
}

/// The main function for the `regenerate-reports` subcommand.
///
/// Re-renders the report of every completed analysis.
pub async fn regenerate(_: RegenerateArgs, config: Config) -> Result<()> {
    let db = open_database(&config).await?;
    let pipeline = build_pipeline(&config, db.clone())?;
    let summary = pipeline.regenerate_reports().await;
    db.close().await;

    let summary = summary?;
    println!(
        "{}: {}, {}: {}",
        "regenerated".green().bold(),
        summary.succeeded,
        "failed".red().bold(),
        summary.failed
    );

    if summary.failed > 0 {
        bail!("failed to regenerate {} report(s)", summary.failed);
    }

    Ok(())
}
