//! Implementation of the `status` subcommand.

use std::fmt::Write as _;

use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use colored::Colorize as _;
use uuid::Uuid;

use crate::commands::open_database;
use crate::config::Config;
use crate::database::Analysis;
use crate::database::AnalysisStatus;
use crate::database::Database as _;

/// Arguments to the `status` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The ID of the analysis.
    #[arg(value_name = "ID")]
    pub id: Uuid,

    /// Print the full analysis as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Formats a human readable summary of an analysis.
fn describe(analysis: &Analysis) -> String {
    let status = match analysis.status {
        AnalysisStatus::Completed => analysis.status.to_string().green().bold(),
        AnalysisStatus::Failed => analysis.status.to_string().red().bold(),
        _ => analysis.status.to_string().yellow().bold(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "analysis:  {}", analysis.id);
    let _ = writeln!(out, "endpoint:  {}", analysis.target_endpoint);
    let _ = writeln!(out, "status:    {status}");
    let _ = writeln!(out, "progress:  {}%", analysis.progress);
    let _ = writeln!(
        out,
        "records:   {} input(s), {} output(s)",
        analysis.inputs.len(),
        analysis.outputs.len()
    );
    let _ = writeln!(
        out,
        "results:   {}",
        if analysis.bias_summary.is_some() {
            "present"
        } else {
            "absent"
        }
    );

    if let Some(summary) = &analysis.bias_summary {
        let _ = writeln!(out, "score:     {:.3}", summary.overall_bias_score);
    }

    if let Some(reference) = &analysis.report_reference {
        let _ = writeln!(out, "report:    {reference}");
    }

    if let Some(message) = &analysis.error_message {
        let _ = writeln!(out, "error:     {message}");
    }

    out
}

/// The main function for the `status` subcommand.
pub async fn status(args: Args, config: Config) -> Result<()> {
    let db = open_database(&config).await?;
    let analysis = db.get_analysis(args.id).await;
    db.close().await;

    let analysis = analysis?
        .ok_or_else(|| anyhow!("analysis `{}` was not found", args.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print!("{}", describe(&analysis));
    }

    Ok(())
}
