//! The BiasScope command line tool.

use std::io::IsTerminal;
use std::io::stderr;
use std::path::PathBuf;

use biasscope::commands;
use biasscope::config::Config;
use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use git_testament::git_testament;
use git_testament::render_testament;
use tracing_log::AsTrace;

git_testament!(TESTAMENT);

#[derive(Subcommand)]
enum Commands {
    /// Runs the HTTP server that schedules and executes analyses.
    Server(commands::server::Args),

    /// Prints the location of an analysis report, generating it if needed.
    Report(commands::report::ReportArgs),

    /// Re-renders the report of every completed analysis.
    RegenerateReports(commands::report::RegenerateArgs),

    /// Prints the status of an analysis.
    Status(commands::status::Args),

    /// Displays or initializes configuration.
    Config(commands::config::Args),
}

#[derive(Parser)]
#[command(author, version = render_testament!(TESTAMENT), propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity,
}

pub async fn inner() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(cli.verbose.log_level_filter().as_trace())
        .with_writer(std::io::stderr)
        .with_ansi(stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Server(args) => commands::server::server(args, config).await,
        Commands::Report(args) => commands::report::report(args, config).await,
        Commands::RegenerateReports(args) => commands::report::regenerate(args, config).await,
        Commands::Status(args) => commands::status::status(args, config).await,
        Commands::Config(args) => commands::config::config(args, config),
    }
}

#[tokio::main]
pub async fn main() {
    if let Err(e) = inner().await {
        eprintln!(
            "{error}: {e:?}",
            error = if std::io::stderr().is_terminal() {
                "error".red().bold()
            } else {
                "error".normal()
            }
        );
        std::process::exit(1);
    }
}
