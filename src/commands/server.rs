//! Implementation of the `server` subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::commands::build_pipeline;
use crate::commands::open_database;
use crate::config::Config;
use crate::execution::spawn_manager;

/// Arguments to the `server` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// Host to bind to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to.
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to the SQLite database.
    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Directory reports are written to.
    #[arg(long, value_name = "DIR")]
    pub reports_directory: Option<PathBuf>,

    /// Maximum number of concurrently executing analyses.
    #[arg(long)]
    pub max_concurrent_analyses: Option<usize>,

    /// Allowed CORS origins.
    #[arg(long)]
    pub allowed_origins: Vec<String>,
}

impl Args {
    /// Applies the arguments to the configuration.
    pub fn apply(mut self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.server.host = host;
        }

        if let Some(port) = self.port {
            config.server.port = port;
        }

        if let Some(database) = self.database {
            config.database.path = database;
        }

        if let Some(directory) = self.reports_directory {
            config.report.directory = directory;
        }

        if let Some(max) = self.max_concurrent_analyses {
            config.analysis.max_concurrent_analyses = Some(max);
        }

        config
            .server
            .allowed_origins
            .append(&mut self.allowed_origins);

        config
    }
}

/// The main function for the `server` subcommand.
pub async fn server(args: Args, config: Config) -> Result<()> {
    let config = args.apply(config);
    config.validate()?;

    let db = open_database(&config).await?;
    let pipeline = Arc::new(build_pipeline(&config, db.clone())?);
    let manager = spawn_manager(pipeline, config.analysis.max_concurrent_analyses);

    let result = crate::server::run(config.server, manager).await;
    db.close().await;
    result
}
