//! Implementation of the `config` subcommand.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;

use crate::config::Config;

/// Arguments for the `config` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// The action to perform.
    #[command(subcommand)]
    command: ConfigSubcommand,
}

/// Subcommands for the `config` command.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Prints a configuration file containing the default values.
    Init,

    /// Prints the configuration in effect after applying the configuration
    /// file and environment.
    Resolve,
}

/// Runs the `config` command.
pub fn config(args: Args, config: Config) -> Result<()> {
    let config = match args.command {
        ConfigSubcommand::Init => Config::default(),
        ConfigSubcommand::Resolve => config,
    };

    let text = toml::to_string_pretty(&config).context("failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}
