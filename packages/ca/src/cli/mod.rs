//! Command-line interface

pub mod ca_ops;
pub mod commands;

pub use commands::{Cli, Commands};

use crate::config::CaConfig;

/// Load configuration and dispatch the parsed command
pub async fn process_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => CaConfig::from_file(path)?,
        None => CaConfig::default(),
    };

    match cli.command {
        Commands::Init { out_dir } => ca_ops::handle_init(config, &out_dir, cli.json).await,
        Commands::Issue {
            ca_dir,
            name,
            serial,
            out_dir,
        } => ca_ops::handle_issue(config, &ca_dir, &name, serial, &out_dir, cli.json).await,
        Commands::Crl {
            ca_dir,
            serials,
            out,
        } => ca_ops::handle_crl(config, &ca_dir, &serials, &out, cli.json).await,
    }
}
