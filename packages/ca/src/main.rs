//! Main entry point for the ephca CLI

use clap::Parser;
use ephca::cli::{process_command, Cli};
use ephca_common::LoggingTransformer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    LoggingTransformer::init();

    process_command(Cli::parse()).await
}
