//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parsed command line
#[derive(Parser)]
#[command(name = "ephca")]
#[command(about = "Local certificate authority backed by an ephemeral signing service")]
pub struct Cli {
    /// Path to the TOML configuration file (defaults apply when omitted)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CA operations exposed on the command line
#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Create a new CA
    ///
    /// Writes `cacert.crt`, `ca-key.pem` (owner-only) and `ca-public.der`
    /// into the output directory.
    Init {
        /// Directory receiving the CA material
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Issue a leaf certificate signed by an existing CA
    ///
    /// Writes `<name>-cert.crt` and `<name>-private.pem` (owner-only).
    Issue {
        /// Directory holding `cacert.crt` and `ca-key.pem`
        #[arg(long)]
        ca_dir: PathBuf,
        /// Subject common name, also used as the only SAN
        #[arg(long)]
        name: String,
        /// Requested serial number
        #[arg(long, default_value_t = 1)]
        serial: u64,
        /// Directory receiving the certificate and key
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Generate a DER-encoded CRL revoking the given serials
    Crl {
        /// Directory holding `cacert.crt` and `ca-key.pem`
        #[arg(long)]
        ca_dir: PathBuf,
        /// Serial to revoke; repeat for several
        #[arg(long = "serial", required = true)]
        serials: Vec<u64>,
        /// Output file for the CRL
        #[arg(long)]
        out: PathBuf,
    },
}
