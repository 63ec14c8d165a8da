//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// certgate - mutual-TLS authentication gate
#[derive(Parser, Debug)]
#[command(name = "certgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERTGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CERTGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CERTGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTGATE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERTGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gate (default)
    Serve,

    /// Certificate tooling
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// TLS subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Create a self-signed CA
    InitCa {
        /// Common Name of the CA
        #[arg(long, default_value = "certgate Root CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,

        /// Output directory (writes ca.crt and ca.key)
        #[arg(short, long, default_value = "certs")]
        out: PathBuf,
    },

    /// Issue a server or client certificate signed by the CA
    Issue {
        /// Common Name
        #[arg(long, required = true)]
        cn: String,

        /// Organisational Unit
        #[arg(long)]
        ou: Option<String>,

        /// DNS Subject Alternative Name (repeatable)
        #[arg(long = "san-dns")]
        san_dns: Vec<String>,

        /// URI Subject Alternative Name, e.g. a SPIFFE ID (repeatable)
        #[arg(long = "san-uri")]
        san_uri: Vec<String>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// CA certificate (PEM)
        #[arg(long, default_value = "certs/ca.crt")]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long, default_value = "certs/ca.key")]
        ca_key: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "certs")]
        out: PathBuf,

        /// File stem for `<name>.crt` / `<name>.key` (defaults to the CN)
        #[arg(long)]
        name: Option<String>,
    },
}
