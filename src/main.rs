//! certgate - mutual-TLS authentication gate

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use certgate::{
    build_site,
    cli::{Cli, Command, TlsCommand},
    config::Config,
    realm::IdentityRealm,
    server::{Server, shutdown_signal},
    setup_tracing,
    tls::{CertificateAuthority, Subject, TlsContextBuilder},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Tls(tls_cmd)) => run_tls_command(tls_cmd),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run certificate tooling commands
fn run_tls_command(cmd: TlsCommand) -> ExitCode {
    match cmd {
        TlsCommand::InitCa { cn, days, out } => {
            let created =
                CertificateAuthority::generate(&cn, days).and_then(|ca| ca.pem().save(&out, "ca"));
            match created {
                Ok(()) => {
                    println!("CA written to {}/ca.crt and ca.key", out.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to create CA: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        TlsCommand::Issue {
            cn,
            ou,
            san_dns,
            san_uri,
            days,
            ca_cert,
            ca_key,
            out,
            name,
        } => {
            let stem = name.unwrap_or_else(|| cn.clone());
            let subject = Subject {
                common_name: cn,
                organizational_unit: ou,
                dns_names: san_dns,
                uris: san_uri,
                validity_days: days,
            };
            let issued = CertificateAuthority::load(&ca_cert, &ca_key)
                .and_then(|ca| ca.issue(&subject))
                .and_then(|leaf| leaf.save(&out, &stem));
            match issued {
                Ok(()) => {
                    println!(
                        "Certificate written to {}/{stem}.crt and {stem}.key",
                        out.display()
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to issue certificate: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Run the gate
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        tls = config.tls.enabled,
        client_verification = ?config.tls.client_verification,
        rules = config.portal.rules.len(),
        "Starting certgate"
    );

    let mut server = Server::new(build_site(&config, Arc::new(IdentityRealm)))
        .shutdown_timeout(config.server.shutdown_timeout)
        .handshake_timeout(config.server.handshake_timeout);

    if config.tls.enabled {
        match TlsContextBuilder::from_config(&config.tls).get_context() {
            Ok(context) => server = server.with_tls(context),
            Err(e) => {
                error!("Failed to build TLS context: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    if let Err(e) = server.run(listener, shutdown).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("certgate shutdown complete");
    ExitCode::SUCCESS
}
