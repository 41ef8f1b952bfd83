use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use lanbackup::cli::{DaemonConfig, DaemonOpts, ServeSettings};
use lanbackup::log::TransferLog;
use lanbackup::logger::{Logger, NoopLogger, TextLogger};
use lanbackup::BackupServer;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Failed to set Ctrl-C handler")?;

    let opts = DaemonOpts::parse();
    let config = match opts.config.as_deref() {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    let settings = ServeSettings::resolve(&opts, &config)?;

    if !settings.output.is_dir() {
        anyhow::bail!(
            "Error: Output directory does not exist: {}",
            settings.output.display()
        );
    }
    let output = std::fs::canonicalize(&settings.output).with_context(|| {
        format!(
            "Failed to canonicalize output path: {}",
            settings.output.display()
        )
    })?;

    let logger: Arc<dyn Logger> = match settings.log_file.as_deref() {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(NoopLogger),
    };

    let mut server = BackupServer::bind(settings.bind, settings.port)
        .with_context(|| format!("bind {}:{}", settings.bind, settings.port))?
        .with_output_dir(&output)
        .with_read_timeout(settings.read_timeout)
        .with_logger(logger.clone());
    if let Some(path) = settings.journal.as_deref() {
        server = server.with_journal(TransferLog::new(path));
    }

    let endpoint = server.endpoint();
    if endpoint.port_substituted() {
        eprintln!(
            "⚠️  Port {} is in use; listening on {} instead",
            endpoint.requested_port(),
            endpoint.port()
        );
    }
    println!("Starting lanbackup daemon:");
    println!("  Output: {}", output.display());
    println!("  Listen: {}", endpoint);
    if settings.bind.ip().is_unspecified() {
        eprintln!("⚠️  WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   Transfers are UNENCRYPTED and UNAUTHENTICATED - only use on trusted networks");
    }

    server.listen(settings.backlog)?;

    loop {
        let peer = match server.accept_client() {
            Ok(peer) => peer,
            Err(e) => {
                eprintln!("accept error: {}", e);
                logger.error("accept", &e.to_string());
                continue;
            }
        };
        eprintln!("conn from {}", peer);
        match server.serve_session(settings.chunk_size) {
            Ok(names) => {
                for name in &names {
                    eprintln!("received {}", output.join(name).display());
                }
                eprintln!("session from {} closed ({} transfer(s))", peer, names.len());
            }
            Err(e) => {
                eprintln!(
                    "connection error during transfer (possible client disconnect): {}",
                    e
                );
            }
        }
        if settings.once {
            break;
        }
    }
    Ok(())
}
