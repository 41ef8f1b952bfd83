//! lanbackup client - back up a file or a directory to a lanbackupd server

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lanbackup::cli::ClientOpts;
use lanbackup::logger::{Logger, NoopLogger, TextLogger};
use lanbackup::prompt::{prompt_line, prompt_server_address, ARCHIVE_NAME_PROMPT, PATH_PROMPT};
use lanbackup::{Address, ArchiveBuilder, BackupClient, TarArchiveBuilder};

fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    let address = match opts.server.as_deref() {
        Some(s) if lanbackup::validate(s) => Address::parse(s)?,
        Some(s) => {
            eprintln!("Invalid IP address format: {}", s);
            prompt_server_address(io::stdin().lock(), io::stdout())?
        }
        None => prompt_server_address(io::stdin().lock(), io::stdout())?,
    };

    let source = match opts.path.clone() {
        Some(p) => p,
        None => PathBuf::from(prompt_line(io::stdin().lock(), io::stdout(), PATH_PROMPT)?),
    };
    if !source.exists() {
        anyhow::bail!("Error: Path does not exist: {}", source.display());
    }

    let upload = if source.is_dir() {
        let name = match opts.archive_name.clone() {
            Some(n) => n,
            None => PathBuf::from(prompt_line(
                io::stdin().lock(),
                io::stdout(),
                ARCHIVE_NAME_PROMPT,
            )?),
        };
        let summary = TarArchiveBuilder::default()
            .build(&source, &name)
            .with_context(|| format!("archive {}", source.display()))?;
        println!(
            "Archived {} ({} entries, {} bytes) -> {}",
            source.display(),
            summary.entries,
            summary.bytes,
            summary.path.display()
        );
        summary.path
    } else {
        source
    };

    let logger: Arc<dyn Logger> = match opts.log_file.as_deref() {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(NoopLogger),
    };

    let mut client = BackupClient::connect(
        address,
        opts.port,
        Duration::from_millis(opts.timeout_ms),
    )
    .with_context(|| format!("Failed to reach backup server {}:{}", address, opts.port))?
    .with_chunk_size(opts.chunk_size)
    .with_logger(logger);

    let upload_str = upload.to_string_lossy().into_owned();
    let sent = if opts.progress {
        let total = std::fs::metadata(&upload).map(|m| m.len()).unwrap_or(0);
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        let sent = client.send_with_progress(&upload_str, |n| pb.set_position(n));
        pb.finish_and_clear();
        sent?
    } else {
        client.send(&upload_str)?
    };
    client.close();

    println!(
        "Sent {} ({} bytes) to {}:{}",
        upload.display(),
        sent,
        address,
        opts.port
    );
    Ok(())
}
