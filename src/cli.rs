//! Command-line options for `lanbackup` and `lanbackupd`, plus the daemon's
//! optional TOML config file.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::Address;
use crate::protocol::{timeouts, DEFAULT_CHUNK_SIZE, DEFAULT_PORT};

/// Backup server daemon options
#[derive(Clone, Debug, Default, Parser)]
#[command(author, version, about = "lanbackupd - receive backups over the LAN")]
pub struct DaemonOpts {
    /// IPv4 address to bind (default 0.0.0.0)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on; a busy port is replaced by a random free one (default 8675)
    #[arg(long)]
    pub port: Option<u16>,

    /// Listen queue length (default: platform maximum)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Receive chunk size in bytes (default 65536)
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// Directory received files are written to (default .)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Drop a session after this many idle seconds (0 = never)
    #[arg(long = "read-timeout-secs")]
    pub read_timeout_secs: Option<u64>,

    /// Append event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append a JSONL record per transfer to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// TOML file supplying defaults for the options above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serve a single client session, then exit
    #[arg(long)]
    pub once: bool,
}

/// Daemon settings read from `--config`; every key is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub backlog: Option<i32>,
    pub chunk_size: Option<usize>,
    pub output: Option<PathBuf>,
    pub read_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub journal: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }
}

/// Fully resolved daemon settings: flags, then config file, then defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServeSettings {
    pub bind: Address,
    pub port: u16,
    pub backlog: Option<i32>,
    pub chunk_size: usize,
    pub output: PathBuf,
    pub read_timeout: Option<Duration>,
    pub log_file: Option<PathBuf>,
    pub journal: Option<PathBuf>,
    pub once: bool,
}

impl ServeSettings {
    pub fn resolve(opts: &DaemonOpts, config: &DaemonConfig) -> Result<Self> {
        let bind = match opts.bind.as_deref().or(config.bind.as_deref()) {
            Some(s) => Address::parse(s).with_context(|| "invalid --bind address")?,
            None => Address::unspecified(),
        };
        let read_timeout_secs = opts
            .read_timeout_secs
            .or(config.read_timeout_secs)
            .unwrap_or(timeouts::READ_IDLE_SECS);
        Ok(Self {
            bind,
            port: opts.port.or(config.port).unwrap_or(DEFAULT_PORT),
            backlog: opts.backlog.or(config.backlog),
            chunk_size: opts
                .chunk_size
                .or(config.chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            output: opts
                .output
                .clone()
                .or_else(|| config.output.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            read_timeout: (read_timeout_secs > 0).then(|| Duration::from_secs(read_timeout_secs)),
            log_file: opts.log_file.clone().or_else(|| config.log_file.clone()),
            journal: opts.journal.clone().or_else(|| config.journal.clone()),
            once: opts.once,
        })
    }
}

/// Backup client options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "lanbackup - send a file or directory to a backup server")]
pub struct ClientOpts {
    /// File or directory to back up (prompted for when omitted)
    pub path: Option<PathBuf>,

    /// Backup server IPv4 address (prompted for when omitted)
    #[arg(long)]
    pub server: Option<String>,

    /// Backup server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connect timeout in milliseconds
    #[arg(long = "timeout-ms", default_value_t = timeouts::CONNECT_MS)]
    pub timeout_ms: u64,

    /// Payload chunk size in bytes
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Archive file name when backing up a directory (prompted for when omitted)
    #[arg(long = "archive-name")]
    pub archive_name: Option<PathBuf>,

    /// Show a progress bar while sending
    #[arg(short, long)]
    pub progress: bool,

    /// Append event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}
