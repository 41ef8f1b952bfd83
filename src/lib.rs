//! lanbackup library
//!
//! Minimal LAN backup: a client pushes a file, or a directory archived into a
//! single blob, to a listening backup server over one TCP connection.

pub mod address;
pub mod archive;
pub mod cli;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod log;
pub mod logger;
pub mod prompt;
pub mod protocol;
pub mod protocol_core;
pub mod server;

pub use address::{validate, Address};
pub use archive::{ArchiveBuilder, ArchiveSummary, TarArchiveBuilder};
pub use client::BackupClient;
pub use endpoint::{ConnectionEndpoint, TransportFamily, TransportKind};
pub use error::BackupError;
pub use server::{BackupServer, ServerState};
