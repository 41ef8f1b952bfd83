//! Library error type for endpoints, sessions and the transfer protocol.

use std::io;

/// Errors raised by endpoints, the backup server and the backup client.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("invalid IPv4 address: {input:?}")]
    InvalidAddress { input: String },

    #[error("unsupported transport: family={family} kind={kind}")]
    InvalidTransportKind { family: String, kind: String },

    #[error("no active data session")]
    NoActiveSession,

    #[error("server is not listening")]
    NotListening,

    #[error("connect({addr}) failed: {source}")]
    ConnectFailure {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("refusing unsafe transfer header {header:?}")]
    UnsafeHeader { header: String },

    #[error("bad frame: {reason}")]
    BadFrame { reason: String },

    #[error("frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("peer closed the connection mid-transfer after {bytes} bytes")]
    TruncatedTransfer { bytes: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackupError {
    pub(crate) fn bad_frame(reason: impl Into<String>) -> Self {
        BackupError::BadFrame {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
