//! Backup server: listens, accepts one data session at a time and writes each
//! received transfer to a file under its output directory.
//!
//! Lifecycle: `Idle -> Listening -> AwaitingClient -> Receiving`, and `end()`
//! drops the session so the same server can accept the next client.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use socket2::Socket;

use crate::address::Address;
use crate::endpoint::{ConnectionEndpoint, TransportFamily, TransportKind};
use crate::error::{BackupError, Result};
use crate::log::{TransferLog, TransferRecord};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::{frame, MAX_FRAME_SIZE, MAX_HEADER_LEN};
use crate::protocol_core::{output_name_for_header, output_path, read_frame_header, read_payload};

/// Listen queue length used when `listen` is given no backlog.
#[cfg(unix)]
pub const DEFAULT_BACKLOG: i32 = libc::SOMAXCONN;
#[cfg(not(unix))]
pub const DEFAULT_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound, not listening yet.
    Idle,
    /// Listening with no data session.
    Listening,
    /// Blocked in accept.
    AwaitingClient,
    /// A data session is recorded.
    Receiving,
}

struct Session {
    socket: Socket,
    peer: String,
}

#[derive(Default)]
struct ReceiveProgress {
    header: Option<String>,
    output: Option<PathBuf>,
    bytes: u64,
}

pub struct BackupServer {
    endpoint: ConnectionEndpoint,
    state: ServerState,
    session: Option<Session>,
    output_dir: PathBuf,
    read_timeout: Option<Duration>,
    logger: Arc<dyn Logger>,
    journal: Option<TransferLog>,
}

impl BackupServer {
    /// Binds the server endpoint; a busy port is replaced by a fallback port
    /// (see [`ConnectionEndpoint::port_substituted`]).
    pub fn bind(address: Address, port: u16) -> Result<Self> {
        Ok(Self {
            endpoint: ConnectionEndpoint::open(address, port)?,
            state: ServerState::Idle,
            session: None,
            output_dir: PathBuf::from("."),
            read_timeout: None,
            logger: Arc::new(NoopLogger),
            journal: None,
        })
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Read timeout applied to every accepted session.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_journal(mut self, journal: TransferLog) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Starts listening. `None` uses the platform default queue length.
    pub fn listen(&mut self, backlog: Option<i32>) -> Result<()> {
        self.endpoint
            .socket()
            .listen(backlog.unwrap_or(DEFAULT_BACKLOG))?;
        self.state = ServerState::Listening;
        self.logger.bound(
            &self.endpoint.to_string(),
            self.endpoint.requested_port(),
            self.endpoint.port(),
        );
        Ok(())
    }

    /// Blocks until a client connects and records it as the data session,
    /// replacing any session that was not ended. Returns the peer address.
    pub fn accept_client(&mut self) -> Result<String> {
        if self.state == ServerState::Idle {
            return Err(BackupError::NotListening);
        }
        let resume = self.state;
        self.state = ServerState::AwaitingClient;
        let accepted = self.endpoint.socket().accept().and_then(|(socket, addr)| {
            socket.set_read_timeout(self.read_timeout)?;
            Ok((socket, addr))
        });
        let (socket, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                self.state = resume;
                return Err(e.into());
            }
        };
        let peer = addr
            .as_socket()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.logger.accepted(&peer);
        self.session = Some(Session {
            socket,
            peer: peer.clone(),
        });
        self.state = ServerState::Receiving;
        Ok(peer)
    }

    /// Receives one transfer from the active session.
    ///
    /// Returns the output file name, or `None` when the client closed (or sent
    /// an empty header) before naming a transfer; no file is created then.
    pub fn receive(&mut self, chunk_size: usize) -> Result<Option<String>> {
        let session = self.session.as_ref().ok_or(BackupError::NoActiveSession)?;
        let mut progress = ReceiveProgress::default();
        let mut reader = &session.socket;
        let outcome = receive_transfer(&mut reader, &self.output_dir, chunk_size, &mut progress);

        let record = match &outcome {
            Ok(Some(_)) => {
                let header = progress.header.as_deref().unwrap_or_default();
                let output = progress.output.as_deref().unwrap_or(Path::new(""));
                self.logger.received(header, output, progress.bytes);
                Some(TransferRecord::completed(&session.peer, header, output, progress.bytes))
            }
            Ok(None) => None,
            Err(e) => {
                self.logger.error("receive", &e.to_string());
                Some(TransferRecord::failed(
                    &session.peer,
                    progress.header.as_deref(),
                    progress.output.as_deref(),
                    progress.bytes,
                    &e.to_string(),
                ))
            }
        };
        if let (Some(journal), Some(record)) = (&self.journal, record) {
            if let Err(e) = journal.add_entry(&record) {
                self.logger.error("journal", &format!("{e:#}"));
            }
        }
        outcome
    }

    /// Receives transfers until the client disconnects, then ends the session.
    pub fn serve_session(&mut self, chunk_size: usize) -> Result<Vec<String>> {
        let mut received = Vec::new();
        let result = loop {
            match self.receive(chunk_size) {
                Ok(Some(name)) => received.push(name),
                Ok(None) => break Ok(received),
                Err(e) => break Err(e),
            }
        };
        self.end();
        result
    }

    /// Closes the active session so `accept_client` can be called again.
    pub fn end(&mut self) {
        self.session = None;
        if self.state != ServerState::Idle {
            self.state = ServerState::Listening;
        }
    }

    /// Reopens the endpoint with another transport; the server must `listen` again.
    pub fn change_transport(&mut self, family: TransportFamily, kind: TransportKind) -> Result<()> {
        self.endpoint.change_transport(family, kind)?;
        self.session = None;
        self.state = ServerState::Idle;
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn peer(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.peer.as_str())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

fn receive_transfer<R: Read>(
    stream: &mut R,
    output_dir: &Path,
    chunk_size: usize,
    progress: &mut ReceiveProgress,
) -> Result<Option<String>> {
    let Some((typ, len)) = read_frame_header(stream)? else {
        return Ok(None);
    };
    if typ != frame::HEADER {
        return Err(BackupError::bad_frame(format!(
            "expected transfer header, got frame type {typ}"
        )));
    }
    if len > MAX_HEADER_LEN {
        return Err(BackupError::bad_frame(format!(
            "transfer header too long: {len} bytes"
        )));
    }
    let raw = read_payload(stream, len)?;
    let header = String::from_utf8(raw)
        .map_err(|_| BackupError::bad_frame("transfer header is not UTF-8"))?;
    let header = header.trim_end_matches(['\r', '\n']).to_string();
    if header.is_empty() {
        return Ok(None);
    }
    progress.header = Some(header.clone());

    let name = output_name_for_header(&header, Local::now().date_naive())?;
    let path = output_path(output_dir, &name)?;
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    progress.output = Some(path);

    append_payload(stream, &mut file, chunk_size, progress)?;
    Ok(Some(name))
}

fn append_payload<R: Read>(
    stream: &mut R,
    file: &mut File,
    chunk_size: usize,
    progress: &mut ReceiveProgress,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size.clamp(1, MAX_FRAME_SIZE)];
    loop {
        let (typ, len) = match read_frame_header(stream) {
            Ok(Some(hdr)) => hdr,
            Ok(None) => {
                return Err(BackupError::TruncatedTransfer {
                    bytes: progress.bytes,
                })
            }
            Err(BackupError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(BackupError::TruncatedTransfer {
                    bytes: progress.bytes,
                })
            }
            Err(e) => return Err(e),
        };
        if typ != frame::DATA {
            return Err(BackupError::bad_frame(format!(
                "expected payload data, got frame type {typ}"
            )));
        }
        if len == 0 {
            file.flush()?;
            return Ok(());
        }
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(buf.len());
            let n = match stream.read(&mut buf[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(BackupError::TruncatedTransfer {
                    bytes: progress.bytes,
                });
            }
            file.write_all(&buf[..n])?;
            remaining -= n;
            progress.bytes += n as u64;
        }
    }
}
