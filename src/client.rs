//! Backup client: one outbound connection that sends a header, the payload and
//! an end-of-transfer sentinel.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::endpoint::ConnectionEndpoint;
use crate::error::{BackupError, Result};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::{frame, DEFAULT_CHUNK_SIZE, MAX_FRAME_SIZE};
use crate::protocol_core::{transfer_header, write_frame};

pub struct BackupClient {
    endpoint: Option<ConnectionEndpoint>,
    chunk_size: usize,
    logger: Arc<dyn Logger>,
}

impl BackupClient {
    /// Connects to the server; on failure no client exists.
    pub fn connect(address: Address, port: u16, timeout: Duration) -> Result<Self> {
        let endpoint = ConnectionEndpoint::connect(address, port, timeout)?;
        Ok(Self {
            endpoint: Some(endpoint),
            chunk_size: DEFAULT_CHUNK_SIZE,
            logger: Arc::new(NoopLogger),
        })
    }

    /// Payload bytes per data frame, clamped to `1..=MAX_FRAME_SIZE`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_FRAME_SIZE);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn endpoint(&self) -> Option<&ConnectionEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Sends `path` as one transfer and returns the payload bytes sent.
    pub fn send(&mut self, path: &str) -> Result<u64> {
        self.send_with_progress(path, |_| {})
    }

    /// Like [`send`](Self::send), calling `progress` with the running byte count
    /// after every chunk.
    pub fn send_with_progress<F: FnMut(u64)>(&mut self, path: &str, mut progress: F) -> Result<u64> {
        let endpoint = self.endpoint.as_ref().ok_or(BackupError::NoActiveSession)?;
        let header = transfer_header(path);
        // nothing goes on the wire unless the source is a readable regular file
        let mut source = open_source(Path::new(path))?;
        let mut stream = endpoint.socket();
        let result = write_transfer(
            &mut stream,
            &mut source,
            &header,
            self.chunk_size,
            &mut progress,
        );

        match &result {
            Ok(bytes) => self.logger.sent(&header, *bytes),
            Err(e) => {
                self.logger.error("send", &e.to_string());
                // the stream may hold a partial frame
                self.close();
            }
        }
        result
    }

    /// Releases the socket; later sends fail with `NoActiveSession`.
    pub fn close(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            let _ = endpoint.socket().shutdown(std::net::Shutdown::Both);
        }
    }
}

fn open_source(path: &Path) -> Result<File> {
    let source = File::open(path)?;
    if !source.metadata()?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a regular file: {}", path.display()),
        )
        .into());
    }
    Ok(source)
}

fn write_transfer<W: Write, R: Read>(
    stream: &mut W,
    source: &mut R,
    header: &str,
    chunk_size: usize,
    progress: &mut impl FnMut(u64),
) -> Result<u64> {
    write_frame(stream, frame::HEADER, header.as_bytes())?;
    let mut buf = vec![0u8; chunk_size];
    let mut sent = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        write_frame(stream, frame::DATA, &buf[..n])?;
        sent += n as u64;
        progress(sent);
    }
    // end-of-transfer sentinel
    write_frame(stream, frame::DATA, &[])?;
    stream.flush()?;
    Ok(sent)
}
