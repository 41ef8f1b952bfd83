use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Sink for connection and transfer events.
pub trait Logger: Send + Sync {
    fn bound(&self, _endpoint: &str, _requested: u16, _effective: u16) {}
    fn accepted(&self, _peer: &str) {}
    fn received(&self, _header: &str, _output: &Path, _bytes: u64) {}
    fn sent(&self, _header: &str, _bytes: u64) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn bound(&self, endpoint: &str, requested: u16, effective: u16) {
        if requested != 0 && requested != effective {
            self.line(&format!(
                "BIND endpoint={} requested={} effective={} (port in use, substituted)",
                endpoint, requested, effective
            ));
        } else {
            self.line(&format!("BIND endpoint={}", endpoint));
        }
    }
    fn accepted(&self, peer: &str) {
        self.line(&format!("ACCEPT peer={}", peer));
    }
    fn received(&self, header: &str, output: &Path, bytes: u64) {
        self.line(&format!(
            "RECV header={} output={} bytes={}",
            header,
            output.display(),
            bytes
        ));
    }
    fn sent(&self, header: &str, bytes: u64) {
        self.line(&format!("SEND header={header} bytes={bytes}"));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}
