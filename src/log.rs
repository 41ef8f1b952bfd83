use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferRecord {
    pub timestamp: String,
    pub peer: String,
    pub header: Option<String>,
    pub output: Option<PathBuf>,
    pub bytes: u64,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn completed(peer: &str, header: &str, output: &Path, bytes: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            peer: peer.to_string(),
            header: Some(header.to_string()),
            output: Some(output.to_path_buf()),
            bytes,
            status: TransferStatus::Completed,
            error: None,
        }
    }

    pub fn failed(peer: &str, header: Option<&str>, output: Option<&Path>, bytes: u64, error: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            peer: peer.to_string(),
            header: header.map(str::to_string),
            output: output.map(Path::to_path_buf),
            bytes,
            status: TransferStatus::Failed,
            error: Some(error.to_string()),
        }
    }
}

/// Append-only JSONL journal of received transfers.
#[derive(Debug, Clone)]
pub struct TransferLog {
    log_file_path: PathBuf,
}

impl TransferLog {
    pub fn new(path: &Path) -> Self {
        TransferLog { log_file_path: path.to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn add_entry(&self, entry: &TransferRecord) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferRecord>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferRecord = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
