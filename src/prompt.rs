//! Interactive prompts for the client binary.

use anyhow::{bail, Result};
use std::io::{BufRead, Write};

use crate::address::Address;

pub const ADDRESS_PROMPT: &str = "Backup server IP address: ";
pub const INVALID_ADDRESS: &str = "Invalid IP address format. Please re-check IP and try again.";
pub const PATH_PROMPT: &str = "Path to directory or file you wish to back up: ";
pub const ARCHIVE_NAME_PROMPT: &str = "Name your new backup file: ";

/// Asks for the server address until a valid dotted quad is entered.
pub fn prompt_server_address<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<Address> {
    loop {
        let answer = prompt_line(&mut input, &mut output, ADDRESS_PROMPT)?;
        match Address::parse(&answer) {
            Ok(addr) => return Ok(addr),
            Err(_) => writeln!(output, "{INVALID_ADDRESS}")?,
        }
    }
}

/// Writes `label`, reads one line and returns it trimmed. EOF is an error.
pub fn prompt_line<R: BufRead, W: Write>(mut input: R, mut output: W, label: &str) -> Result<String> {
    write!(output, "{label}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("input closed while waiting for: {}", label.trim_end_matches([':', ' ']));
    }
    Ok(line.trim().to_string())
}
