//! IPv4 dotted-quad validation for user-supplied server addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::BackupError;

/// Returns true when `input` is exactly four dot-separated decimal octets (0-255).
///
/// Never panics; malformed input only ever yields `false`.
pub fn validate(input: &str) -> bool {
    parse_octets(input).is_some()
}

fn parse_octets(input: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for segment in input.split('.') {
        if count == 4 {
            return None;
        }
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // u8 parsing does the range check; long runs of leading zeros still fit
        let trimmed = segment.trim_start_matches('0');
        octets[count] = if trimmed.is_empty() {
            0
        } else {
            trimmed.parse::<u8>().ok()?
        };
        count += 1;
    }
    (count == 4).then_some(octets)
}

/// A validated IPv4 server address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Ipv4Addr);

impl Address {
    pub fn parse(input: &str) -> Result<Self, BackupError> {
        parse_octets(input)
            .map(|o| Address(Ipv4Addr::from(o)))
            .ok_or_else(|| BackupError::InvalidAddress {
                input: input.to_string(),
            })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.0
    }

    pub fn is_loopback(&self) -> bool {
        self.0.is_loopback()
    }

    pub fn localhost() -> Self {
        Address(Ipv4Addr::LOCALHOST)
    }

    pub fn unspecified() -> Self {
        Address(Ipv4Addr::UNSPECIFIED)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address(ip)
    }
}

impl FromStr for Address {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
