//! Shared protocol constants for the lanbackup framed transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"LBAK";
pub const VERSION: u16 = 1;

// MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub const FRAME_HEADER_LEN: usize = 11;

// Maximum frame payload size (64MB) - prevents memory exhaustion from a bad peer
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Transfer headers are a single name or path line
pub const MAX_HEADER_LEN: usize = 4096;

// Default payload chunk for both sides (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// Default port; also the low end of the bind fallback range
pub const DEFAULT_PORT: u16 = 8675;

// Frame type IDs (keep numeric stable)
pub mod frame {
    // TransferHeader: destination name or source path, UTF-8
    pub const HEADER: u8 = 1;
    // Payload bytes; a zero-length DATA frame ends the transfer
    pub const DATA: u8 = 2;
}

// Centralized timeout constants
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Default idle timeout for server sessions (s)
    pub const READ_IDLE_SECS: u64 = 300;
}
