#![forbid(unsafe_code)]

mod error;

pub use error::*;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";
pub const MAX_INFLIGHT_PER_CONNECTION: usize = 64;
pub const REPLICATION_BUFFER: usize = 1024;
pub const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024; // 4 KB
pub const MAX_FIELD_LEN: usize = 64 * 1024 * 1024; // 64 MB
