#![forbid(unsafe_code)]

mod connection;
pub mod handler;
mod peer;
pub mod replication;
mod server;

pub use connection::{Connection, FrameWriter};
pub use handler::{SessionEnd, handle_connection};
pub use peer::PeerHandle;
pub use replication::Replication;
pub use server::{Server, ServerConfig, serve};
