#![forbid(unsafe_code)]

mod command;
mod frame;
mod response;

pub use command::{Command, CommandTag, MAX_TTL, ttl_from_wire, ttl_to_wire};
pub use frame::{Decode, Encode};
pub use response::{GetResponse, SetResponse, Status};
