//! GQ EMF-390 protocol: command table and reply parsing.

pub mod command;
pub mod parser;

pub use command::{Command, CommandSpec, ReplyShape};
pub use parser::{parse_reply, RawReply, Reading};
