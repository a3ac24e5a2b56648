//! SMTP wire protocol: commands, replies and message bodies

pub mod data;
pub mod smtp;

pub use data::{Message, MessageBuilder, Progress};
pub use smtp::{Command, Response, ResponseCode, State};
