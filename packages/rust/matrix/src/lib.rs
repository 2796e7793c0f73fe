//! Matrix chat bot front-end for Wayback.
//!
//! Logs in with a password, syncs with the homeserver through `matrix-sdk`,
//! accepts room invitations and answers every plain-text message with the
//! archived links.

pub mod bot;
pub mod reply;

pub use bot::MatrixBot;
pub use reply::{MatrixReply, ReplyRoom};
