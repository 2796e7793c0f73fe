//! Archival dispatch and the message pipeline shared by every Wayback front-end.
//!
//! This crate ties together URL extraction, concurrent per-slot dispatch,
//! aggregation, rendering and publishing into a single pipeline run
//! (see [`Pipeline::run`]).

pub mod aggregate;
pub mod context;
pub mod dispatch;
pub mod extract;
pub mod pipeline;
pub mod publish;
pub mod render;

#[cfg(test)]
mod testing;

pub use aggregate::flatten;
pub use context::ServiceContext;
pub use dispatch::{Dispatcher, Policy};
pub use extract::extract_urls;
pub use pipeline::{Outcome, Pipeline, Reply, ReplySink, State};
pub use publish::{Channel, Publisher, Publishers, WebhookPublisher};
pub use render::{Format, render_chat, render_chat_plain, render_entries, render_text};
