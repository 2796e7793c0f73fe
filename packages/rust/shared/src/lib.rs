//! Shared types, error model, and configuration for Wayback.
//!
//! This crate is the foundation depended on by all other Wayback crates.
//! It provides:
//! - [`WaybackError`], the unified error type
//! - Domain types ([`Slot`], [`SlotRegistry`], [`Record`], [`ResultSet`], [`FlattenedEntry`])
//! - Configuration ([`AppConfig`], config loading, secret lookup)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendsConfig, DefaultsConfig, MatrixConfig, OnionConfig, PublishConfig,
    SlotConfig, SlotsConfig, WebConfig, config_dir, config_file_path, init_config,
    init_config_at, load_config, load_config_from, read_secret, require_secret,
};
pub use error::{Result, WaybackError};
pub use types::{FlattenedEntry, Mapping, Record, ResultSet, Slot, SlotInfo, SlotRegistry};
