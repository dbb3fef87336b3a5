//! Shared types, error model, codecs, and configuration for retrace.
//!
//! This crate is the foundation depended on by all other retrace crates.
//! It provides:
//! - [`HistoryError`] - the unified error type
//! - Domain DTOs ([`PageSummary`], [`VisitSummary`], [`SearchQuery`], [`VisitsRemoved`])
//! - The page-transition codec ([`Transition`], [`TransitionKind`])
//! - The stored-time codec ([`time`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod time;
pub mod transition;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, StorageConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{HistoryError, Result};
pub use transition::{Transition, TransitionKind};
pub use types::{PageSummary, SearchQuery, VisitSummary, VisitsRemoved};
