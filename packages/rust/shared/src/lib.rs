//! Shared types, error model, and configuration for docforge.
//!
//! This crate is the foundation depended on by all other docforge crates.
//! It provides:
//! - [`DocForgeError`] — the unified error type
//! - Domain types ([`CompilationRequest`], [`ProjectContext`], [`Engine`])
//! - Configuration ([`AppConfig`], settings loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CleanupConfig, CompileConfig, MarkersConfig, StepCommand, StepsConfig,
    WatchBackendChoice, WatchConfig, config_dir, config_file_path, init_config, init_config_at,
    load_config, load_config_from,
};
pub use error::{DocForgeError, Result};
pub use types::{CompilationRequest, Engine, ModeFlags, ProjectContext};
