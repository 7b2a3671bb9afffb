//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Shared primitives and utilities for the executive."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
//! Shared primitives for the TREX workspace.
//! This crate exposes configuration loading and the tracing bootstrap
//! consumed by the engine, the adapters, and the CLI.

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, RunnerConfig};
pub use logging::{init_tracing, LogFormat};
