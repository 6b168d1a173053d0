//! Configuration loading, validation, and env substitution.
//!
//! Config files: `switchyard.toml`, `switchyard.yaml`, or `switchyard.json`
//! Searched in `./` then `~/.config/switchyard/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, parse_config},
    schema::{AdmissionMode, DispatcherConfig, LaneSettings, SwitchyardConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
