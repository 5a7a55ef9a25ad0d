//! Reconciles the time series pipeline stages left behind in their task
//! files with the exported archive.

pub mod align;
pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod diff;
pub mod error;
pub mod extract;
pub mod merge;
pub mod quality;

pub use commands::{CommandKind, CommandOutcome, Orchestrator};
pub use config::ValidationOptions;
pub use error::{Result, ValidationError};
