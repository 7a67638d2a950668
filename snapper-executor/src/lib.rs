//! The executor service: runs shell commands for remote terminals and
//! streams their output back, terminated by a `PROCESS_STATUS` marker.
//!
//! Endpoints:
//! - `POST /execute` with `{"cmd": ...}` streams the combined output.
//! - `POST /cancel` stops the caller's running command.
//! - `POST /save_experiment_file` stages an experiment config and its datasets.

mod config;
mod error;
mod registry;
mod runner;
mod server;
mod staging;

pub use config::ServerConfig;
pub use error::ExecutorError;
pub use server::{serve, serve_on};
