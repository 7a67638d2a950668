//! HTTP client for the snapper executor service.
//!
//! [`HttpExecutor`] implements the session [`Executor`](snapper_session::Executor)
//! seam over `POST /execute` and `POST /cancel`, and exposes the
//! experiment staging call used before running `snapper-ml`.

mod client;
pub mod wire;

pub use client::{ClientError, ExecutorConfig, HttpExecutor};
pub use wire::{
    CancelResponse, DatasetSpec, ExecuteRequest, SaveExperimentRequest, SaveExperimentResponse,
};
