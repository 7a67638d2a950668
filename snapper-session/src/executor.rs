//! The remote executor seam.
//!
//! The controller only knows this trait. `snapper-remote` implements it over
//! HTTP; tests implement it with scripted channels.

use async_trait::async_trait;
use futures::stream::BoxStream;
use miette::Diagnostic;
use thiserror::Error;

/// Raw body chunks of one execution, in arrival order.
///
/// Lazy, finite and not restartable: once it yields `None` (or an error) the
/// execution is over.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Network failure or a non-success response from the executor.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum TransportError {
    #[error("executor request failed: {0}")]
    Request(String),
    #[error("executor responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("reading the output stream failed: {0}")]
    Stream(String),
}

/// What the executor said to a `/cancel` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Terminated,
    /// Nothing was running, e.g. the dropped stream already stopped it.
    NothingRunning,
}

/// The best-effort `/cancel` notification failed. Only ever logged.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("cancel notification failed: {0}")]
pub struct CancelSignalError(pub String);

#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Start executing `cmd` and return its output stream.
    ///
    /// Dropping the returned stream abandons the request.
    async fn execute(&self, cmd: &str) -> Result<ChunkStream, TransportError>;

    /// Ask the executor to terminate whatever it is running for us.
    async fn cancel(&self) -> Result<CancelOutcome, CancelSignalError>;
}
