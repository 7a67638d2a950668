//! Remote command sessions.
//!
//! This crate provides the interactive core of snapper: a line editor fed
//! one keystroke at a time, a decoder for the status marker embedded in
//! executor output, and the session controller that ties a single in-flight
//! remote execution to a terminal surface.

mod cancel;
mod executor;
mod keys;
mod line_editor;
mod protocol;
mod pump;
pub mod sentinel;
mod session;
mod surface;
mod terminal;

pub use cancel::{CancelReason, CancelToken};
pub use executor::{CancelOutcome, CancelSignalError, ChunkStream, Executor, TransportError};
pub use keys::{KeySplitter, spawn_key_reader, stdin_keys};
pub use line_editor::{ERASE, LineEditor, LineEvent};
pub use protocol::{FailureReason, SessionId, SessionReport, SessionStatus, SubmitOutcome};
pub use sentinel::{MarkerMode, SentinelDecoder};
pub use session::{
    CompletionHook, KeyOutcome, RunExit, SessionConfig, SessionController, SessionError,
};
pub use surface::{Surface, Transcript};
pub use terminal::{RawModeGuard, TerminalSurface, is_tty, restore_terminal};

// Re-export for convenience
pub use tokio_util::sync::CancellationToken;
