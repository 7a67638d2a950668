//! Session life-cycle types.
//!
//! These types define what the controller hands back to its caller, and the
//! events the per-session stream pump sends to the controller.

use crate::cancel::CancelReason;
use crate::executor::TransportError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identifier of one submission, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Idle,
    Running,
    /// `cancel()` was called; waiting for the pump to observe the abort.
    Cancelling,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Canceled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Cancelling => "cancelling",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Why a session ended in [`SessionStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("command reported failure")]
    StatusFalse,
    #[error("output carried no status marker")]
    StatusMissing,
    #[error("{0}")]
    Transport(String),
}

/// Final record of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub command: String,
    /// Always a terminal status.
    pub status: SessionStatus,
    /// Set iff `status` is `Failed`.
    pub failure: Option<FailureReason>,
    /// Set iff `status` is `Canceled`.
    pub cancel_reason: Option<CancelReason>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Shell-style exit code: 0 completed, 1 failed, 130 canceled.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            SessionStatus::Completed => 0,
            SessionStatus::Canceled => 130,
            _ => 1,
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started(SessionId),
    /// Blank command, no session was created.
    Empty,
    /// Another session is still in flight.
    Rejected { running: SessionId },
}

/// Messages from a stream pump to its controller.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Chunk { session: SessionId, text: String },
    /// The body ended, cleanly or with a transport failure.
    Ended {
        session: SessionId,
        result: Result<(), TransportError>,
    },
    /// The pump observed its cancel token and abandoned the request.
    Aborted { session: SessionId },
    /// Nothing arrived within the idle timeout. The pump keeps waiting for
    /// its token after sending this.
    IdleTimeout { session: SessionId },
}

impl StreamEvent {
    pub(crate) fn session(&self) -> SessionId {
        match self {
            StreamEvent::Chunk { session, .. }
            | StreamEvent::Ended { session, .. }
            | StreamEvent::Aborted { session }
            | StreamEvent::IdleTimeout { session } => *session,
        }
    }
}
