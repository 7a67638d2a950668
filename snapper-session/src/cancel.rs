//! Per-session cancel token.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why a session was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// `cancel()` or Ctrl-C.
    User,
    /// No data was exchanged within the configured idle timeout.
    IdleTimeout,
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::User => write!(f, "user"),
            CancelReason::IdleTimeout => write!(f, "idle timeout"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A [`CancellationToken`] that remembers the reason it was cancelled.
///
/// The first reason recorded wins. A token cancelled through its parent
/// (process shutdown) reports [`CancelReason::Shutdown`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Arc::default(),
        }
    }

    /// Cancel with `reason`. Returns false if the token was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let _ = self.reason.set(reason);
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason
            .get()
            .copied()
            .or_else(|| self.token.is_cancelled().then_some(CancelReason::Shutdown))
    }

    /// The underlying token, for `select!`.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
