//! Signal-driven shutdown for the snapper binaries.
//!
//! One [`Shutdown`] exists per process. It owns the root
//! [`CancellationToken`]; every remote session and the executor service
//! derive child tokens from it, so a SIGINT/SIGTERM/SIGHUP tears down
//! whatever is in flight through the same path a user cancel takes.

use nix::sys::signal::{
    self as nix_signal, SaFlags, SigAction, SigHandler as NixSigHandler, SigSet,
};
use nix::unistd;

pub use nix::sys::signal::Signal;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::signal::unix::{SignalKind, signal};
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type ExitHook = Box<dyn Fn() + Send + Sync>;

/// Process-wide shutdown coordinator.
pub struct Shutdown {
    token: CancellationToken,
    last_signal: AtomicI32,
    /// Runs right before a forced exit, e.g. to leave raw terminal mode.
    pre_exit_hook: Mutex<Option<ExitHook>>,
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("token", &self.token)
            .field("last_signal", &self.last_signal())
            .finish()
    }
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            last_signal: AtomicI32::new(0),
            pre_exit_hook: Mutex::new(None),
        })
    }

    /// Register the hook run by [`Shutdown::exit_process`].
    pub fn set_pre_exit_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        if let Ok(mut slot) = self.pre_exit_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Clone of the root token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token that is cancelled when shutdown is requested, but can also be
    /// cancelled on its own without affecting the root.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Drive `fut` to completion unless shutdown is requested first.
    pub async fn until_shutdown<Fut, T>(&self, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = T>,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Install SIGINT/SIGTERM/SIGHUP handlers.
    ///
    /// The first signal cancels the root token. A second one runs the
    /// pre-exit hook and re-raises the signal with its default disposition.
    pub fn install_signals(self: &Arc<Self>) -> io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let shutdown = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => Signal::SIGINT,
                    _ = sigterm.recv() => Signal::SIGTERM,
                    _ = sighup.recv() => Signal::SIGHUP,
                };

                if shutdown.last_signal().is_some() {
                    info!("Received {:?} again, forcing exit", received);
                    shutdown.exit_process();
                }

                info!("Received {:?}, shutting down", received);
                shutdown.set_last_signal(received);
                shutdown.shutdown();
            }
        });

        debug!("signal handlers installed");
        Ok(())
    }

    pub fn last_signal(&self) -> Option<Signal> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            raw => Signal::try_from(raw).ok(),
        }
    }

    /// Record a signal that arrived through another channel, such as a
    /// Ctrl-C keystroke read while the terminal is in raw mode.
    pub fn set_last_signal(&self, signal: Signal) {
        self.last_signal.store(signal as i32, Ordering::Relaxed);
    }

    /// Exit code a process should use after shutting down because of
    /// `last_signal` (128 + signal number, as shells report it).
    pub fn exit_code(&self) -> Option<i32> {
        self.last_signal().map(|signal| 128 + signal as i32)
    }

    /// Run the pre-exit hook, then terminate with the last signal received.
    pub fn exit_process(&self) -> ! {
        if let Ok(guard) = self.pre_exit_hook.lock()
            && let Some(hook) = guard.as_ref()
        {
            hook();
        }

        let signal = self.last_signal().unwrap_or(Signal::SIGTERM);
        let action = SigAction::new(NixSigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring the default disposition and signalling ourselves
        // has no memory-safety implications.
        unsafe {
            let _ = nix_signal::sigaction(signal, &action);
        }
        let _ = nix_signal::kill(unistd::getpid(), signal);

        std::process::exit(128 + signal as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn until_shutdown_returns_output_when_not_cancelled() {
        let shutdown = Shutdown::new();
        let out = shutdown.until_shutdown(async { 42 }).await;
        assert_eq!(out, Some(42));
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn until_shutdown_is_interrupted() {
        let shutdown = Shutdown::new();

        tokio::spawn({
            let shutdown = Arc::clone(&shutdown);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                shutdown.shutdown();
            }
        });

        let out = shutdown
            .until_shutdown(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "never"
            })
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn until_shutdown_skips_work_after_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.shutdown();
        let out = shutdown.until_shutdown(async { 1 }).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn child_tokens_follow_root_but_not_the_reverse() {
        let shutdown = Shutdown::new();
        let session = shutdown.child_token();
        let other = shutdown.child_token();

        session.cancel();
        assert!(session.is_cancelled());
        assert!(!other.is_cancelled());
        assert!(!shutdown.is_cancelled());

        shutdown.shutdown();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn wait_for_shutdown_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = tokio::spawn({
            let shutdown = Arc::clone(&shutdown);
            async move {
                shutdown.wait_for_shutdown().await;
                true
            }
        });

        shutdown.shutdown();
        let woke = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(woke.unwrap().unwrap());
    }

    #[test]
    fn last_signal_round_trips_and_maps_to_exit_code() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.last_signal(), None);
        assert_eq!(shutdown.exit_code(), None);

        shutdown.set_last_signal(Signal::SIGINT);
        assert_eq!(shutdown.last_signal(), Some(Signal::SIGINT));
        assert_eq!(shutdown.exit_code(), Some(130));
    }
}
