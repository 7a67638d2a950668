//! The session controller.
//!
//! [`SessionController`] owns the line editor, the single in-flight session
//! and the prompt. Keystrokes and stream events are applied one at a time
//! through `&mut self`; the only thing shared with other tasks is the
//! session's [`CancelToken`].

use crate::cancel::{CancelReason, CancelToken};
use crate::executor::Executor;
use crate::line_editor::{LineEditor, LineEvent};
use crate::protocol::{
    FailureReason, SessionId, SessionReport, SessionStatus, StreamEvent, SubmitOutcome,
};
use crate::pump::StreamPump;
use crate::sentinel::{MarkerMode, SentinelDecoder};
use crate::surface::Surface;
use miette::Diagnostic;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("terminal I/O failed: {0}")]
    #[diagnostic(code(snapper::session::terminal))]
    Terminal(#[from] io::Error),
}

/// Texts and limits used by the controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub prompt: String,
    /// Written as soon as a running session is canceled.
    pub cancel_notice: String,
    /// Written when a session fails because of the transport.
    pub failure_notice: String,
    /// Cancel a session when nothing arrives for this long.
    pub idle_timeout: Option<Duration>,
    pub marker_mode: MarkerMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: " $ ".to_string(),
            cancel_notice: "Execution canceled!\n".to_string(),
            failure_notice: "Execution error!\n".to_string(),
            idle_timeout: None,
            marker_mode: MarkerMode::PerChunk,
        }
    }
}

/// Called with the report of every session that completed successfully.
pub type CompletionHook = Box<dyn FnMut(&SessionReport) + Send>;

/// What a keystroke led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Handled,
    Submitted(SubmitOutcome),
    /// Ctrl-C.
    Interrupted,
    /// Ctrl-D on an empty line with nothing running.
    EndOfInput,
}

/// Why [`SessionController::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    EndOfInput,
    /// The keystroke feed closed and the last session finished.
    InputClosed,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Echo {
    Command,
    LineBreak,
}

struct ActiveSession {
    id: SessionId,
    command: String,
    status: SessionStatus,
    token: CancelToken,
    decoder: SentinelDecoder,
    pending_status: Option<bool>,
    started: Instant,
}

pub struct SessionController<S: Surface> {
    executor: Arc<dyn Executor>,
    surface: S,
    editor: LineEditor,
    config: SessionConfig,
    active: Option<ActiveSession>,
    hook: Option<CompletionHook>,
    parent: Option<CancellationToken>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
    next_id: u64,
    prompt_visible: bool,
}

impl<S: Surface> SessionController<S> {
    pub fn new(executor: Arc<dyn Executor>, surface: S, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            executor,
            surface,
            editor: LineEditor::new(),
            config,
            active: None,
            hook: None,
            parent: None,
            events_tx,
            events_rx,
            next_id: 1,
            prompt_visible: false,
        }
    }

    /// Run `hook` after every successful, non-canceled session.
    pub fn with_completion_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&SessionReport) + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Derive session cancel tokens from `token`, so cancelling it aborts
    /// whatever is in flight.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.active
            .as_ref()
            .map_or(SessionStatus::Idle, |active| active.status)
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Current content of the input line.
    pub fn line(&self) -> &str {
        self.editor.buffer()
    }

    pub fn prompt_visible(&self) -> bool {
        self.prompt_visible
    }

    pub fn show_prompt(&mut self) {
        self.surface.write(&self.config.prompt);
        self.prompt_visible = true;
    }

    /// Feed one keystroke.
    pub fn handle_key(&mut self, key: &str) -> KeyOutcome {
        match self.editor.feed(key, &mut self.surface) {
            LineEvent::Edited => KeyOutcome::Handled,
            LineEvent::Submit(line) => KeyOutcome::Submitted(self.start(line, Echo::LineBreak)),
            LineEvent::Interrupt => {
                match self.status() {
                    SessionStatus::Running => {
                        self.cancel();
                    }
                    SessionStatus::Idle => {
                        self.editor.clear();
                        self.surface.write("\n");
                        self.show_prompt();
                    }
                    _ => {}
                }
                KeyOutcome::Interrupted
            }
            LineEvent::EndOfInput if self.active.is_none() => KeyOutcome::EndOfInput,
            LineEvent::EndOfInput => KeyOutcome::Handled,
        }
    }

    /// Submit `cmd` as if it had been typed, echoing it first.
    pub fn submit(&mut self, cmd: &str) -> SubmitOutcome {
        self.editor.clear();
        self.start(cmd.to_string(), Echo::Command)
    }

    fn start(&mut self, command: String, echo: Echo) -> SubmitOutcome {
        if let Some(active) = &self.active {
            debug!(
                running = %active.id,
                command,
                "rejecting submission while a session is in flight"
            );
            return SubmitOutcome::Rejected { running: active.id };
        }

        if command.trim().is_empty() {
            self.surface.write("\n");
            self.show_prompt();
            return SubmitOutcome::Empty;
        }

        match echo {
            Echo::Command => self.surface.write(&format!("{command}\n")),
            Echo::LineBreak => self.surface.write("\n"),
        }
        self.prompt_visible = false;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let token = match &self.parent {
            Some(parent) => CancelToken::child_of(parent),
            None => CancelToken::new(),
        };

        info!(session = %id, command, "session started");
        StreamPump {
            session: id,
            command: command.clone(),
            executor: Arc::clone(&self.executor),
            token: token.token().clone(),
            idle_timeout: self.config.idle_timeout,
            events: self.events_tx.clone(),
        }
        .spawn();

        self.active = Some(ActiveSession {
            id,
            command,
            status: SessionStatus::Running,
            token,
            decoder: SentinelDecoder::new(self.config.marker_mode),
            pending_status: None,
            started: Instant::now(),
        });
        SubmitOutcome::Started(id)
    }

    /// Cancel the running session. Returns false when nothing was running.
    pub fn cancel(&mut self) -> bool {
        self.cancel_with(CancelReason::User)
    }

    pub fn cancel_with(&mut self, reason: CancelReason) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.status != SessionStatus::Running {
            return false;
        }

        active.status = SessionStatus::Cancelling;
        let id = active.id;
        let token = active.token.clone();
        info!(session = %id, %reason, "canceling session");

        self.editor.clear();
        self.surface.write(&self.config.cancel_notice);

        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            match executor.cancel().await {
                Ok(outcome) => debug!(session = %id, ?outcome, "cancel notification sent"),
                Err(err) => warn!(session = %id, "{err}"),
            }
        });

        token.cancel(reason);
        true
    }

    /// Wait for the in-flight session to reach a terminal state.
    ///
    /// Returns `None` right away when nothing is in flight.
    pub async fn wait_for_report(&mut self) -> Option<SessionReport> {
        while self.active.is_some() {
            let event = self.events_rx.recv().await?;
            if let Some(report) = self.apply(event) {
                return Some(report);
            }
        }
        None
    }

    /// Drive the interactive loop: keystrokes, stream events and shutdown.
    ///
    /// Draws the prompt once on entry. On shutdown the in-flight session is
    /// canceled and its abort awaited before returning.
    pub async fn run(
        &mut self,
        keys: &mut mpsc::Receiver<String>,
        shutdown: CancellationToken,
    ) -> RunExit {
        self.show_prompt();
        let mut keys_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.cancel_with(CancelReason::Shutdown);
                    self.wait_for_report().await;
                    return RunExit::Shutdown;
                }
                Some(event) = self.events_rx.recv() => {
                    if self.apply(event).is_some() && !keys_open {
                        return RunExit::InputClosed;
                    }
                }
                key = keys.recv(), if keys_open => match key {
                    Some(key) => {
                        if self.handle_key(&key) == KeyOutcome::EndOfInput {
                            return RunExit::EndOfInput;
                        }
                    }
                    None => {
                        debug!("keystroke feed closed");
                        keys_open = false;
                        if self.active.is_none() {
                            return RunExit::InputClosed;
                        }
                    }
                },
            }
        }
    }

    fn apply(&mut self, event: StreamEvent) -> Option<SessionReport> {
        let active = self.active.as_mut()?;
        if event.session() != active.id {
            debug!(current = %active.id, ?event, "dropping event of a finished session");
            return None;
        }

        match event {
            StreamEvent::Chunk { text, .. } => {
                if active.status == SessionStatus::Cancelling {
                    return None;
                }
                let decoded = active.decoder.decode(&text);
                if decoded.status.is_some() {
                    active.pending_status = decoded.status;
                }
                if !decoded.text.is_empty() {
                    self.surface.write(&decoded.text);
                }
                None
            }
            StreamEvent::Ended { result, .. } => {
                if active.status == SessionStatus::Cancelling || active.token.is_cancelled() {
                    return self.finish(SessionStatus::Canceled, None);
                }
                match result {
                    Ok(()) => {
                        let tail = active.decoder.finish();
                        if tail.status.is_some() {
                            active.pending_status = tail.status;
                        }
                        if !tail.text.is_empty() {
                            self.surface.write(&tail.text);
                        }
                        match active.pending_status {
                            Some(true) => self.finish(SessionStatus::Completed, None),
                            Some(false) => {
                                self.finish(SessionStatus::Failed, Some(FailureReason::StatusFalse))
                            }
                            None => self
                                .finish(SessionStatus::Failed, Some(FailureReason::StatusMissing)),
                        }
                    }
                    Err(err) => {
                        warn!(session = %active.id, "{err}");
                        self.surface.write(&self.config.failure_notice);
                        self.finish(
                            SessionStatus::Failed,
                            Some(FailureReason::Transport(err.to_string())),
                        )
                    }
                }
            }
            StreamEvent::Aborted { .. } => {
                if active.status == SessionStatus::Running {
                    // Cancelled from outside, through the shutdown token.
                    self.cancel_with(CancelReason::Shutdown);
                }
                self.finish(SessionStatus::Canceled, None)
            }
            StreamEvent::IdleTimeout { .. } => {
                self.cancel_with(CancelReason::IdleTimeout);
                None
            }
        }
    }

    fn finish(
        &mut self,
        status: SessionStatus,
        failure: Option<FailureReason>,
    ) -> Option<SessionReport> {
        let active = self.active.take()?;
        let report = SessionReport {
            id: active.id,
            command: active.command,
            status,
            failure,
            cancel_reason: if status == SessionStatus::Canceled {
                active.token.reason()
            } else {
                None
            },
            elapsed: active.started.elapsed(),
        };

        match &report.failure {
            Some(reason) => info!(session = %report.id, %status, %reason, "session finished"),
            None => info!(session = %report.id, %status, "session finished"),
        }

        self.show_prompt();

        if report.succeeded()
            && let Some(hook) = self.hook.as_mut()
        {
            hook(&report);
        }

        Some(report)
    }
}

impl<S: Surface> Drop for SessionController<S> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.token.cancel(CancelReason::Shutdown);
        }
    }
}
