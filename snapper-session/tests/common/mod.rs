#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use snapper_session::{
    CancelOutcome, CancelSignalError, ChunkStream, Executor, SessionConfig, SessionController, SessionReport,
    Transcript, TransportError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Executor whose responses are scripted by the test.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    responses: VecDeque<Result<ChunkStream, TransportError>>,
    commands: Vec<String>,
    cancel_calls: usize,
    cancel_fails: bool,
    nothing_to_cancel: bool,
}

impl ScriptedExecutor {
    /// Next execution streams `chunks`, then ends.
    pub fn respond_with(&self, chunks: &[&str]) {
        let items: Vec<Result<Vec<u8>, TransportError>> = chunks
            .iter()
            .map(|chunk| Ok(chunk.as_bytes().to_vec()))
            .collect();
        self.push(Ok(futures::stream::iter(items).boxed()));
    }

    /// Next execution streams whatever is sent through the returned feed.
    pub fn respond_live(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.push(Ok(rx.boxed()));
        Feed { tx }
    }

    /// Next execution fails before any output.
    pub fn respond_error(&self, err: TransportError) {
        self.push(Err(err));
    }

    pub fn fail_cancel(&self) {
        self.state.lock().unwrap().cancel_fails = true;
    }

    /// `/cancel` answers that nothing was running.
    pub fn nothing_to_cancel(&self) {
        self.state.lock().unwrap().nothing_to_cancel = true;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.lock().unwrap().cancel_calls
    }

    fn push(&self, response: Result<ChunkStream, TransportError>) {
        self.state.lock().unwrap().responses.push_back(response);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, cmd: &str) -> Result<ChunkStream, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(cmd.to_string());
        // Unscripted executions never produce anything, like `sleep 100`.
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(futures::stream::pending().boxed()))
    }

    async fn cancel(&self) -> Result<CancelOutcome, CancelSignalError> {
        let mut state = self.state.lock().unwrap();
        state.cancel_calls += 1;
        if state.cancel_fails {
            Err(CancelSignalError("connection refused".to_string()))
        } else if state.nothing_to_cancel {
            Ok(CancelOutcome::NothingRunning)
        } else {
            Ok(CancelOutcome::Terminated)
        }
    }
}

/// Sender side of a live response.
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
}

impl Feed {
    pub fn chunk(&self, text: &str) {
        let _ = self.tx.unbounded_send(Ok(text.as_bytes().to_vec()));
    }

    pub fn fail(&self, err: TransportError) {
        let _ = self.tx.unbounded_send(Err(err));
    }

    /// End the response body.
    pub fn close(self) {}

    /// True once the consumer dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub type Reports = Arc<Mutex<Vec<SessionReport>>>;

/// A controller over a transcript, with a hook that records its calls.
pub fn controller(
    executor: &ScriptedExecutor,
    config: SessionConfig,
) -> (SessionController<Transcript>, Reports) {
    let reports = Reports::default();
    let controller = SessionController::new(
        Arc::new(executor.clone()),
        Transcript::default(),
        config,
    )
    .with_completion_hook({
        let reports = Arc::clone(&reports);
        move |report| reports.lock().unwrap().push(report.clone())
    });
    (controller, reports)
}

pub fn type_line(controller: &mut SessionController<Transcript>, line: &str) {
    for c in line.chars() {
        controller.handle_key(&c.to_string());
    }
}

/// Poll `condition` until it holds, yielding to other tasks in between.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
