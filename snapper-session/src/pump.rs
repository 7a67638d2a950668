//! The per-session stream pump.
//!
//! One pump task runs per accepted submission. It issues the request, turns
//! body bytes into text and relays everything to the controller as
//! [`StreamEvent`]s. Every await is raced against the session's cancel token
//! so that an abort is always reported as [`StreamEvent::Aborted`], never as
//! an ordinary end of stream.

use crate::executor::{Executor, TransportError};
use crate::protocol::{SessionId, StreamEvent};
use crate::sentinel::Utf8Decoder;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) struct StreamPump {
    pub session: SessionId,
    pub command: String,
    pub executor: Arc<dyn Executor>,
    pub token: CancellationToken,
    pub idle_timeout: Option<Duration>,
    pub events: mpsc::UnboundedSender<StreamEvent>,
}

enum Step<T> {
    Ready(T),
    Cancelled,
    Idle,
}

impl StreamPump {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let event = match self.drive().await {
            Some(result) => StreamEvent::Ended {
                session: self.session,
                result,
            },
            None => StreamEvent::Aborted {
                session: self.session,
            },
        };
        debug!(session = %self.session, ?event, "stream pump finished");
        let _ = self.events.send(event);
    }

    /// `None` when the token was cancelled.
    async fn drive(&self) -> Option<Result<(), TransportError>> {
        let mut stream = match self.step(self.executor.execute(&self.command)).await {
            Step::Ready(Ok(stream)) => stream,
            Step::Ready(Err(err)) => return Some(Err(err)),
            Step::Cancelled => return None,
            Step::Idle => return self.idle().await,
        };

        let mut utf8 = Utf8Decoder::default();
        loop {
            match self.step(stream.next()).await {
                Step::Ready(Some(Ok(bytes))) => {
                    trace!(session = %self.session, len = bytes.len(), "chunk");
                    let text = utf8.push(&bytes);
                    if !text.is_empty() && !self.send_chunk(text) {
                        return None;
                    }
                }
                Step::Ready(Some(Err(err))) => return Some(Err(err)),
                Step::Ready(None) => {
                    let rest = utf8.finish();
                    if !rest.is_empty() && !self.send_chunk(rest) {
                        return None;
                    }
                    return Some(Ok(()));
                }
                Step::Cancelled => return None,
                Step::Idle => return self.idle().await,
            }
        }
    }

    async fn step<F: Future>(&self, fut: F) -> Step<F::Output> {
        let bounded = async {
            match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
                None => Some(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Step::Cancelled,
            out = bounded => match out {
                Some(out) => Step::Ready(out),
                None => Step::Idle,
            },
        }
    }

    /// Report the idle timeout and wait for the controller to cancel us.
    async fn idle(&self) -> Option<Result<(), TransportError>> {
        debug!(session = %self.session, "idle timeout reached");
        if self
            .events
            .send(StreamEvent::IdleTimeout {
                session: self.session,
            })
            .is_ok()
        {
            self.token.cancelled().await;
        }
        None
    }

    fn send_chunk(&self, text: String) -> bool {
        self.events
            .send(StreamEvent::Chunk {
                session: self.session,
                text,
            })
            .is_ok()
    }
}
