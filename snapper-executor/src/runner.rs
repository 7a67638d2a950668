//! Running one command and streaming its output.

use crate::config::ServerConfig;
use crate::error::ExecutorError;
use crate::registry::ProcessRegistry;
use axum::body::Bytes;
use nix::sys::signal::{self as nix_signal, Signal};
use nix::unistd::Pid;
use snapper_session::sentinel::MARKER_PREFIX;
use std::io;
use std::net::IpAddr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) type OutputChunk = Result<Bytes, io::Error>;

/// Start `cmd` for `client`. The returned receiver yields the interleaved
/// stdout/stderr lines followed by the status marker. Dropping it kills the
/// command.
pub(crate) fn start(
    config: &ServerConfig,
    registry: &ProcessRegistry,
    shutdown: &CancellationToken,
    client: IpAddr,
    cmd: &str,
) -> Result<mpsc::Receiver<OutputChunk>, ExecutorError> {
    let mut command = Command::new(&config.shell);
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(&config.workdir)
        .env("COLUMNS", config.columns.to_string())
        .env("LINES", config.lines.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        // Signals reach the whole pipeline, not just bash.
        .process_group(0);

    let child = command.spawn().map_err(|source| ExecutorError::Spawn {
        command: cmd.to_string(),
        source,
    })?;

    let cancel = shutdown.child_token();
    let id = registry.register(client, cancel.clone());
    info!(%client, id, pid = child.id(), cmd, "command started");

    let (tx, rx) = mpsc::channel(64);
    let registry = registry.clone();
    let kill_grace = config.kill_grace;
    tokio::spawn(async move {
        let status = supervise(child, tx.clone(), cancel, kill_grace).await;
        registry.finished(client, id);

        let success = status.is_some_and(|status| status.success());
        info!(%client, id, ?status, "command finished");
        let marker = format!(
            "\n{MARKER_PREFIX}{}\n",
            if success { "True" } else { "False" }
        );
        let _ = tx.send(Ok(Bytes::from(marker))).await;
    });

    Ok(rx)
}

/// Forward output until the command exits. Returns `None` when it had to be
/// stopped (cancel, shutdown or the client went away).
async fn supervise(
    mut child: Child,
    tx: mpsc::Sender<OutputChunk>,
    cancel: CancellationToken,
    kill_grace: Duration,
) -> Option<ExitStatus> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        error!("command output was not captured");
        return None;
    };
    // Kept apart from `child`: once reaped, `child.id()` is gone but the
    // group may still hold the pipes open.
    let pid = child.id();
    let mut stdout_reader = LineReader::new(stdout);
    let mut stderr_reader = LineReader::new(stderr);

    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut exit_status: Option<ExitStatus> = None;

    loop {
        if exit_status.is_some() && stdout_closed && stderr_closed {
            return exit_status;
        }

        tokio::select! {
            result = stdout_reader.next_line(), if !stdout_closed => {
                stdout_closed = !forward(result, &tx).await;
            }
            result = stderr_reader.next_line(), if !stderr_closed => {
                stderr_closed = !forward(result, &tx).await;
            }
            result = child.wait(), if exit_status.is_none() => {
                match result {
                    Ok(status) => exit_status = Some(status),
                    Err(e) => {
                        error!("Error waiting for command: {}", e);
                        return None;
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!("command canceled");
                terminate(&mut child, pid, kill_grace).await;
                return None;
            }
            _ = tx.closed() => {
                debug!("client went away");
                terminate(&mut child, pid, kill_grace).await;
                return None;
            }
        }
    }
}

/// Reads raw lines, newline included. Output is not required to be UTF-8.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Safe to use in `select!`: a partially read line stays in `buf` and
    /// the next call completes it.
    async fn next_line(&mut self) -> io::Result<Option<Bytes>> {
        self.reader.read_until(b'\n', &mut self.buf).await?;
        if self.buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(std::mem::take(&mut self.buf))))
    }
}

/// Send one output line. False once the stream is done or unusable.
async fn forward(line: io::Result<Option<Bytes>>, tx: &mpsc::Sender<OutputChunk>) -> bool {
    match line {
        Ok(Some(line)) => tx.send(Ok(line)).await.is_ok(),
        Ok(None) => false,
        Err(e) => {
            warn!("Error reading command output: {}", e);
            false
        }
    }
}

/// SIGTERM the process group, SIGKILL it after `grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    let Some(pid) = pid else {
        return;
    };
    let group = Pid::from_raw(pid as i32);
    let _ = nix_signal::killpg(group, Signal::SIGTERM);

    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(grace) => {
            warn!(pid, "command ignored SIGTERM, killing it");
            let _ = nix_signal::killpg(group, Signal::SIGKILL);
            let _ = child.wait().await;
        }
    }
}
