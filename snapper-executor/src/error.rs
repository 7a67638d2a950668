use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use miette::Diagnostic;
use snapper_remote::CancelResponse;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("Invalid command")]
    InvalidCommand,
    #[error("Invalid data")]
    InvalidData,
    #[error("path '{0}' is outside the working directory")]
    #[diagnostic(code(snapper::executor::path))]
    OutsideWorkdir(String),
    #[error("invalid dataset pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("No running process found")]
    NoProcess,
    #[error("failed to start '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}")]
    #[diagnostic(code(snapper::executor::bind), help("is another executor already running?"))]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("staging task panicked")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IntoResponse for ExecutorError {
    fn into_response(self) -> Response {
        match &self {
            ExecutorError::InvalidCommand
            | ExecutorError::InvalidData
            | ExecutorError::OutsideWorkdir(_)
            | ExecutorError::Pattern { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            ExecutorError::NoProcess => (
                StatusCode::NOT_FOUND,
                Json(CancelResponse {
                    status: self.to_string(),
                }),
            )
                .into_response(),
            ExecutorError::Spawn { source, .. } => {
                error!("{self}: {source}");
                let detail = format!("{self}: {source}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "output": detail, "logs": detail })),
                )
                    .into_response()
            }
            _ => {
                error!("{self}");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}
