use crate::wire::{CancelResponse, ExecuteRequest, SaveExperimentRequest, SaveExperimentResponse};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use miette::Diagnostic;
use snapper_session::{CancelOutcome, CancelSignalError, ChunkStream, Executor, TransportError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("snapper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("invalid executor URL '{url}'")]
    #[diagnostic(code(snapper::remote::url), help("use an absolute http(s) URL"))]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),
    #[error("request to {endpoint} failed")]
    #[diagnostic(code(snapper::remote::request), help("is the executor running?"))]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} responded with status {status}: {body}")]
    #[diagnostic(code(snapper::remote::status))]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected response body from {endpoint}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Where the executor lives and how long to wait for a connection.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub url: Url,
    pub connect_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:8000/").expect("static URL is valid"),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    pub fn parse_url(url: &str) -> Result<Url, ClientError> {
        Url::parse(url).map_err(|source| ClientError::InvalidUrl {
            url: url.to_string(),
            source,
        })
    }
}

/// [`Executor`] talking to the executor service over HTTP.
///
/// The client has no overall request timeout: `/execute` streams for as
/// long as the command runs. Only connecting is bounded.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base: Url,
}

impl HttpExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ClientError::Build)?;

        // `Url::join` replaces the last path segment unless the base ends
        // with a slash.
        let mut base = config.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &'static str) -> Result<Url, ClientError> {
        self.base.join(path).map_err(|source| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base),
            source,
        })
    }

    /// Stage an experiment config (and its dataset links) on the executor.
    pub async fn save_experiment_file(
        &self,
        request: &SaveExperimentRequest,
    ) -> Result<SaveExperimentResponse, ClientError> {
        const ENDPOINT: &str = "save_experiment_file";
        let response = self
            .client
            .post(self.endpoint(ENDPOINT)?)
            .json(request)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: ENDPOINT,
                source,
            })?;
        let response = check_status(ENDPOINT, response).await?;
        response
            .json::<SaveExperimentResponse>()
            .await
            .map_err(|source| ClientError::Decode {
                endpoint: ENDPOINT,
                source,
            })
    }

    /// Ask the executor to terminate the process it runs for us.
    pub async fn cancel_process(&self) -> Result<CancelResponse, ClientError> {
        const ENDPOINT: &str = "cancel";
        let response = self
            .client
            .post(self.endpoint(ENDPOINT)?)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: ENDPOINT,
                source,
            })?;
        let response = check_status(ENDPOINT, response).await?;
        response
            .json::<CancelResponse>()
            .await
            .map_err(|source| ClientError::Decode {
                endpoint: ENDPOINT,
                source,
            })
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, cmd: &str) -> Result<ChunkStream, TransportError> {
        let url = self
            .endpoint("execute")
            .map_err(|err| TransportError::Request(err.to_string()))?;
        debug!(%url, cmd, "POST /execute");

        let response = self
            .client
            .post(url)
            .json(&ExecuteRequest::new(cmd))
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = sanitize_error_body(&response.text().await.unwrap_or_default());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|err| TransportError::Stream(err.to_string()))
            .boxed())
    }

    async fn cancel(&self) -> Result<CancelOutcome, CancelSignalError> {
        match self.cancel_process().await {
            Ok(response) => {
                debug!(status = %response.status, "POST /cancel");
                Ok(CancelOutcome::Terminated)
            }
            Err(ClientError::Status { status: 404, .. }) => Ok(CancelOutcome::NothingRunning),
            Err(err) => Err(CancelSignalError(err.to_string())),
        }
    }
}

async fn check_status(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = sanitize_error_body(&response.text().await.unwrap_or_default());
    Err(ClientError::Status {
        endpoint,
        status: status.as_u16(),
        body,
    })
}

/// Collapse whitespace and control characters and cap the length, so an
/// error body fits on one log line.
fn sanitize_error_body(body: &str) -> String {
    const MAX_LEN: usize = 240;
    let sanitized = body
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match sanitized.char_indices().nth(MAX_LEN) {
        Some((cut, _)) => format!("{}...", &sanitized[..cut]),
        None => sanitized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_url_gains_a_trailing_slash() {
        let config = ExecutorConfig {
            url: Url::parse("http://executor.local:8000/api").unwrap(),
            ..ExecutorConfig::default()
        };
        let executor = HttpExecutor::new(&config).unwrap();
        assert_eq!(
            executor.endpoint("execute").unwrap().as_str(),
            "http://executor.local:8000/api/execute"
        );
    }

    #[test]
    fn default_endpoints() {
        let executor = HttpExecutor::new(&ExecutorConfig::default()).unwrap();
        assert_eq!(
            executor.endpoint("cancel").unwrap().as_str(),
            "http://localhost:8000/cancel"
        );
    }

    #[test]
    fn error_bodies_are_flattened_and_capped() {
        assert_eq!(sanitize_error_body("Invalid\n  command\r\n"), "Invalid command");
        let long = "x".repeat(500);
        let sanitized = sanitize_error_body(&long);
        assert_eq!(sanitized.len(), 243);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn invalid_url_is_a_diagnostic() {
        let err = ExecutorConfig::parse_url("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }
}
