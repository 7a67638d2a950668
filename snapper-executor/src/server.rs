use crate::config::ServerConfig;
use crate::error::ExecutorError;
use crate::registry::ProcessRegistry;
use crate::{runner, staging};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use snapper_remote::{CancelResponse, ExecuteRequest, SaveExperimentRequest, SaveExperimentResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    registry: ProcessRegistry,
    /// Parent of every command's cancel token.
    shutdown: CancellationToken,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/cancel", post(cancel))
        .route("/save_experiment_file", post(save_experiment_file))
        .with_state(state)
}

/// Bind `config.bind` and serve until `shutdown` is cancelled.
pub async fn serve(config: ServerConfig, shutdown: CancellationToken) -> Result<(), ExecutorError> {
    let addr = config.bind;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ExecutorError::Bind { addr, source })?;
    serve_on(listener, config, shutdown).await
}

/// Serve on an already bound listener. Running commands are stopped when
/// `shutdown` is cancelled.
pub async fn serve_on(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), ExecutorError> {
    let addr = listener.local_addr()?;
    info!(%addr, workdir = %config.workdir.display(), "executor listening");

    let app = router(AppState {
        config: Arc::new(config),
        registry: ProcessRegistry::default(),
        shutdown: shutdown.clone(),
    });
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    info!("executor stopped");
    Ok(())
}

#[instrument(skip_all, fields(client = %client.ip()))]
async fn execute(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Response, ExecutorError> {
    let cmd = match request {
        Ok(Json(ExecuteRequest { cmd: Some(cmd) })) if !cmd.trim().is_empty() => cmd,
        Ok(_) => return Err(ExecutorError::InvalidCommand),
        Err(rejection) => {
            debug!("rejected execute body: {rejection}");
            return Err(ExecutorError::InvalidCommand);
        }
    };

    let output = runner::start(
        &state.config,
        &state.registry,
        &state.shutdown,
        client.ip(),
        &cmd,
    )?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(ReceiverStream::new(output)),
    )
        .into_response())
}

#[instrument(skip_all, fields(client = %client.ip()))]
async fn cancel(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Result<Json<CancelResponse>, ExecutorError> {
    let handle = state
        .registry
        .take(client.ip())
        .ok_or(ExecutorError::NoProcess)?;
    handle.cancel.cancel();
    info!(id = handle.id, "command canceled by client");

    Ok(Json(CancelResponse {
        status: "Process terminated successfully".to_string(),
    }))
}

async fn save_experiment_file(
    State(state): State<AppState>,
    request: Result<Json<SaveExperimentRequest>, JsonRejection>,
) -> Result<Json<SaveExperimentResponse>, ExecutorError> {
    let Json(request) = request.map_err(|rejection| {
        debug!("rejected staging body: {rejection}");
        ExecutorError::InvalidData
    })?;

    let workdir = state.config.workdir.clone();
    let response =
        tokio::task::spawn_blocking(move || staging::stage_experiment(&workdir, request))
            .await??;
    Ok(Json(response))
}
