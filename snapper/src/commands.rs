use crate::cli::GlobalOptions;
use crate::config::Config;
use crate::experiment;
use miette::{IntoDiagnostic, Result, WrapErr};
use snapper_remote::HttpExecutor;
use snapper_session::{
    RawModeGuard, RunExit, SessionConfig, SessionController, SessionReport, TerminalSurface,
    stdin_keys,
};
use snapper_shutdown::Shutdown;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code after an interrupted run, as shells report SIGINT.
const INTERRUPTED: i32 = 130;

fn executor(config: &Config) -> Result<Arc<HttpExecutor>> {
    let executor = HttpExecutor::new(&config.executor_config()?)?;
    info!(url = %executor.base_url(), "using executor");
    Ok(Arc::new(executor))
}

fn session_config(config: &Config, options: &GlobalOptions) -> SessionConfig {
    let mut session = config.session_config();
    if let Some(idle_timeout) = options.idle_timeout {
        session.idle_timeout = Some(idle_timeout);
    }
    session
}

/// The interactive terminal. Returns the process exit code.
pub async fn shell(
    config: &Config,
    options: &GlobalOptions,
    shutdown: Arc<Shutdown>,
) -> Result<i32> {
    let executor = executor(config)?;
    let raw = RawModeGuard::new()?;
    let surface = TerminalSurface::stdout(raw.is_raw());

    let results_url = config.results_url.clone();
    let session = session_config(config, options);
    let mut controller = SessionController::new(executor, surface, session)
        .with_shutdown_token(shutdown.cancellation_token())
        .with_completion_hook(move |report: &SessionReport| {
            if let Some(url) = &results_url {
                info!(session = %report.id, %url, "results available");
            }
        });

    let mut keys = stdin_keys();
    let exit = controller.run(&mut keys, shutdown.cancellation_token()).await;
    drop(controller);
    drop(raw);
    println!();

    Ok(match exit {
        RunExit::Shutdown => shutdown.exit_code().unwrap_or(INTERRUPTED),
        RunExit::EndOfInput | RunExit::InputClosed => 0,
    })
}

/// Run one command to completion. 0 Completed, 1 Failed, 130 Canceled.
pub async fn run(
    config: &Config,
    options: &GlobalOptions,
    shutdown: Arc<Shutdown>,
    cmd: &str,
) -> Result<i32> {
    let executor = executor(config)?;
    let report = run_once(config, options, shutdown, executor, cmd).await?;
    Ok(report.exit_code())
}

/// Stage `file` on the executor, then run the experiment command on it.
pub async fn experiment(
    config: &Config,
    options: &GlobalOptions,
    shutdown: Arc<Shutdown>,
    file: &Path,
    name: Option<&str>,
    dataset_folder: Option<String>,
    datasets: Vec<String>,
) -> Result<i32> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read experiment file {}", file.display()))?;
    let experiment_name = experiment::experiment_name(&yaml, name, chrono::Local::now())?;

    let executor = executor(config)?;
    let request = experiment::staging_request(
        yaml,
        experiment_name,
        &config.experiment.folder,
        dataset_folder,
        datasets,
    );
    let staged = executor
        .save_experiment_file(&request)
        .await
        .wrap_err("Failed to stage the experiment")?;
    info!(file = %staged.file_path, "{}", staged.message);

    let cmd = config.experiment_command(&staged.file_path);
    let report = run_once(config, options, shutdown, executor, &cmd).await?;
    Ok(report.exit_code())
}

async fn run_once(
    config: &Config,
    options: &GlobalOptions,
    shutdown: Arc<Shutdown>,
    executor: Arc<HttpExecutor>,
    cmd: &str,
) -> Result<SessionReport> {
    let session = SessionConfig {
        // No prompt between one-shot commands.
        prompt: String::new(),
        ..session_config(config, options)
    };

    let results_url = config.results_url.clone();
    let surface = TerminalSurface::stdout(false);
    let mut controller = SessionController::new(executor, surface, session)
        .with_shutdown_token(shutdown.cancellation_token())
        .with_completion_hook(move |_: &SessionReport| {
            if let Some(url) = &results_url {
                eprintln!("Results: {url}");
            }
        });

    controller.submit(cmd);
    let report = controller
        .wait_for_report()
        .await
        .ok_or_else(|| miette::miette!("Session ended without a report"))?;

    if let Some(reason) = &report.failure {
        warn!(session = %report.id, %reason, "command failed");
    }
    Ok(report)
}

/// Run the executor service until a signal arrives.
pub async fn serve(
    config: &Config,
    shutdown: Arc<Shutdown>,
    bind: Option<SocketAddr>,
    workdir: Option<PathBuf>,
) -> Result<i32> {
    let mut server = config.server_config();
    if let Some(bind) = bind {
        server.bind = bind;
    }
    if let Some(workdir) = workdir {
        server.workdir = workdir;
    }

    snapper_executor::serve(server, shutdown.cancellation_token()).await?;
    Ok(0)
}
