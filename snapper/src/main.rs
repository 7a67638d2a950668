mod cli;
mod commands;
mod config;
mod experiment;
mod log;

use clap::Parser;
use cli::{Cli, Commands, TraceOutput};
use config::Config;
use miette::{IntoDiagnostic, Result};
use snapper_shutdown::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = cli.global_options;
    let command = cli.command.unwrap_or(Commands::Shell);

    let trace_output = match (&options.trace_output, &command) {
        (Some(output), _) => output.clone(),
        (None, Commands::Shell) => log::default_shell_log()?,
        (None, _) => TraceOutput::Stderr,
    };
    log::init_tracing(options.level(), options.trace_format, &trace_output)?;

    let mut config = Config::load(options.config.as_deref())?;
    if let Some(url) = &options.url {
        config.executor.url = url.clone();
    }
    config.validate()?;

    let shutdown = Shutdown::new();
    shutdown.set_pre_exit_hook(snapper_session::restore_terminal);
    shutdown.install_signals().into_diagnostic()?;

    let code = match command {
        Commands::Shell => commands::shell(&config, &options, shutdown.clone()).await?,
        Commands::Run { cmd } => {
            commands::run(&config, &options, shutdown.clone(), &cmd.join(" ")).await?
        }
        Commands::Experiment {
            file,
            name,
            dataset_folder,
            datasets,
        } => {
            commands::experiment(
                &config,
                &options,
                shutdown.clone(),
                &file,
                name.as_deref(),
                dataset_folder,
                datasets,
            )
            .await?
        }
        Commands::Serve { bind, workdir } => {
            commands::serve(&config, shutdown.clone(), bind, workdir).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
