use crate::cli::{TraceFormat, TraceOutput};
use miette::{IntoDiagnostic, Result, WrapErr};
use std::fs::{self, File};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Silent => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Where the interactive shell logs when no output was requested. The
/// terminal is in raw mode, so log lines must not reach it.
pub fn default_shell_log() -> Result<TraceOutput> {
    let dirs = xdg::BaseDirectories::with_prefix("snapper");
    let path = dirs
        .place_state_file("snapper.log")
        .into_diagnostic()
        .wrap_err("Failed to create the snapper state directory")?;
    Ok(TraceOutput::File(path))
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: Level, format: TraceFormat, output: &TraceOutput) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    let (writer, ansi) = make_writer(output)?;
    let layer = match format {
        TraceFormat::Full => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
        TraceFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .pretty()
            .boxed(),
        TraceFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .json()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .into_diagnostic()
        .wrap_err("Failed to install the tracing subscriber")
}

fn make_writer(output: &TraceOutput) -> Result<(BoxMakeWriter, bool)> {
    Ok(match output {
        TraceOutput::Stderr => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
        TraceOutput::Stdout => (BoxMakeWriter::new(io::stdout), io::stdout().is_terminal()),
        TraceOutput::File(path) => {
            let file = open_log_file(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
    })
}

fn open_log_file(path: &PathBuf) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to open trace output {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LevelFilter::from(Level::Silent), LevelFilter::OFF);
        assert_eq!(LevelFilter::from(Level::default()), LevelFilter::INFO);
        assert_eq!(LevelFilter::from(Level::Debug), LevelFilter::DEBUG);
        assert!(Level::Debug > Level::Warn);
    }

    #[test]
    fn file_output_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/snapper.log");
        let (_writer, ansi) = make_writer(&TraceOutput::File(path.clone())).unwrap();
        assert!(!ansi);
        assert!(path.exists());
    }
}
