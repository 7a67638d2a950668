use clap::{Parser, Subcommand, crate_version};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "snapper",
    color = clap::ColorChoice::Auto,
    version,
    about = format!("snapper {}: a terminal for running commands on a snapper executor", crate_version!())
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub global_options: GlobalOptions,
}

#[derive(Clone, Debug, Parser)]
pub struct GlobalOptions {
    #[arg(short, long, global = true, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Silence all logs"
    )]
    pub quiet: bool,

    #[arg(
        short,
        long,
        global = true,
        env = "SNAPPER_CONFIG",
        help = "Path to snapper.yaml."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "SNAPPER_TRACE_FORMAT",
        help = "Configure the output format of traces.",
        default_value_t,
        value_enum
    )]
    pub trace_format: TraceFormat,

    #[arg(
        long,
        global = true,
        env = "SNAPPER_TRACE_OUTPUT",
        help = "Where to write traces (stdout, stderr, or file:<path>)."
    )]
    pub trace_output: Option<TraceOutput>,

    #[arg(
        long,
        global = true,
        env = "SNAPPER_URL",
        help = "Base URL of the executor service."
    )]
    pub url: Option<String>,

    #[arg(
        long,
        global = true,
        value_parser = humantime::parse_duration,
        help = "Cancel a command after this long without output, e.g. 5m."
    )]
    pub idle_timeout: Option<Duration>,
}

impl GlobalOptions {
    pub fn level(&self) -> crate::log::Level {
        if self.verbose {
            crate::log::Level::Debug
        } else if self.quiet {
            crate::log::Level::Silent
        } else {
            crate::log::Level::default()
        }
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    #[command(about = "Open an interactive terminal on the executor (default).")]
    Shell,

    #[command(about = "Run a single command and exit with its outcome.")]
    Run {
        #[arg(num_args = 1.., trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },

    #[command(about = "Stage an experiment config on the executor and run snapper-ml on it.")]
    Experiment {
        #[arg(help = "Experiment YAML file.")]
        file: PathBuf,

        #[arg(long, help = "Experiment name. Defaults to the `name` key of the file.")]
        name: Option<String>,

        #[arg(
            long,
            value_name = "DIR",
            help = "Folder with the experiment's datasets, relative to the executor's workdir."
        )]
        dataset_folder: Option<String>,

        #[arg(
            long = "dataset",
            value_name = "GLOB",
            requires = "dataset_folder",
            help = "Dataset files to link next to the config. Repeatable."
        )]
        datasets: Vec<String>,
    },

    #[command(about = "Run the executor service.")]
    Serve {
        #[arg(long, help = "Address to listen on.")]
        bind: Option<SocketAddr>,

        #[arg(long, help = "Directory commands run in.")]
        workdir: Option<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TraceFormat {
    /// A verbose structured log format (default).
    #[default]
    Full,
    /// A JSON log format used for machine consumption.
    Json,
    /// A pretty human-readable log format used for debugging.
    Pretty,
}

/// Specifies where trace output should be written.
///
/// Accepts the following formats:
/// - `stdout` - write to standard output
/// - `stderr` - write to standard error
/// - `file:/path/to/file` - write to the specified file path
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TraceOutput {
    #[default]
    Stderr,
    Stdout,
    File(PathBuf),
}

impl FromStr for TraceOutput {
    type Err = ParseTraceOutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(TraceOutput::Stderr),
            "stdout" => Ok(TraceOutput::Stdout),
            s if s.starts_with("file:") && s.len() > 5 => {
                Ok(TraceOutput::File(PathBuf::from(&s[5..])))
            }
            _ => Err(ParseTraceOutputError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseTraceOutputError {
    #[error("unsupported trace output format '{0}', expected 'stdout', 'stderr', or 'file:<path>'")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_trace_outputs() {
        assert_eq!("stderr".parse(), Ok(TraceOutput::Stderr));
        assert_eq!("stdout".parse(), Ok(TraceOutput::Stdout));
        assert_eq!(
            "file:/tmp/snapper.log".parse(),
            Ok(TraceOutput::File(PathBuf::from("/tmp/snapper.log")))
        );
        assert!("file:".parse::<TraceOutput>().is_err());
        assert!("syslog".parse::<TraceOutput>().is_err());
    }

    #[test]
    fn run_collects_trailing_arguments() {
        let cli = Cli::try_parse_from(["snapper", "run", "ls", "-la", "/tmp"]).unwrap();
        match cli.command {
            Some(Commands::Run { cmd }) => assert_eq!(cmd, ["ls", "-la", "/tmp"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_overrides_apply_to_subcommands() {
        let cli = Cli::try_parse_from([
            "snapper",
            "experiment",
            "svm.yaml",
            "--url",
            "http://10.0.0.2:8000",
            "--idle-timeout",
            "90s",
        ])
        .unwrap();
        assert_eq!(
            cli.global_options.url.as_deref(),
            Some("http://10.0.0.2:8000")
        );
        assert_eq!(
            cli.global_options.idle_timeout,
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn no_subcommand_means_shell() {
        let cli = Cli::try_parse_from(["snapper", "-v"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.global_options.level(), crate::log::Level::Debug);
    }

    #[test]
    fn datasets_need_a_folder() {
        assert!(
            Cli::try_parse_from(["snapper", "experiment", "a.yaml", "--dataset", "*.csv"]).is_err()
        );
    }
}
