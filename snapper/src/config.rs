//! `snapper.yaml`.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use snapper_executor::ServerConfig;
use snapper_remote::{ClientError, ExecutorConfig};
use snapper_session::{MarkerMode, SessionConfig};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const YAML_CONFIG: &str = "snapper.yaml";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    #[diagnostic(code(snapper::config::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Url(#[from] ClientError),
    #[error("session.prompt must not be empty")]
    #[diagnostic(code(snapper::config::prompt))]
    EmptyPrompt,
    #[error("experiment.command must contain the {{file}} placeholder")]
    #[diagnostic(code(snapper::config::experiment))]
    MissingPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorSection,
    pub session: SessionSection,
    /// Shown after a session completes successfully.
    pub results_url: Option<String>,
    pub experiment: ExperimentSection,
    pub server: ServerSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: ExecutorSection::default(),
            session: SessionSection::default(),
            results_url: Some("http://localhost:5000/#/experiments/1".to_string()),
            experiment: ExperimentSection::default(),
            server: ServerSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub url: String,
    #[serde(with = "duration")]
    pub connect_timeout: Duration,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub prompt: String,
    pub cancel_notice: String,
    pub failure_notice: String,
    #[serde(with = "duration::option")]
    pub idle_timeout: Option<Duration>,
    /// Hold back a trailing partial line that may still become a status
    /// marker instead of decoding every chunk on its own.
    pub carry_partial_marker: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            prompt: defaults.prompt,
            cancel_notice: defaults.cancel_notice,
            failure_notice: defaults.failure_notice,
            idle_timeout: defaults.idle_timeout,
            carry_partial_marker: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSection {
    /// `{file}` is replaced with the staged config path, already quoted.
    pub command: String,
    /// Where configs are staged, relative to the executor's workdir.
    pub folder: String,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            command: "snapper-ml --config_file {file}".to_string(),
            folder: "artifacts/experiments_config".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: SocketAddr,
    pub workdir: PathBuf,
    pub shell: PathBuf,
    pub columns: u16,
    pub lines: u16,
    #[serde(with = "duration")]
    pub kill_grace: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: defaults.bind,
            workdir: defaults.workdir,
            shell: defaults.shell,
            columns: defaults.columns,
            lines: defaults.lines,
            kill_grace: defaults.kill_grace,
        }
    }
}

impl Config {
    /// Load the first config found: `explicit`, `./snapper.yaml`, then
    /// `$XDG_CONFIG_HOME/snapper/snapper.yaml`. Defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let local = PathBuf::from(YAML_CONFIG);
        if local.exists() {
            return Self::load_from(&local);
        }

        let xdg = xdg::BaseDirectories::with_prefix("snapper");
        if let Some(path) = xdg.find_config_file(YAML_CONFIG) {
            return Self::load_from(&path);
        }

        debug!("no {YAML_CONFIG} found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is an empty mapping, not an error.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor_config()?;
        if self.session.prompt.is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }
        if !self.experiment.command.contains("{file}") {
            return Err(ConfigError::MissingPlaceholder);
        }
        Ok(())
    }

    pub fn executor_config(&self) -> Result<ExecutorConfig, ClientError> {
        Ok(ExecutorConfig {
            url: ExecutorConfig::parse_url(&self.executor.url)?,
            connect_timeout: self.executor.connect_timeout,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt: self.session.prompt.clone(),
            cancel_notice: self.session.cancel_notice.clone(),
            failure_notice: self.session.failure_notice.clone(),
            idle_timeout: self.session.idle_timeout,
            marker_mode: if self.session.carry_partial_marker {
                MarkerMode::CarryPartial
            } else {
                MarkerMode::PerChunk
            },
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.server.bind,
            workdir: self.server.workdir.clone(),
            shell: self.server.shell.clone(),
            columns: self.server.columns,
            lines: self.server.lines,
            kill_grace: self.server.kill_grace,
        }
    }

    /// The experiment command for a staged config at `file`. The path is
    /// shell-quoted, as the command runs under `bash -c`.
    pub fn experiment_command(&self, file: &str) -> String {
        let file = shell_escape::unix::escape(Cow::Borrowed(file));
        self.experiment.command.replace("{file}", &file)
    }
}

/// Durations in humantime form, e.g. `"20s"` or `"1m 30s"`.
mod duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert_eq!(Config::parse("{}").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(indoc! {"
            executor:
              url: http://10.0.0.2:8000
            session:
              idle_timeout: 5m
              carry_partial_marker: true
            server:
              kill_grace: 2s
        "})
        .unwrap();

        assert_eq!(config.executor.url, "http://10.0.0.2:8000");
        assert_eq!(config.executor.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.session.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.session.prompt, " $ ");
        assert_eq!(config.server.kill_grace, Duration::from_secs(2));
        assert_eq!(config.server.columns, 134);
        assert_eq!(config.session_config().marker_mode, MarkerMode::CarryPartial);
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(Config::parse("executor:\n  connect_timeout: soon\n").is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let mut config = Config::default();
        config.session.idle_timeout = Some(Duration::from_secs(90));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(Config::parse(&yaml).unwrap(), config);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = Config::default();
        config.executor.url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Url(_))));

        let mut config = Config::default();
        config.session.prompt.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPrompt)));

        let mut config = Config::default();
        config.experiment.command = "snapper-ml".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPlaceholder)
        ));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn load_from_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(YAML_CONFIG);
        std::fs::write(&path, "session: [not, a, mapping]\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains(YAML_CONFIG), "{err}");
        assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let config = Config::parse(include_str!("../snapper.example.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn experiment_command_substitutes_the_file() {
        assert_eq!(
            Config::default().experiment_command("artifacts/experiments_config/a.yaml"),
            "snapper-ml --config_file artifacts/experiments_config/a.yaml"
        );
    }

    #[test]
    fn experiment_command_quotes_shell_characters() {
        let config = Config::default();
        assert_eq!(
            config.experiment_command("configs/my svm; echo pwned.yaml"),
            "snapper-ml --config_file 'configs/my svm; echo pwned.yaml'"
        );
        assert_eq!(
            config.experiment_command("configs/$(id)'s.yaml"),
            r"snapper-ml --config_file 'configs/$(id)'\''s.yaml'"
        );
    }
}
