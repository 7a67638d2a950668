use chrono::{DateTime, TimeZone};
use miette::{IntoDiagnostic, Result, WrapErr};
use snapper_remote::{DatasetSpec, SaveExperimentRequest};
use std::fmt::Display;

const DEFAULT_NAME: &str = "default_name";

/// Name a staged experiment: `YYYY-MM-DD_HH-MM-SS_<name>`.
///
/// `name` falls back to the config's top-level `name` key, then to
/// `default_name`. The executor appends `.yaml`.
pub fn experiment_name<Tz>(yaml: &str, name: Option<&str>, now: DateTime<Tz>) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let document: serde_yaml::Value = serde_yaml::from_str(yaml)
        .into_diagnostic()
        .wrap_err("Experiment file is not valid YAML")?;

    let name = name
        .map(str::to_string)
        .or_else(|| {
            document
                .get("name")
                .and_then(serde_yaml::Value::as_str)
                .map(str::to_string)
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

    Ok(format!(
        "{}_{}",
        now.format("%Y-%m-%d_%H-%M-%S"),
        sanitize(&name)
    ))
}

/// Keep names usable as a single file name.
fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect()
}

pub fn staging_request(
    yaml: String,
    experiment_name: String,
    folder: &str,
    dataset_folder: Option<String>,
    datasets: Vec<String>,
) -> SaveExperimentRequest {
    SaveExperimentRequest {
        folder: Some(folder.to_string()),
        experiment_name: Some(experiment_name),
        yaml_content: Some(yaml),
        dataset: dataset_folder.map(|folder| DatasetSpec {
            folder,
            files: datasets,
        }),
    }
}
