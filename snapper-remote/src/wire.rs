//! JSON bodies exchanged with the executor service.
//!
//! Shared by the HTTP client and the service so both sides agree on field
//! names, including the camel-cased `yamlContent`.

use serde::{Deserialize, Serialize};

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Older clients send `command`.
    #[serde(default, alias = "command")]
    pub cmd: Option<String>,
}

impl ExecuteRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: Some(cmd.into()),
        }
    }
}

/// Body of every `/cancel` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub status: String,
}

/// Dataset files to link next to a staged experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub folder: String,
    /// Glob patterns, relative to `folder`.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Body of `POST /save_experiment_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveExperimentRequest {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(default, rename = "yamlContent")]
    pub yaml_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveExperimentResponse {
    pub message: String,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn execute_request_accepts_the_legacy_field() {
        let current: ExecuteRequest = serde_json::from_str(r#"{"cmd": "ls"}"#).unwrap();
        let legacy: ExecuteRequest = serde_json::from_str(r#"{"command": "ls"}"#).unwrap();
        let missing: ExecuteRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(current, ExecuteRequest::new("ls"));
        assert_eq!(legacy, ExecuteRequest::new("ls"));
        assert_eq!(missing.cmd, None);
    }

    #[test]
    fn save_request_uses_camel_case_yaml_content() {
        let request = SaveExperimentRequest {
            folder: Some("artifacts/experiments_config".to_string()),
            experiment_name: Some("run".to_string()),
            yaml_content: Some("name: run\n".to_string()),
            dataset: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["yamlContent"], "name: run\n");
        assert!(json.get("dataset").is_none());
    }
}
