//! Staging experiment config files and their datasets.

use crate::error::ExecutorError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use snapper_remote::{DatasetSpec, SaveExperimentRequest, SaveExperimentResponse};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub(crate) const DATASETS_FILE: &str = "datasets.txt";

/// Write `<folder>/<experiment_name>.yaml`, list the matched dataset files in
/// `<folder>/datasets.txt` and symlink each of them into `<folder>`.
pub(crate) fn stage_experiment(
    workdir: &Path,
    request: SaveExperimentRequest,
) -> Result<SaveExperimentResponse, ExecutorError> {
    let yaml_content = request
        .yaml_content
        .filter(|content| !content.is_empty())
        .ok_or(ExecutorError::InvalidData)?;
    let experiment_name = request
        .experiment_name
        .filter(|name| is_plain_file_name(name))
        .ok_or(ExecutorError::InvalidData)?;

    let folder = request.folder.unwrap_or_else(|| ".".to_string());
    let folder_rel = relative_inside(&folder)?;
    let folder_abs = workdir.join(&folder_rel);

    let dataset_files = match &request.dataset {
        Some(dataset) => match_dataset(workdir, dataset)?,
        None => Vec::new(),
    };

    fs::create_dir_all(&folder_abs)?;

    let file_rel = folder_rel.join(format!("{experiment_name}.yaml"));
    fs::write(workdir.join(&file_rel), yaml_content)?;
    fs::write(folder_abs.join(DATASETS_FILE), dataset_listing(&dataset_files))?;

    for file in &dataset_files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let link = folder_abs.join(name);
        if link.symlink_metadata().is_ok() {
            debug!(link = %link.display(), "dataset link already present");
            continue;
        }
        let target = std::path::absolute(workdir.join(file))?;
        std::os::unix::fs::symlink(&target, &link)?;
    }

    info!(
        file = %file_rel.display(),
        datasets = dataset_files.len(),
        "experiment staged"
    );
    Ok(SaveExperimentResponse {
        message: "YAML file created successfully".to_string(),
        file_path: file_rel.display().to_string(),
    })
}

/// Files under `dataset.folder` matching any of its patterns, relative to
/// `workdir` and sorted.
fn match_dataset(workdir: &Path, dataset: &DatasetSpec) -> Result<Vec<PathBuf>, ExecutorError> {
    let base = relative_inside(&dataset.folder)?;
    let patterns = build_patterns(&dataset.files)?;

    let mut matched = Vec::new();
    let root = workdir.join(&base);
    if root.is_dir() {
        collect_matches(&root, Path::new(""), &patterns, &mut matched)?;
    }
    matched.sort();
    Ok(matched.into_iter().map(|rel| base.join(rel)).collect())
}

fn build_patterns(patterns: &[String]) -> Result<GlobSet, ExecutorError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // `*` stays within one path component, like shell globbing.
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| ExecutorError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ExecutorError::Pattern {
        pattern: patterns.join(", "),
        source,
    })
}

fn collect_matches(
    dir: &Path,
    rel: &Path,
    patterns: &GlobSet,
    out: &mut Vec<PathBuf>,
) -> Result<(), ExecutorError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let rel_path = rel.join(entry.file_name());
        if patterns.is_match(&rel_path) {
            out.push(rel_path.clone());
        }
        if entry.file_type()?.is_dir() {
            collect_matches(&entry.path(), &rel_path, patterns, out)?;
        }
    }
    Ok(())
}

/// The listing format snapper-ml reads: `['a.csv', 'b.csv']`.
fn dataset_listing(files: &[PathBuf]) -> String {
    let quoted: Vec<String> = files
        .iter()
        .map(|file| {
            let file = file.display().to_string();
            format!("'{}'", file.replace('\\', "\\\\").replace('\'', "\\'"))
        })
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// `path` as a relative path that cannot leave the working directory.
fn relative_inside(path: &str) -> Result<PathBuf, ExecutorError> {
    let mut clean = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExecutorError::OutsideWorkdir(path.to_string()));
            }
        }
    }
    Ok(clean)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
