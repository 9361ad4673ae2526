//! Reading grid snapshots and profile records from JSON files
//!
//! Snapshots are the already-parsed output of the forecast fetcher: one
//! `GridDataset` object, or an array of them, per file. Validation runs
//! through the same constructors as in-memory data.

use crate::grid::GridDataset;
use crate::profile::UserProfile;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn read_json_records<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} file: {}", what, path.display()))?;
    let records: OneOrMany<T> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {} file: {}", what, path.display()))?;
    Ok(records.into_vec())
}

/// JSON files under `path`: the file itself, or a directory's `*.json` entries sorted by name
pub fn json_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("failed to read directory: {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read directory: {}", path.display()))?;
        let file = entry.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every grid snapshot under `path`
pub fn load_datasets(path: &Path) -> Result<Vec<GridDataset>> {
    let mut datasets = Vec::new();
    for file in json_files(path)? {
        let loaded: Vec<GridDataset> = read_json_records(&file, "grid snapshot")?;
        debug!(file = %file.display(), grids = loaded.len(), "loaded grid snapshot");
        datasets.extend(loaded);
    }
    if datasets.is_empty() {
        anyhow::bail!("no grid snapshots found in {}", path.display());
    }
    Ok(datasets)
}

/// Load every profile record under `path`
pub fn load_profiles(path: &Path) -> Result<Vec<UserProfile>> {
    let mut profiles = Vec::new();
    for file in json_files(path)? {
        profiles.extend(read_json_records::<UserProfile>(&file, "profile")?);
    }
    Ok(profiles)
}
