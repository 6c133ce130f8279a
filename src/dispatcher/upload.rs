//! Upload of local files into (optionally) datasets on every usable site.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{ActionDispatcher, ActionReport, ActionTotals};
use crate::config::{UploadConfig, UploadSource};
use crate::pattern::PatternSet;
use crate::source::read_lines;
use crate::storage::UploadRequest;
use crate::types::ActionStatistics;

/// A local file and the dataset it goes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    pub path: PathBuf,
    pub dataset: Option<String>,
}

/// `{dataset: [file paths]}` grouping read from `--dsmap`.
pub type DatasetMap = BTreeMap<String, Vec<String>>;

pub fn load_dataset_map(path: &Path) -> Result<DatasetMap> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse dataset map {}", path.display()))
}

/// Collect the file paths to upload, sorted.
///
/// Directories are expected to hold `<dataset>/<file>`; with `no_datasets`
/// every file below the directory is taken.
pub fn gather_files(source: &UploadSource, no_datasets: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    match source {
        UploadSource::Files(lists) => {
            files.extend(read_lines(lists)?.into_iter().map(PathBuf::from));
        }
        UploadSource::Dirs(dirs) => {
            let min_depth = if no_datasets { 1 } else { 2 };
            for dir in dirs {
                for entry in WalkDir::new(dir).min_depth(min_depth).sort_by_file_name() {
                    let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
                    if entry.file_type().is_file() {
                        files.push(entry.into_path());
                    }
                }
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// The dataset a file belongs to: its `--dsmap` entry, else its parent
/// directory name, else none with `no_datasets`.
pub fn dataset_for(path: &Path, dataset_map: Option<&DatasetMap>, no_datasets: bool) -> Option<String> {
    if let Some(map) = dataset_map {
        let path = path.to_string_lossy();
        return map
            .iter()
            .find(|(_, files)| files.iter().any(|file| *file == path))
            .map(|(dataset, _)| dataset.clone());
    }
    if no_datasets {
        return None;
    }
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
}

/// Files matching `patterns` on their path, or on their dataset name with
/// `filter_datasets`.
pub fn select_uploads(
    files: Vec<PathBuf>,
    upload: &UploadConfig,
    dataset_map: Option<&DatasetMap>,
    patterns: &PatternSet,
) -> Vec<UploadCandidate> {
    files
        .into_iter()
        .filter_map(|path| {
            let dataset = dataset_for(&path, dataset_map, upload.no_datasets);
            let accepted = if upload.filter_datasets {
                dataset.as_deref().is_some_and(|name| patterns.matches_any(name))
            } else {
                patterns.matches_any(&path.to_string_lossy())
            };
            if !accepted {
                debug!(path = %path.display(), dataset = ?dataset, "file not selected for upload.");
                return None;
            }
            Some(UploadCandidate { path, dataset })
        })
        .collect()
}

impl ActionDispatcher {
    /// Upload every selected file to every usable site in every scope.
    pub async fn upload(&self) -> Result<ActionReport> {
        let upload = self
            .config
            .upload
            .as_ref()
            .ok_or_else(|| anyhow!("upload requested without an upload configuration"))?;

        let dataset_map = match &upload.dataset_map {
            Some(path) => Some(load_dataset_map(path)?),
            None => None,
        };
        let files = gather_files(&upload.source, upload.no_datasets)?;
        let candidates = select_uploads(files, upload, dataset_map.as_ref(), &self.config.name_patterns);

        let mut totals = ActionTotals {
            selected: candidates.len() as u64,
            ..ActionTotals::default()
        };
        info!(
            files = candidates.len(),
            scopes = upload.scopes.len(),
            sites = self.usable_sites.len(),
            lifetime = self.config.lifetime_seconds,
            "upload planned."
        );

        for candidate in &candidates {
            for scope in &upload.scopes {
                for site in &self.usable_sites {
                    let request = UploadRequest {
                        path: candidate.path.clone(),
                        rse: site.clone(),
                        scope: scope.clone(),
                        lifetime_seconds: self.config.lifetime_seconds,
                        dataset: candidate.dataset.clone(),
                    };
                    let path = candidate.path.display().to_string();

                    if !self.config.submit {
                        info!(
                            path = path,
                            site = site,
                            scope = scope,
                            dataset = ?candidate.dataset,
                            "would upload file."
                        );
                        totals.processed += 1;
                        continue;
                    }

                    match self.transfer.upload(&request).await {
                        Ok(()) => {
                            info!(path = path, site = site, scope = scope, "file uploaded.");
                            totals.processed += 1;
                            if let Ok(metadata) = fs::metadata(&candidate.path) {
                                totals.bytes += metadata.len();
                                self.send_stats(ActionStatistics::ActionBytes(metadata.len()))
                                    .await;
                            }
                            self.send_stats(ActionStatistics::ActionComplete { did: path }).await;
                        }
                        Err(e) => {
                            warn!(path = path, site = site, scope = scope, error = %e, "upload failed.");
                            totals.failed += 1;
                            self.send_stats(ActionStatistics::ActionError { did: path }).await;
                        }
                    }
                }
            }
        }

        info!(
            files = totals.selected,
            requests = totals.processed,
            failed = totals.failed,
            "upload completed."
        );
        Ok(ActionReport {
            totals,
            ..ActionReport::default()
        })
    }
}
