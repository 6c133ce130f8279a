//! Candidate dataset sources: plain text lists, workload tasks and catalog search.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{SelectionSource, TaskQuery};
use crate::extractor::CandidateExtractor;
use crate::extractor::reconcile::FileCountReconciler;
use crate::pattern::PatternSet;
use crate::storage::{Catalog, TaskSource};
use crate::types::{DidType, ScopeDatasetSet, derive_scope, normalize_name};

/// Read every non-empty, trimmed line of `paths`, in order.
pub fn read_lines(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for path in paths {
        lines.extend(read_file_lines(path)?);
    }
    Ok(lines)
}

fn read_file_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Turn `scope:name` or bare-name lines into a candidate set, keeping names
/// that match one of `name_patterns`.
pub fn datasets_from_lines(lines: &[String], name_patterns: &PatternSet, production: bool) -> ScopeDatasetSet {
    let mut datasets = ScopeDatasetSet::new();
    for line in lines {
        let (scope, name) = derive_scope(line, production);
        let name = normalize_name(&name);
        if !name_patterns.matches_any(&name) {
            debug!(scope = scope, name = name, "listed dataset matches no pattern.");
            continue;
        }
        datasets.insert(&scope, &name);
    }
    datasets
}

/// Dataset candidates from task records of every requested user.
pub async fn datasets_from_tasks(
    task_source: &TaskSource,
    query: &TaskQuery,
    task_patterns: &PatternSet,
    container_mode: bool,
    production: bool,
) -> Result<ScopeDatasetSet> {
    let mut records = Vec::new();
    for user in &query.users {
        let tasks = task_source
            .query_tasks(user, query.days, query.statuses.as_deref())
            .await
            .with_context(|| format!("failed to query tasks of {user}"))?;
        info!(user = user, days = query.days, tasks = tasks.len(), "tasks found.");
        records.extend(tasks);
    }

    let extractor = CandidateExtractor::new(
        task_patterns.clone(),
        query.did_patterns.clone(),
        query.role,
        container_mode,
        production,
    );
    let extraction = extractor.extract(&records);

    if query.match_files {
        return Ok(FileCountReconciler.reconcile(extraction.candidates, &extraction.ledger));
    }
    Ok(extraction.candidates)
}

/// Catalog wildcard equivalent of a name pattern: `.*` becomes `*`, `/` is dropped.
pub fn catalog_wildcard(pattern: &str) -> String {
    pattern.replace(".*", "*").replace('/', "")
}

/// Datasets (or containers) found by searching each scope for each pattern.
pub async fn datasets_from_catalog(
    catalog: &Catalog,
    scopes: &[String],
    name_patterns: &PatternSet,
    container_mode: bool,
) -> Result<ScopeDatasetSet> {
    let did_type = if container_mode {
        DidType::Container
    } else {
        DidType::Dataset
    };

    let mut datasets = ScopeDatasetSet::new();
    for scope in scopes {
        for pattern in name_patterns.iter() {
            let wildcard = catalog_wildcard(pattern.as_str());
            let names = catalog
                .list_dids(scope, &wildcard, did_type)
                .await
                .with_context(|| format!("failed to search {scope} for {wildcard}"))?;

            if names.is_empty() {
                warn!(scope = scope, pattern = pattern.as_str(), "no datasets found.");
                continue;
            }
            debug!(scope = scope, pattern = pattern.as_str(), found = names.len(), "datasets found.");
            for name in names {
                datasets.insert(scope, &normalize_name(&name));
            }
        }
    }
    Ok(datasets)
}

/// Run the configured selection source.
pub async fn select_datasets(
    selection: &SelectionSource,
    name_patterns: &PatternSet,
    container_mode: bool,
    production: bool,
    catalog: &Catalog,
    task_source: &TaskSource,
) -> Result<ScopeDatasetSet> {
    let datasets = match selection {
        SelectionSource::Files { paths } => {
            let lines = read_lines(paths)?;
            datasets_from_lines(&lines, name_patterns, production)
        }
        SelectionSource::Tasks(query) => {
            datasets_from_tasks(task_source, query, name_patterns, container_mode, production).await?
        }
        SelectionSource::Catalog { scopes } => {
            datasets_from_catalog(catalog, scopes, name_patterns, container_mode).await?
        }
    };

    info!(candidates = datasets.len(), "candidate datasets selected.");
    Ok(datasets)
}
