//! Replica path selection for `listfiles`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use fancy_regex::Regex;
use tracing::warn;

use crate::pattern::PatternSet;
use crate::types::FileReplica;

const DAVS_PREFIX: &str = "davs://";
const ROOT_PREFIX: &str = "root://";

static PORT_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r":[0-9]+/").ok());

/// Only XRootD and WebDAV paths can be streamed by the analysis jobs.
pub fn is_streamable(path: &str) -> bool {
    path.contains("davs:") || path.contains("root:")
}

/// `davs://host:1094/path` becomes `root://host/path`.
pub fn rewrite_path(path: &str) -> String {
    let path = match path.strip_prefix(DAVS_PREFIX) {
        Some(rest) => format!("{ROOT_PREFIX}{rest}"),
        None => path.to_string(),
    };
    match PORT_REGEX.as_ref() {
        Some(regex) => regex.replace_all(&path, "/").into_owned(),
        None => path,
    }
}

/// Paths kept for each file of one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetReplicaPaths {
    pub files: BTreeMap<String, BTreeSet<String>>,
    /// Files listed by the catalog that kept no path at all.
    pub dropped: BTreeSet<String>,
}

impl DatasetReplicaPaths {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.files
                .iter()
                .map(|(name, paths)| {
                    (
                        name.clone(),
                        serde_json::Value::Array(
                            paths.iter().cloned().map(serde_json::Value::String).collect(),
                        ),
                    )
                })
                .collect(),
        )
    }
}

/// Keep the available, streamable replica paths on sites matching `sites`
/// (every site when `sites` is empty).
pub fn select_replica_paths(
    dataset: &str,
    replicas: &[FileReplica],
    sites: &PatternSet,
) -> DatasetReplicaPaths {
    let mut selected = DatasetReplicaPaths::default();

    for replica in replicas {
        let mut kept = BTreeSet::new();
        for (site, paths) in &replica.rses {
            if !replica.is_available_on(site) {
                continue;
            }
            if !sites.is_empty() && !sites.matches_any(site) {
                continue;
            }
            if paths.iter().any(|path| !is_streamable(path)) {
                warn!(
                    dataset = dataset,
                    file = replica.name,
                    site = site,
                    "replica not available through davs or root, path skipped."
                );
            }
            kept.extend(
                paths
                    .iter()
                    .filter(|path| is_streamable(path))
                    .map(|path| rewrite_path(path)),
            );
        }

        if kept.is_empty() {
            selected.dropped.insert(replica.name.clone());
        } else {
            selected.files.insert(replica.name.clone(), kept);
        }
    }

    if !selected.dropped.is_empty() {
        warn!(
            dataset = dataset,
            files = ?selected.dropped,
            "files without a usable replica on the requested sites."
        );
    }
    selected
}
