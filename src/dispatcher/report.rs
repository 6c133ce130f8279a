//! Monitoring files and the run summary.
//!
//! Every run that acts on datasets writes, in the output directory:
//!
//! - `monit_{action}_dids_{ts}.txt`: one acted-upon dataset per line,
//! - `monit_{action}_ruleids_{ts}.txt`: the rule id of the same line, kept
//!   only when the run submitted anything,
//! - `monit_listfiles_replicas_{ts}.txt`: per-dataset replica paths (listfiles),
//! - `{action}_summary_{ts}.json`: `{dataset: {site: {"ruleid": id}}}`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Action;
use crate::types::{ActionSummary, RuleLockStatus, RuleRecord};

/// Timestamp embedded in every artifact name of one run.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionTotals {
    /// Datasets, files or rule ids the action started from.
    pub selected: u64,
    /// Dataset/site pairs (or files, rules) acted upon.
    pub processed: u64,
    pub failed: u64,
    /// Datasets skipped during dispatch.
    pub skipped: u64,
    pub bytes: u64,
}

/// Paths of the artifacts a run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dids: Option<PathBuf>,
    pub rule_ids: Option<PathBuf>,
    pub replicas: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

/// Outcome of a dispatched action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    pub totals: ActionTotals,
    pub summary: ActionSummary,
    pub artifacts: ArtifactPaths,
    /// Rule progress reported by `monitor`.
    pub lock_status: Vec<RuleLockStatus>,
}

/// Writers for the paired dataset / rule-id monitoring files.
pub struct MonitoringFiles {
    dids_path: PathBuf,
    rule_ids_path: PathBuf,
    replicas_path: Option<PathBuf>,
    summary_path: PathBuf,
    dids: BufWriter<File>,
    rule_ids: BufWriter<File>,
    replicas: Option<BufWriter<File>>,
}

impl MonitoringFiles {
    /// Create the files for `action` in `outdir`, creating the directory if needed.
    pub fn create(outdir: &Path, action: Action, timestamp: &str) -> Result<Self> {
        fs::create_dir_all(outdir)
            .with_context(|| format!("failed to create output directory {}", outdir.display()))?;

        let action_name = action.as_str();
        let dids_path = outdir.join(format!("monit_{action_name}_dids_{timestamp}.txt"));
        let rule_ids_path = outdir.join(format!("monit_{action_name}_ruleids_{timestamp}.txt"));
        let summary_path = outdir.join(format!("{action_name}_summary_{timestamp}.json"));
        let replicas_path = (action == Action::Listfiles)
            .then(|| outdir.join(format!("monit_listfiles_replicas_{timestamp}.txt")));

        let replicas = match &replicas_path {
            Some(path) => Some(create_writer(path)?),
            None => None,
        };

        debug!(dids = %dids_path.display(), rule_ids = %rule_ids_path.display(), "monitoring files created.");
        Ok(Self {
            dids: create_writer(&dids_path)?,
            rule_ids: create_writer(&rule_ids_path)?,
            dids_path,
            rule_ids_path,
            replicas_path,
            summary_path,
            replicas,
        })
    }

    /// Append one dataset and its paired rule id.
    pub fn record(&mut self, dataset: &str, rule_id: &str) -> Result<()> {
        writeln!(self.dids, "{dataset}")
            .with_context(|| format!("failed to write {}", self.dids_path.display()))?;
        writeln!(self.rule_ids, "{rule_id}")
            .with_context(|| format!("failed to write {}", self.rule_ids_path.display()))?;
        Ok(())
    }

    /// Append one dataset's `{file: [paths]}` object to the replicas file.
    pub fn record_replicas(&mut self, replicas: &serde_json::Value) -> Result<()> {
        let (Some(writer), Some(path)) = (self.replicas.as_mut(), self.replicas_path.as_ref()) else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, replicas)
            .with_context(|| format!("failed to write {}", path.display()))?;
        writeln!(writer).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Flush everything, write the summary and drop the rule-id file of an
    /// unsubmitted run.
    pub fn finish(mut self, summary: &ActionSummary, submitted: bool) -> Result<ArtifactPaths> {
        self.dids.flush()?;
        self.rule_ids.flush()?;
        if let Some(replicas) = self.replicas.as_mut() {
            replicas.flush()?;
        }

        let summary_file = create_writer(&self.summary_path)?;
        serde_json::to_writer_pretty(summary_file, summary)
            .with_context(|| format!("failed to write {}", self.summary_path.display()))?;

        let rule_ids = if submitted {
            Some(self.rule_ids_path.clone())
        } else {
            drop(self.rule_ids);
            fs::remove_file(&self.rule_ids_path)
                .with_context(|| format!("failed to remove {}", self.rule_ids_path.display()))?;
            None
        };

        info!(
            dids = %self.dids_path.display(),
            summary = %self.summary_path.display(),
            "monitoring files written."
        );
        Ok(ArtifactPaths {
            dids: Some(self.dids_path),
            rule_ids,
            replicas: self.replicas_path,
            summary: Some(self.summary_path),
        })
    }
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Record `rule_id` for `dataset` on `site` in the summary.
pub fn add_to_summary(summary: &mut ActionSummary, dataset: &str, site: &str, rule_id: &str) {
    summary.entry(dataset.to_string()).or_default().insert(
        site.to_string(),
        RuleRecord {
            ruleid: rule_id.to_string(),
        },
    );
}
