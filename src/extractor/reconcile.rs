//! Per-task input/output file accounting and the consistency pass built on it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::types::{DatasetRole, ScopeDatasetSet};

/// Finished-file totals of one task in one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTotals {
    pub input: u64,
    pub output: u64,
}

impl FileTotals {
    pub fn is_consistent(&self) -> bool {
        self.input == self.output
    }
}

/// Accumulated during extraction: file totals and attributed identifiers,
/// both keyed by `(dataset scope, task name)`.
///
/// An attributed identifier carries its own scope, which differs from the
/// dataset scope when a container is scope-qualified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFileLedger {
    totals: BTreeMap<(String, String), FileTotals>,
    attributions: BTreeMap<(String, String), BTreeSet<(String, String)>>,
}

impl TaskFileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add finished files of one dataset. Roles other than input/output are
    /// not counted.
    pub fn record_files(&mut self, scope: &str, task: &str, role: DatasetRole, files: u64) {
        let totals = self
            .totals
            .entry((scope.to_string(), task.to_string()))
            .or_default();
        match role {
            DatasetRole::Input => totals.input += files,
            DatasetRole::Output => totals.output += files,
            DatasetRole::Other => {}
        }
    }

    /// Remember that `task`, through a dataset of `scope`, nominated
    /// `identifier` in `candidate_scope`.
    pub fn attribute(&mut self, scope: &str, task: &str, candidate_scope: &str, identifier: &str) {
        self.attributions
            .entry((scope.to_string(), task.to_string()))
            .or_default()
            .insert((candidate_scope.to_string(), identifier.to_string()));
    }

    pub fn totals(&self, scope: &str, task: &str) -> Option<FileTotals> {
        self.totals
            .get(&(scope.to_string(), task.to_string()))
            .copied()
    }

    /// `(candidate scope, identifier)` pairs nominated by `task` in `scope`.
    pub fn attributed(&self, scope: &str, task: &str) -> Option<&BTreeSet<(String, String)>> {
        self.attributions.get(&(scope.to_string(), task.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.attributions.is_empty()
    }
}

/// Drops every identifier attributed to a task whose input and output
/// totals differ.
///
/// Rejection is per `(scope, identifier)`: an identifier also nominated by a
/// consistent task is dropped all the same.
#[derive(Debug, Default)]
pub struct FileCountReconciler;

impl FileCountReconciler {
    pub fn reconcile(&self, mut candidates: ScopeDatasetSet, ledger: &TaskFileLedger) -> ScopeDatasetSet {
        for ((scope, task), totals) in &ledger.totals {
            if totals.is_consistent() {
                continue;
            }

            warn!(
                scope = scope,
                task = task,
                input_files = totals.input,
                output_files = totals.output,
                "task has different numbers of input and output files."
            );

            let Some(identifiers) = ledger.attributed(scope, task) else {
                continue;
            };
            for (candidate_scope, identifier) in identifiers {
                if candidates.remove(candidate_scope, identifier) {
                    warn!(
                        scope = candidate_scope,
                        name = identifier,
                        task = task,
                        "dataset skipped: its task file counts do not match."
                    );
                }
            }
        }
        candidates
    }
}
