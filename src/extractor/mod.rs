//! Candidate dataset/container extraction from task records.
//!
//! Extraction walks every record once. Per dataset reference the order is:
//! task-name match, zero-file skip, scope derivation, file-count accounting,
//! rejected-container fast skip, role filter, dedup, identifier pattern and
//! acceptance. Accounting runs before any role or container based skip so the
//! totals used by [`reconcile::FileCountReconciler`] cover both roles.
//!
//! The first dataset of a container to be evaluated decides for the whole
//! container. Membership of the result does not depend on record order.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::pattern::PatternSet;
use crate::types::{DatasetRef, DatasetRole, ScopeDatasetSet, TaskRecord, derive_scope, normalize_name};

mod extractor_properties;
pub mod reconcile;

use reconcile::TaskFileLedger;

/// Result of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub candidates: ScopeDatasetSet,
    pub ledger: TaskFileLedger,
}

#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    task_patterns: PatternSet,
    identifier_patterns: Option<PatternSet>,
    role: DatasetRole,
    container_mode: bool,
    production: bool,
}

impl CandidateExtractor {
    /// `identifier_patterns` of `None` accepts every identifier.
    pub fn new(
        task_patterns: PatternSet,
        identifier_patterns: Option<PatternSet>,
        role: DatasetRole,
        container_mode: bool,
        production: bool,
    ) -> Self {
        Self {
            task_patterns,
            identifier_patterns,
            role,
            container_mode,
            production,
        }
    }

    pub fn extract<'a, I>(&self, records: I) -> Extraction
    where
        I: IntoIterator<Item = &'a TaskRecord>,
    {
        let mut pass = ExtractionPass {
            extractor: self,
            extraction: Extraction::default(),
            rejected_containers: BTreeSet::new(),
        };

        for record in records {
            if !self.task_patterns.matches_any(&record.taskname) {
                trace!(task = record.taskname, "task name matches no pattern.");
                continue;
            }
            for dataset in &record.datasets {
                pass.visit(&record.taskname, dataset);
            }
        }

        debug!(
            candidates = pass.extraction.candidates.len(),
            rejected_containers = pass.rejected_containers.len(),
            "extraction finished."
        );
        pass.extraction
    }
}

struct ExtractionPass<'a> {
    extractor: &'a CandidateExtractor,
    extraction: Extraction,
    rejected_containers: BTreeSet<(String, String)>,
}

impl ExtractionPass<'_> {
    fn visit(&mut self, task: &str, dataset: &DatasetRef) {
        if dataset.finished_files == 0 {
            trace!(task = task, name = dataset.name, "dataset has no finished files.");
            return;
        }

        let (scope, bare_name) = derive_scope(&dataset.name, self.extractor.production);
        let name = normalize_name(&bare_name);

        self.extraction
            .ledger
            .record_files(&scope, task, dataset.role, dataset.finished_files);

        let container = dataset.container.as_deref().map(|container| {
            let (container_scope, container_name) = match container.split_once(crate::types::SCOPE_SEPARATOR) {
                Some((container_scope, container_name)) => (container_scope.to_string(), container_name),
                None => (scope.clone(), container),
            };
            (container_scope, normalize_name(container_name))
        });

        if self.extractor.container_mode
            && container
                .as_ref()
                .is_some_and(|key| self.rejected_containers.contains(key))
        {
            trace!(task = task, name = name, "container already rejected.");
            return;
        }

        if dataset.role != self.extractor.role {
            trace!(task = task, name = name, role = dataset.role.as_str(), "role not selected.");
            return;
        }

        let (candidate_scope, identifier) = if self.extractor.container_mode {
            match container {
                Some(key) => key,
                None => {
                    debug!(task = task, name = name, "dataset has no container.");
                    return;
                }
            }
        } else {
            (scope.clone(), name)
        };

        if self.extraction.candidates.contains(&candidate_scope, &identifier) {
            self.extraction
                .ledger
                .attribute(&scope, task, &candidate_scope, &identifier);
            return;
        }

        if let Some(patterns) = &self.extractor.identifier_patterns {
            if !patterns.matches_any(&identifier) {
                debug!(
                    task = task,
                    scope = candidate_scope,
                    name = identifier,
                    patterns = %patterns,
                    "identifier matches no pattern."
                );
                if self.extractor.container_mode {
                    self.rejected_containers.insert((candidate_scope, identifier));
                }
                return;
            }
        }

        self.extraction.candidates.insert(&candidate_scope, &identifier);
        self.extraction
            .ledger
            .attribute(&scope, task, &candidate_scope, &identifier);
    }
}
