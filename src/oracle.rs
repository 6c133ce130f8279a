//! Yes/no questions about what the catalog already holds for a dataset.
//!
//! Answers are cached per DID for the lifetime of one oracle, so a single
//! pipeline run sees one consistent snapshot of rules, rule history and
//! replicas no matter how many patterns are evaluated against them.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::config::ReplicaListingRetryConfig;
use crate::pattern::Pattern;
use crate::storage::{Catalog, CatalogResult, list_replicas_with_retry};
use crate::types::{Did, FileReplica, ReplicationRule, RuleHistoryEntry};

pub struct ExistingStateOracle {
    catalog: Catalog,
    retry_config: ReplicaListingRetryConfig,
    rules: HashMap<Did, Vec<ReplicationRule>>,
    history: HashMap<Did, Vec<RuleHistoryEntry>>,
    replicas: HashMap<Did, Vec<FileReplica>>,
}

impl ExistingStateOracle {
    pub fn new(catalog: Catalog, retry_config: ReplicaListingRetryConfig) -> Self {
        Self {
            catalog,
            retry_config,
            rules: HashMap::new(),
            history: HashMap::new(),
            replicas: HashMap::new(),
        }
    }

    /// Active rules of `did` from the run snapshot.
    pub async fn active_rules(&mut self, did: &Did) -> CatalogResult<&[ReplicationRule]> {
        if !self.rules.contains_key(did) {
            let rules = self.catalog.list_did_rules(did).await?;
            trace!(did = %did, rules = rules.len(), "active rules cached.");
            self.rules.insert(did.clone(), rules);
        }
        Ok(self.rules.get(did).map(Vec::as_slice).unwrap_or_default())
    }

    async fn rule_history(&mut self, did: &Did) -> CatalogResult<&[RuleHistoryEntry]> {
        if !self.history.contains_key(did) {
            let history = self.catalog.list_rule_history(did).await?;
            trace!(did = %did, entries = history.len(), "rule history cached.");
            self.history.insert(did.clone(), history);
        }
        Ok(self.history.get(did).map(Vec::as_slice).unwrap_or_default())
    }

    /// File replicas of `did`, listed with the replica retry policy.
    pub async fn replicas(&mut self, did: &Did) -> CatalogResult<&[FileReplica]> {
        if !self.replicas.contains_key(did) {
            let replicas = list_replicas_with_retry(&self.catalog, did, &self.retry_config).await?;
            trace!(did = %did, files = replicas.len(), "replicas cached.");
            self.replicas.insert(did.clone(), replicas);
        }
        Ok(self.replicas.get(did).map(Vec::as_slice).unwrap_or_default())
    }

    /// Some active rule of `did` has a site expression matching `site`.
    pub async fn has_active_rule(&mut self, did: &Did, site: &Pattern) -> CatalogResult<bool> {
        let found = self
            .active_rules(did)
            .await?
            .iter()
            .any(|rule| site.matches(&rule.rse_expression));
        debug!(did = %did, site = site.as_str(), found = found, "active rule check.");
        Ok(found)
    }

    /// Every file of `did` has an available replica on a site matching `site`.
    ///
    /// A dataset without files satisfies this for any pattern.
    pub async fn has_full_replica(&mut self, did: &Did, site: &Pattern) -> CatalogResult<bool> {
        let replicas = self.replicas(did).await?;
        if replicas.is_empty() {
            debug!(did = %did, site = site.as_str(), "no files listed, full replica holds vacuously.");
            return Ok(true);
        }

        let complete = replicas.iter().all(|replica| {
            replica
                .rses
                .keys()
                .any(|rse| site.matches(rse) && replica.is_available_on(rse))
        });
        debug!(did = %did, site = site.as_str(), complete = complete, "full replica check.");
        Ok(complete)
    }

    /// Some rule ever placed on `did`, expired or deleted ones included,
    /// matches `site`.
    pub async fn has_ever_had_rule(&mut self, did: &Did, site: &Pattern) -> CatalogResult<bool> {
        let found = self
            .rule_history(did)
            .await?
            .iter()
            .any(|entry| site.matches(&entry.rse_expression));
        debug!(did = %did, site = site.as_str(), found = found, "rule history check.");
        Ok(found)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
