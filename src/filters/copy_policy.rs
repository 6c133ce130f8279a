use std::fmt;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::config::CopyRequirement;
use crate::filters::ExclusionList;
use crate::oracle::ExistingStateOracle;
use crate::pattern::{Pattern, PatternSet};
use crate::storage::CatalogResult;
use crate::types::error::CatalogError;
use crate::types::{Did, DidMetadata, DidType, ScopeDatasetSet};

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Excluded,
    /// Already has an active rule on every site it must not have one on.
    RuleOnEverySite,
    NotFound(String),
    /// Some rule, past or present, matched this pattern.
    RuleHistory(String),
    /// `replica_exists` is `None` when the replica check was skipped because
    /// the rule check alone decided the outcome.
    RequirementNotMet {
        rule_exists: bool,
        replica_exists: Option<bool>,
        or_mode: bool,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Excluded => f.write_str("listed in an exclusion file"),
            RejectReason::RuleOnEverySite => {
                f.write_str("already has a rule on every site it must not have a rule on")
            }
            RejectReason::NotFound(detail) => write!(f, "not found in the catalog ({detail})"),
            RejectReason::RuleHistory(site) => write!(f, "has had a rule on {site}"),
            RejectReason::RequirementNotMet {
                rule_exists,
                replica_exists,
                or_mode,
            } => {
                let replica = match replica_exists {
                    Some(exists) => exists.to_string(),
                    None => "not checked".to_string(),
                };
                write!(
                    f,
                    "existing rule/replica requirement not met (rule: {rule_exists}, replica: {replica}, {})",
                    if *or_mode { "either" } else { "both" }
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Applies a [`CopyRequirement`] and an [`ExclusionList`] to candidates.
///
/// Every oracle predicate short-circuits, so the number of catalog calls
/// depends on the answers, never the verdict.
pub struct CopyPolicyFilter<'a> {
    requirement: &'a CopyRequirement,
    exclusions: &'a ExclusionList,
    must_not_have_rule_on: Option<&'a PatternSet>,
}

impl<'a> CopyPolicyFilter<'a> {
    pub fn new(requirement: &'a CopyRequirement, exclusions: &'a ExclusionList) -> Self {
        Self {
            requirement,
            exclusions,
            must_not_have_rule_on: None,
        }
    }

    /// Drop datasets that already have an active rule on every one of `sites`.
    pub fn with_must_not_have_rule_on(mut self, sites: &'a PatternSet) -> Self {
        self.must_not_have_rule_on = Some(sites);
        self
    }

    /// Filter every candidate; only non not-found catalog failures abort.
    pub async fn filter(
        &self,
        candidates: &ScopeDatasetSet,
        oracle: &mut ExistingStateOracle,
    ) -> Result<ScopeDatasetSet> {
        let mut approved = ScopeDatasetSet::new();

        for (scope, name) in candidates.pairs() {
            let did = Did::new(scope, name);
            let verdict = match self.evaluate(&did, oracle).await {
                Ok(verdict) => verdict,
                Err(CatalogError::NotFound(detail)) => Verdict::Reject(RejectReason::NotFound(detail)),
                Err(e) => return Err(anyhow!(e).context(format!("failed to evaluate {did}"))),
            };

            match verdict {
                Verdict::Accept => {
                    debug!(did = %did, "dataset approved.");
                    approved.insert(scope, name);
                }
                Verdict::Reject(reason) => {
                    warn!(scope = scope, name = name, reason = %reason, "dataset skipped.");
                }
            }
        }

        info!(
            candidates = candidates.len(),
            approved = approved.len(),
            "copy policy applied."
        );
        Ok(approved)
    }

    /// Decide for a single dataset.
    pub async fn evaluate(&self, did: &Did, oracle: &mut ExistingStateOracle) -> CatalogResult<Verdict> {
        if self.exclusions.contains(&did.name) {
            return Ok(Verdict::Reject(RejectReason::Excluded));
        }

        if let Some(sites) = self.must_not_have_rule_on {
            if self.has_rule_on_every_site(did, sites, oracle).await? {
                return Ok(Verdict::Reject(RejectReason::RuleOnEverySite));
            }
        }

        let metadata = oracle.catalog().get_metadata(did).await?;
        let parent = self.fallback_parent(did, &metadata);

        if let Some(sites) = self.requirement.no_rule_history_sites() {
            for site in sites.iter() {
                if !self.no_history_on(did, parent.as_ref(), site, oracle).await? {
                    return Ok(Verdict::Reject(RejectReason::RuleHistory(site.to_string())));
                }
            }
        }

        let or_mode = self.requirement.or_mode();
        let rule_exists = match self.requirement.rule_sites() {
            None => true,
            Some(sites) => self.any_site_has_rule(did, parent.as_ref(), sites, oracle).await?,
        };

        // Replica listing is the costly call; skip it once the outcome is fixed.
        let replica_exists = match self.requirement.replica_sites() {
            None => Some(true),
            Some(_) if or_mode == rule_exists => None,
            Some(sites) => Some(self.any_site_has_replica(did, parent.as_ref(), sites, oracle).await?),
        };

        let satisfied = match replica_exists {
            Some(replica_exists) if or_mode => rule_exists || replica_exists,
            Some(replica_exists) => rule_exists && replica_exists,
            None => rule_exists,
        };

        if satisfied {
            Ok(Verdict::Accept)
        } else {
            Ok(Verdict::Reject(RejectReason::RequirementNotMet {
                rule_exists,
                replica_exists,
                or_mode,
            }))
        }
    }

    /// The parent container, when container fallback applies to `did`.
    fn fallback_parent(&self, did: &Did, metadata: &DidMetadata) -> Option<Did> {
        if !self.requirement.container_fallback() || metadata.did_type != DidType::Dataset {
            return None;
        }
        metadata
            .parent
            .as_deref()
            .map(|parent| Did::new(&did.scope, parent))
    }

    async fn has_rule_on_every_site(
        &self,
        did: &Did,
        sites: &PatternSet,
        oracle: &mut ExistingStateOracle,
    ) -> CatalogResult<bool> {
        let mut remaining = 0;
        for site in sites.iter() {
            if oracle.has_active_rule(did, site).await? {
                debug!(did = %did, site = site.as_str(), "dataset already has a rule on site.");
            } else {
                remaining += 1;
            }
        }
        Ok(remaining == 0)
    }

    async fn any_site_has_rule(
        &self,
        did: &Did,
        parent: Option<&Did>,
        sites: &PatternSet,
        oracle: &mut ExistingStateOracle,
    ) -> CatalogResult<bool> {
        for site in sites.iter() {
            if oracle.has_active_rule(did, site).await? {
                return Ok(true);
            }
            if let Some(parent) = parent {
                if oracle.has_active_rule(parent, site).await? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn any_site_has_replica(
        &self,
        did: &Did,
        parent: Option<&Did>,
        sites: &PatternSet,
        oracle: &mut ExistingStateOracle,
    ) -> CatalogResult<bool> {
        for site in sites.iter() {
            if oracle.has_full_replica(did, site).await? {
                return Ok(true);
            }
            if let Some(parent) = parent {
                if oracle.has_full_replica(parent, site).await? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn no_history_on(
        &self,
        did: &Did,
        parent: Option<&Did>,
        site: &Pattern,
        oracle: &mut ExistingStateOracle,
    ) -> CatalogResult<bool> {
        if !oracle.has_ever_had_rule(did, site).await? {
            return Ok(true);
        }
        match parent {
            Some(parent) => Ok(!oracle.has_ever_had_rule(parent, site).await?),
            None => Ok(false),
        }
    }
}
