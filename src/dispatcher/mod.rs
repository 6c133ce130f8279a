//! Execution of the requested action on the approved datasets.
//!
//! Datasets are visited scope by scope in name order. Every dataset is sized
//! first; a dataset the catalog no longer knows is skipped with a warning.
//! Nothing is submitted to the catalog or the transfer client unless the run
//! was started with `--submit`.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{Action, Config};
use crate::oracle::ExistingStateOracle;
use crate::pattern::Pattern;
use crate::storage::{Catalog, DownloadRequest, Transfer};
use crate::types::error::CatalogError;
use crate::types::{ActionStatistics, ActionSummary, Did, NOT_SUBMITTED, ReplicationRule, ScopeDatasetSet};

pub mod monitor;
pub mod replicas;
pub mod report;
pub mod upload;

use replicas::select_replica_paths;
pub use report::{ActionReport, ActionTotals, ArtifactPaths, MonitoringFiles};

pub struct ActionDispatcher {
    config: Config,
    catalog: Catalog,
    transfer: Transfer,
    usable_sites: BTreeSet<String>,
    stats_sender: Sender<ActionStatistics>,
}

/// Running state of one dispatch.
struct DispatchRun {
    totals: ActionTotals,
    summary: ActionSummary,
    files: MonitoringFiles,
}

impl ActionDispatcher {
    pub fn new(
        config: Config,
        catalog: Catalog,
        transfer: Transfer,
        usable_sites: BTreeSet<String>,
        stats_sender: Sender<ActionStatistics>,
    ) -> Self {
        Self {
            config,
            catalog,
            transfer,
            usable_sites,
            stats_sender,
        }
    }

    /// Run a selection-driven action over `datasets` and write the
    /// monitoring files stamped with `timestamp`.
    pub async fn dispatch(
        &self,
        datasets: &ScopeDatasetSet,
        oracle: &mut ExistingStateOracle,
        timestamp: &str,
    ) -> Result<ActionReport> {
        let action = self.config.action;
        if !action.is_selection_driven() {
            return Err(anyhow!(
                "action {} is not driven by dataset selection",
                action.as_str()
            ));
        }

        let mut run = DispatchRun {
            totals: ActionTotals {
                selected: datasets.len() as u64,
                ..ActionTotals::default()
            },
            summary: ActionSummary::new(),
            files: MonitoringFiles::create(&self.config.outdir, action, timestamp)?,
        };
        let download_site = self.download_site();

        for (scope, name) in datasets.pairs() {
            let did = Did::new(scope, name);

            let bytes = match self.dataset_size(&did).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    warn!(did = %did, "dataset not found in the catalog, skipped.");
                    run.totals.skipped += 1;
                    self.send_stats(ActionStatistics::ActionSkip { did: did.to_string() }).await;
                    continue;
                }
                Err(e) => {
                    return Err(anyhow!(e).context(format!("failed to list files of {did}")));
                }
            };
            run.totals.bytes += bytes;
            self.send_stats(ActionStatistics::ActionBytes(bytes)).await;

            let output_name = self.output_name(&did);
            match action {
                Action::Find => self.find(&mut run, &did, &output_name).await?,
                Action::Replicate => self.replicate(&mut run, &did, &output_name, oracle).await?,
                Action::Delete | Action::Update => {
                    self.change_rules(&mut run, &did, &output_name, oracle).await?
                }
                Action::Download => {
                    self.download(&mut run, &did, &output_name, download_site.as_deref())
                        .await?
                }
                Action::Listfiles => self.list_files(&mut run, &did, &output_name, oracle).await?,
                Action::Upload | Action::Monitor => {
                    return Err(anyhow!("action {} cannot be dispatched per dataset", action.as_str()));
                }
            }
        }

        let rules_submitted =
            self.config.submit && matches!(action, Action::Replicate | Action::Delete | Action::Update);
        let artifacts = run.files.finish(&run.summary, rules_submitted)?;

        info!(
            action = action.as_str(),
            submitted = self.config.submit,
            selected = run.totals.selected,
            processed = run.totals.processed,
            failed = run.totals.failed,
            skipped = run.totals.skipped,
            bytes = run.totals.bytes,
            "dispatch completed."
        );
        Ok(ActionReport {
            totals: run.totals,
            summary: run.summary,
            artifacts,
            lock_status: Vec::new(),
        })
    }

    async fn dataset_size(&self, did: &Did) -> Result<u64, CatalogError> {
        let files = self.catalog.list_files(did).await?;
        Ok(files.iter().map(|file| file.bytes).sum())
    }

    fn output_name(&self, did: &Did) -> String {
        if self.config.no_scope_in_output {
            did.name.clone()
        } else {
            did.to_string()
        }
    }

    /// The only usable site, if there is exactly one.
    fn download_site(&self) -> Option<String> {
        match self.usable_sites.len() {
            0 => None,
            1 => self.usable_sites.iter().next().cloned(),
            count => {
                warn!(
                    sites = count,
                    "several sites resolved, downloads will let the client choose the source."
                );
                None
            }
        }
    }

    async fn send_stats(&self, stats: ActionStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    async fn complete(&self, run: &mut DispatchRun, output_name: &str, rule_id: &str) -> Result<()> {
        run.files.record(output_name, rule_id)?;
        run.totals.processed += 1;
        self.send_stats(ActionStatistics::ActionComplete {
            did: output_name.to_string(),
        })
        .await;
        Ok(())
    }

    async fn find(&self, run: &mut DispatchRun, did: &Did, output_name: &str) -> Result<()> {
        debug!(did = %did, "dataset found.");
        run.summary.entry(output_name.to_string()).or_default();
        self.complete(run, output_name, NOT_SUBMITTED).await
    }

    async fn replicate(
        &self,
        run: &mut DispatchRun,
        did: &Did,
        output_name: &str,
        oracle: &mut ExistingStateOracle,
    ) -> Result<()> {
        for site in &self.usable_sites {
            let pattern = Pattern::exact(site)?;
            match oracle.has_active_rule(did, &pattern).await {
                Ok(true) => {
                    warn!(did = %did, site = site, "dataset already has a rule on this site, skipped.");
                    self.send_stats(ActionStatistics::ActionWarning { did: did.to_string() }).await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(did = %did, site = site, error = %e, "failed to list rules, pair skipped.");
                    run.totals.failed += 1;
                    self.send_stats(ActionStatistics::ActionError { did: did.to_string() }).await;
                    continue;
                }
            }

            let rule_id = if self.config.submit {
                match self
                    .catalog
                    .create_rule(did, site, self.config.lifetime_seconds)
                    .await
                {
                    Ok(rule_id) => {
                        info!(did = %did, site = site, rule_id = rule_id, "rule created.");
                        rule_id
                    }
                    Err(e @ (CatalogError::DuplicateRule(_) | CatalogError::TemporarilyUnavailable(_))) => {
                        warn!(did = %did, site = site, error = %e, "rule not created, pair skipped.");
                        self.send_stats(ActionStatistics::ActionWarning { did: did.to_string() }).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(did = %did, site = site, error = %e, "rule creation failed.");
                        run.totals.failed += 1;
                        self.send_stats(ActionStatistics::ActionError { did: did.to_string() }).await;
                        continue;
                    }
                }
            } else {
                info!(did = %did, site = site, lifetime = self.config.lifetime_seconds, "would create rule.");
                NOT_SUBMITTED.to_string()
            };

            report::add_to_summary(&mut run.summary, output_name, site, &rule_id);
            self.complete(run, output_name, &rule_id).await?;
        }
        Ok(())
    }

    /// Active rules of `did` on one of the usable sites or matching `--rses`.
    async fn selected_rules(
        &self,
        did: &Did,
        oracle: &mut ExistingStateOracle,
    ) -> Result<Vec<ReplicationRule>> {
        let rules = oracle
            .active_rules(did)
            .await
            .with_context(|| format!("failed to list rules of {did}"))?;
        Ok(rules
            .iter()
            .filter(|rule| {
                self.usable_sites.contains(&rule.rse_expression)
                    || self.config.rse_patterns.matches_any(&rule.rse_expression)
            })
            .cloned()
            .collect())
    }

    /// Rules without an expiry have infinite lifetime left.
    fn lifetime_above_threshold(&self, rule: &ReplicationRule, now: DateTime<Utc>) -> bool {
        let Some(threshold) = self.config.max_lifetime_left_seconds else {
            return false;
        };
        rule.seconds_left(now)
            .is_none_or(|left| left >= i64::try_from(threshold).unwrap_or(i64::MAX))
    }

    async fn change_rules(
        &self,
        run: &mut DispatchRun,
        did: &Did,
        output_name: &str,
        oracle: &mut ExistingStateOracle,
    ) -> Result<()> {
        let action = self.config.action;
        let rules = self.selected_rules(did, oracle).await?;
        if rules.is_empty() {
            warn!(did = %did, sites = %self.config.rse_patterns, "no rule on the requested sites.");
            self.send_stats(ActionStatistics::ActionWarning { did: did.to_string() }).await;
            return Ok(());
        }

        let now = Utc::now();
        for rule in rules {
            if action == Action::Update && self.lifetime_above_threshold(&rule, now) {
                debug!(did = %did, rule_id = rule.id, "rule lifetime above threshold, not updated.");
                continue;
            }

            let rule_id = if self.config.submit {
                let result = if action == Action::Delete {
                    self.catalog.delete_rule(&rule.id, true).await
                } else {
                    self.catalog
                        .update_rule(&rule.id, self.config.lifetime_seconds)
                        .await
                };
                if let Err(e) = result {
                    warn!(
                        did = %did,
                        rule_id = rule.id,
                        action = action.as_str(),
                        error = %e,
                        "rule change failed, rule skipped."
                    );
                    self.send_stats(ActionStatistics::ActionWarning { did: did.to_string() }).await;
                    continue;
                }
                info!(did = %did, rule_id = rule.id, site = rule.rse_expression, action = action.as_str(), "rule changed.");
                rule.id.clone()
            } else {
                info!(
                    did = %did,
                    rule_id = rule.id,
                    site = rule.rse_expression,
                    action = action.as_str(),
                    "would change rule."
                );
                NOT_SUBMITTED.to_string()
            };

            report::add_to_summary(&mut run.summary, output_name, &rule.rse_expression, &rule_id);
            self.complete(run, output_name, &rule_id).await?;
        }
        Ok(())
    }

    async fn download(
        &self,
        run: &mut DispatchRun,
        did: &Did,
        output_name: &str,
        site: Option<&str>,
    ) -> Result<()> {
        let request = DownloadRequest {
            did: did.clone(),
            base_dir: self.config.download_dir.clone(),
            rse: site.map(str::to_string),
        };

        if self.config.submit {
            if let Err(e) = self.transfer.download(&request).await {
                warn!(did = %did, error = %e, "download failed.");
                run.totals.failed += 1;
                self.send_stats(ActionStatistics::ActionError { did: did.to_string() }).await;
                return Ok(());
            }
            info!(did = %did, site = ?site, "dataset downloaded.");
        } else {
            info!(did = %did, site = ?site, "would download dataset.");
        }

        run.summary.entry(output_name.to_string()).or_default();
        self.complete(run, output_name, NOT_SUBMITTED).await
    }

    async fn list_files(
        &self,
        run: &mut DispatchRun,
        did: &Did,
        output_name: &str,
        oracle: &mut ExistingStateOracle,
    ) -> Result<()> {
        let replicas = match oracle.replicas(did).await {
            Ok(replicas) => replicas,
            Err(e) if e.is_not_found() => {
                warn!(did = %did, "dataset not found while listing replicas, skipped.");
                run.totals.skipped += 1;
                self.send_stats(ActionStatistics::ActionSkip { did: did.to_string() }).await;
                return Ok(());
            }
            Err(e) => return Err(anyhow!(e).context(format!("failed to list replicas of {did}"))),
        };
        if replicas.is_empty() {
            warn!(did = %did, "no file replicas found.");
        }

        let paths = select_replica_paths(output_name, replicas, &self.config.rse_patterns);
        run.files.record_replicas(&paths.to_json())?;
        run.summary.entry(output_name.to_string()).or_default();
        self.complete(run, output_name, NOT_SUBMITTED).await
    }
}
