//! Lock progress of rules created by an earlier run.

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use super::{ActionDispatcher, ActionReport, ActionTotals};
use crate::source::read_lines;
use crate::types::{ActionStatistics, NOT_SUBMITTED, RuleLockStatus};

/// `On dd/mm/YYYY at HH:MM:SS`, the form the rule report prints.
const LAST_UPDATE_FORMAT: &str = "On %d/%m/%Y at %H:%M:%S";

/// Multi-line report block for one rule.
pub fn format_lock_status(status: &RuleLockStatus) -> String {
    let last_update = status
        .updated_at
        .map(|time| time.format(LAST_UPDATE_FORMAT).to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "ID = {}: {}\n    OK = {}\n    REPLICATING = {}\n    STUCK = {}\n    Last updated: {}",
        status.id,
        status.name,
        status.locks_ok,
        status.locks_replicating,
        status.locks_stuck,
        last_update
    )
}

impl ActionDispatcher {
    /// Look up every rule id listed in `--rule-ids-file`.
    pub async fn monitor(&self) -> Result<ActionReport> {
        let path = self
            .config
            .rule_ids_file
            .as_ref()
            .ok_or_else(|| anyhow!("monitor requested without a rule id file"))?;
        let rule_ids: Vec<String> = read_lines(std::slice::from_ref(path))?
            .into_iter()
            .filter(|rule_id| rule_id != NOT_SUBMITTED)
            .collect();

        let mut totals = ActionTotals {
            selected: rule_ids.len() as u64,
            ..ActionTotals::default()
        };
        let mut lock_status = Vec::new();

        for rule_id in &rule_ids {
            match self.catalog.get_rule(rule_id).await {
                Ok(Some(status)) => {
                    info!(
                        rule_id = status.id,
                        name = status.name,
                        ok = status.locks_ok,
                        replicating = status.locks_replicating,
                        stuck = status.locks_stuck,
                        updated_at = ?status.updated_at,
                        "rule status."
                    );
                    totals.processed += 1;
                    self.send_stats(ActionStatistics::ActionComplete { did: status.name.clone() })
                        .await;
                    lock_status.push(status);
                }
                Ok(None) => {
                    warn!(rule_id = rule_id, "no rule found, it may be past its lifetime.");
                    totals.skipped += 1;
                    self.send_stats(ActionStatistics::ActionSkip { did: rule_id.clone() }).await;
                }
                Err(e) => {
                    warn!(rule_id = rule_id, error = %e, "failed to look up rule.");
                    totals.failed += 1;
                    self.send_stats(ActionStatistics::ActionError { did: rule_id.clone() }).await;
                }
            }
        }

        Ok(ActionReport {
            totals,
            lock_status,
            ..ActionReport::default()
        })
    }
}
