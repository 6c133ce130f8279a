//! Run orchestrator.
//!
//! One run resolves the destination sites, asks for confirmation when it is
//! about to change catalog state, selects candidate datasets, drops the
//! excluded ones, applies the copy policy and finally dispatches the action:
//!
//! ```text
//! RseResolver → SafetyChecker → dataset source → ExclusionList
//!             → CopyPolicyFilter → ActionDispatcher → monitoring files
//! ```
//!
//! Upload and monitor skip dataset selection and go straight to dispatch.
//! Every collaborator call is awaited in turn; nothing runs concurrently.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use chrono::Utc;
use tracing::{debug, info};

use crate::config::{Action, Config};
use crate::dispatcher::report::format_timestamp;
use crate::dispatcher::{ActionDispatcher, ActionReport};
use crate::filters::{CopyPolicyFilter, ExclusionList};
use crate::oracle::ExistingStateOracle;
use crate::pattern::PatternSet;
use crate::resolver::RseResolver;
use crate::safety::{PromptHandler, SafetyChecker};
use crate::source;
use crate::storage::Collaborators;
use crate::types::ActionStatistics;
use crate::types::error::DsRuleError;

/// The dataset rule pipeline.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// # use dsrule_rs::{ActionPipeline, Config};
/// # use dsrule_rs::storage::create_collaborators;
/// # let config: Config = todo!();
/// let collaborators = create_collaborators(config.client_config.as_ref().unwrap())?;
/// let mut pipeline = ActionPipeline::new(config, collaborators);
/// pipeline.close_stats_sender();
/// pipeline.run().await;
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ActionPipeline {
    config: Config,
    collaborators: Collaborators,
    stats_sender: Sender<ActionStatistics>,
    stats_receiver: Receiver<ActionStatistics>,
    has_error: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    ready: bool,
    prerequisites_checked: bool,
    prompt_handler: Option<Box<dyn PromptHandler>>,
    usable_sites: BTreeSet<String>,
    report: Option<ActionReport>,
}

impl ActionPipeline {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        Self {
            config,
            collaborators,
            stats_sender,
            stats_receiver,
            has_error: Arc::new(AtomicBool::new(false)),
            has_warning: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            ready: true,
            prerequisites_checked: false,
            prompt_handler: None,
            usable_sites: BTreeSet::new(),
            report: None,
        }
    }

    /// Replace the stdin/stdout confirmation prompt.
    pub fn with_prompt_handler(mut self, prompt_handler: Box<dyn PromptHandler>) -> Self {
        self.prompt_handler = Some(prompt_handler);
        self
    }

    /// Run the pipeline. Can only be called once.
    pub async fn run(&mut self) {
        assert!(self.ready, "ActionPipeline::run() called more than once");
        self.ready = false;

        if !self.prerequisites_checked {
            if let Err(e) = self.check_prerequisites().await {
                self.record_error(e);
                self.shutdown();
                return;
            }
        }

        match self.execute().await {
            Ok(report) => {
                if report.totals.failed > 0 {
                    self.has_warning.store(true, Ordering::SeqCst);
                }
                self.report = Some(report);
            }
            Err(e) => self.record_error(e),
        }

        self.shutdown();
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Set when some dataset/site pairs failed while others went through.
    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        let mut errors = Vec::with_capacity(error_list.len());
        while let Some(e) = error_list.pop_front() {
            errors.push(e);
        }
        Some(errors)
    }

    /// Get error messages without consuming them.
    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| e.to_string()).collect())
    }

    /// The progress reporter reads from this channel.
    pub fn get_stats_receiver(&self) -> Receiver<ActionStatistics> {
        self.stats_receiver.clone()
    }

    /// Call this before `run()` if you don't need progress reporting.
    pub fn close_stats_sender(&self) {
        self.stats_sender.close();
    }

    /// Outcome of a completed run.
    pub fn get_report(&self) -> Option<&ActionReport> {
        self.report.as_ref()
    }

    /// Sites resolved from `--rses`, available after the prerequisites ran.
    pub fn usable_sites(&self) -> &BTreeSet<String> {
        &self.usable_sites
    }

    /// Resolve destination sites and ask for confirmation.
    ///
    /// Call this before `run()` to do something (e.g. start a progress
    /// indicator) between the confirmation prompt and the run. If not called
    /// explicitly, `run()` calls it.
    pub async fn check_prerequisites(&mut self) -> Result<()> {
        let mut resolver = RseResolver::new(self.collaborators.catalog.clone());
        let usable_sites = resolver.resolve_all(&self.config.rse_patterns).await?;
        if self.config.action.requires_sites() && usable_sites.is_empty() {
            return Err(anyhow!(DsRuleError::NoResolvableSite(
                self.config.rse_patterns.to_string()
            )));
        }
        info!(sites = ?usable_sites, "destination sites resolved.");

        let checker = match self.prompt_handler.take() {
            Some(handler) => SafetyChecker::with_prompt_handler(&self.config, handler),
            None => SafetyChecker::new(&self.config),
        };
        checker.check_before_submission(&usable_sites)?;

        self.usable_sites = usable_sites;
        self.prerequisites_checked = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal methods
    // -----------------------------------------------------------------------

    fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::new(
            self.config.clone(),
            self.collaborators.catalog.clone(),
            self.collaborators.transfer.clone(),
            self.usable_sites.clone(),
            self.stats_sender.clone(),
        )
    }

    async fn execute(&self) -> Result<ActionReport> {
        debug!(action = self.config.action.as_str(), submit = self.config.submit, "run started.");
        match self.config.action {
            Action::Upload => self.dispatcher().upload().await,
            Action::Monitor => self.dispatcher().monitor().await,
            _ => self.execute_selection().await,
        }
    }

    async fn execute_selection(&self) -> Result<ActionReport> {
        let selection = self
            .config
            .selection
            .as_ref()
            .ok_or_else(|| anyhow!(DsRuleError::InvalidConfig("no dataset source given".to_string())))?;

        let candidates = source::select_datasets(
            selection,
            &self.config.name_patterns,
            self.config.container_mode,
            self.config.production,
            &self.collaborators.catalog,
            &self.collaborators.task_source,
        )
        .await?;

        let exclusions = ExclusionList::load(&self.config.exclusion_files)?;
        if !exclusions.is_empty() {
            info!(excluded = exclusions.len(), "exclusion list loaded.");
        }

        let mut oracle = ExistingStateOracle::new(
            self.collaborators.catalog.clone(),
            self.config.replica_listing_retry_config,
        );

        let usable_site_patterns = if self.config.action == Action::Replicate {
            let sites: Vec<&str> = self.usable_sites.iter().map(String::as_str).collect();
            Some(PatternSet::exact(&sites)?)
        } else {
            None
        };
        let mut filter = CopyPolicyFilter::new(&self.config.copy_requirement, &exclusions);
        if let Some(sites) = &usable_site_patterns {
            filter = filter.with_must_not_have_rule_on(sites);
        }
        let approved = filter.filter(&candidates, &mut oracle).await?;

        let timestamp = format_timestamp(Utc::now());
        self.dispatcher()
            .dispatch(&approved, &mut oracle, &timestamp)
            .await
    }

    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    fn shutdown(&self) {
        self.close_stats_sender();
    }
}
