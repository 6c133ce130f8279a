//! Shared test utilities for the dsrule-rs library crate.
//!
//! In-memory stand-ins for the catalog, the task service and the transfer
//! client. Every mock is `Clone` and shares its state, so a test can hand a
//! boxed clone to the code under test and inspect the recorded calls on the
//! original afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{Action, ClientConfig, Config};
use crate::pattern::PatternSet;
use crate::storage::{
    CatalogResult, CatalogTrait, DownloadRequest, TaskSourceTrait, TransferTrait, UploadRequest,
};
use crate::types::error::CatalogError;
use crate::types::{
    CatalogFile, DatasetRef, DatasetRole, Did, DidMetadata, DidType, FileReplica,
    ReplicationRule, RseInfo, RucioCredentials, RuleHistoryEntry, RuleLockStatus, TaskRecord,
};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// A `find` configuration accepting every name, never prompting.
pub(crate) fn make_test_config() -> Config {
    Config {
        name_patterns: PatternSet::new(&[".*"]).unwrap(),
        ..Config::for_action(Action::Find)
    }
}

/// Client configuration pointing both services at `base_url`.
pub(crate) fn make_client_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        rucio_url: base_url.to_string(),
        credentials: RucioCredentials {
            account: Some("jdoe".to_string()),
            auth_token: Some("test-token".to_string()),
        },
        panda_url: base_url.to_string(),
        rucio_command: PathBuf::from("rucio"),
        timeout_milliseconds: Some(5000),
    }
}

pub(crate) fn dataset_ref(name: &str, role: DatasetRole, container: Option<&str>, files: u64) -> DatasetRef {
    DatasetRef {
        name: name.to_string(),
        role,
        container: container.map(str::to_string),
        finished_files: files,
    }
}

pub(crate) fn task_record(name: &str, datasets: Vec<DatasetRef>) -> TaskRecord {
    TaskRecord {
        taskname: name.to_string(),
        jeditaskid: None,
        status: Some("done".to_string()),
        datasets,
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CatalogState {
    sites: Vec<RseInfo>,
    site_listing_failure: Option<CatalogError>,
    missing: HashSet<Did>,
    files: HashMap<Did, Vec<CatalogFile>>,
    rules: HashMap<Did, Vec<ReplicationRule>>,
    history: HashMap<Did, Vec<RuleHistoryEntry>>,
    replicas: HashMap<Did, BTreeMap<String, FileReplica>>,
    metadata: HashMap<Did, DidMetadata>,
    dids: HashMap<(String, DidType), Vec<String>>,
    rule_status: HashMap<String, RuleLockStatus>,
    rule_lookup_failures: HashMap<String, CatalogError>,
    replica_failures_left: usize,
    create_failures: HashMap<String, CatalogError>,
    rule_change_failure: Option<CatalogError>,
    calls: HashMap<&'static str, usize>,
    did_searches: Vec<(String, String, DidType)>,
    created: Vec<(Did, String, u64)>,
    deleted: Vec<(String, bool)>,
    updated: Vec<(String, u64)>,
    next_rule: usize,
}

impl CatalogState {
    fn call(&mut self, operation: &'static str) {
        *self.calls.entry(operation).or_default() += 1;
    }

    fn check_exists(&self, did: &Did) -> CatalogResult<()> {
        if self.missing.contains(did) {
            return Err(CatalogError::NotFound(did.to_string()));
        }
        Ok(())
    }

    fn next_rule_id(&mut self) -> String {
        self.next_rule += 1;
        format!("rule-{}", self.next_rule)
    }

    fn replica(&mut self, scope: &str, name: &str, file: &str) -> &mut FileReplica {
        self.replicas
            .entry(Did::new(scope, name))
            .or_default()
            .entry(file.to_string())
            .or_insert_with(|| FileReplica {
                name: file.to_string(),
                ..FileReplica::default()
            })
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MockCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_state(self, update: impl FnOnce(&mut CatalogState)) -> Self {
        update(&mut self.state.lock().unwrap());
        self
    }

    pub(crate) fn with_sites(self, sites: &[&str]) -> Self {
        self.with_state(|state| state.sites.extend(sites.iter().map(|site| RseInfo::new(site))))
    }

    /// Every per-DID call for this dataset answers not-found.
    pub(crate) fn with_missing(self, scope: &str, name: &str) -> Self {
        self.with_state(|state| {
            state.missing.insert(Did::new(scope, name));
        })
    }

    pub(crate) fn with_files(self, scope: &str, name: &str, files: &[(&str, u64)]) -> Self {
        self.with_state(|state| {
            state.files.entry(Did::new(scope, name)).or_default().extend(
                files.iter().map(|(file, bytes)| CatalogFile {
                    name: file.to_string(),
                    bytes: *bytes,
                }),
            );
        })
    }

    /// Active rules without expiry, one per site expression.
    pub(crate) fn with_rules(self, scope: &str, name: &str, sites: &[&str]) -> Self {
        self.with_state(|state| {
            for site in sites {
                let id = state.next_rule_id();
                state.rules.entry(Did::new(scope, name)).or_default().push(ReplicationRule {
                    id,
                    rse_expression: site.to_string(),
                    expires_at: None,
                });
            }
        })
    }

    /// Active rules given as `(id, site expression, expiry)`.
    pub(crate) fn with_rule_entries(
        self,
        scope: &str,
        name: &str,
        rules: &[(&str, &str, Option<DateTime<Utc>>)],
    ) -> Self {
        self.with_state(|state| {
            state.rules.entry(Did::new(scope, name)).or_default().extend(
                rules.iter().map(|(id, site, expires_at)| ReplicationRule {
                    id: id.to_string(),
                    rse_expression: site.to_string(),
                    expires_at: *expires_at,
                }),
            );
        })
    }

    pub(crate) fn with_history(self, scope: &str, name: &str, sites: &[&str]) -> Self {
        self.with_state(|state| {
            state.history.entry(Did::new(scope, name)).or_default().extend(
                sites.iter().map(|site| RuleHistoryEntry {
                    rse_expression: site.to_string(),
                }),
            );
        })
    }

    /// Replicas as `(file, sites)`, with no path and no reported state.
    pub(crate) fn with_replicas(self, scope: &str, name: &str, files: &[(&str, &[&str])]) -> Self {
        self.with_state(|state| {
            for (file, sites) in files {
                let replica = state.replica(scope, name, file);
                for site in *sites {
                    replica.rses.entry(site.to_string()).or_default();
                }
            }
        })
    }

    pub(crate) fn with_replica_states(self, scope: &str, name: &str, file: &str, states: &[(&str, &str)]) -> Self {
        self.with_state(|state| {
            let replica = state.replica(scope, name, file);
            for (site, site_state) in states {
                replica.rses.entry(site.to_string()).or_default();
                replica.states.insert(site.to_string(), site_state.to_string());
            }
        })
    }

    pub(crate) fn with_replica_paths(self, scope: &str, name: &str, file: &str, paths: &[(&str, &str)]) -> Self {
        self.with_state(|state| {
            let replica = state.replica(scope, name, file);
            for (site, path) in paths {
                replica.rses.entry(site.to_string()).or_default().push(path.to_string());
            }
        })
    }

    pub(crate) fn with_metadata(self, scope: &str, name: &str, did_type: DidType, parent: Option<&str>) -> Self {
        self.with_state(|state| {
            state.metadata.insert(
                Did::new(scope, name),
                DidMetadata {
                    did_type,
                    parent: parent.map(str::to_string),
                },
            );
        })
    }

    /// Names returned by any search in `scope` for `did_type`.
    pub(crate) fn with_dids(self, scope: &str, did_type: DidType, names: &[&str]) -> Self {
        self.with_state(|state| {
            state
                .dids
                .entry((scope.to_string(), did_type))
                .or_default()
                .extend(names.iter().map(|name| name.to_string()));
        })
    }

    pub(crate) fn with_rule_status(self, status: RuleLockStatus) -> Self {
        self.with_state(|state| {
            state.rule_status.insert(status.id.clone(), status);
        })
    }

    /// The next `count` replica listings fail with a transient error.
    pub(crate) fn fail_replica_listing(&self, count: usize) {
        self.state.lock().unwrap().replica_failures_left = count;
    }

    pub(crate) fn fail_site_listing(&self, error: CatalogError) {
        self.state.lock().unwrap().site_listing_failure = Some(error);
    }

    pub(crate) fn fail_create_rule(&self, site: &str, error: CatalogError) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(site.to_string(), error);
    }

    /// Every delete and update fails with `error`.
    pub(crate) fn fail_rule_changes(&self, error: CatalogError) {
        self.state.lock().unwrap().rule_change_failure = Some(error);
    }

    pub(crate) fn fail_rule_lookup(&self, rule_id: &str, error: CatalogError) {
        self.state
            .lock()
            .unwrap()
            .rule_lookup_failures
            .insert(rule_id.to_string(), error);
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn replica_listing_calls(&self) -> usize {
        self.calls("list_replicas")
    }

    pub(crate) fn did_searches(&self) -> Vec<(String, String, DidType)> {
        self.state.lock().unwrap().did_searches.clone()
    }

    pub(crate) fn created_rules(&self) -> Vec<(Did, String, u64)> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn deleted_rules(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub(crate) fn updated_rules(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().updated.clone()
    }
}

#[async_trait]
impl CatalogTrait for MockCatalog {
    async fn list_rses(&self) -> CatalogResult<Vec<RseInfo>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_rses");
        if let Some(error) = state.site_listing_failure.clone() {
            return Err(error);
        }
        Ok(state.sites.clone())
    }

    async fn list_did_rules(&self, did: &Did) -> CatalogResult<Vec<ReplicationRule>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_did_rules");
        state.check_exists(did)?;
        Ok(state.rules.get(did).cloned().unwrap_or_default())
    }

    async fn list_rule_history(&self, did: &Did) -> CatalogResult<Vec<RuleHistoryEntry>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_rule_history");
        state.check_exists(did)?;
        Ok(state.history.get(did).cloned().unwrap_or_default())
    }

    async fn list_replicas(&self, did: &Did) -> CatalogResult<Vec<FileReplica>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_replicas");
        if state.replica_failures_left > 0 {
            state.replica_failures_left -= 1;
            return Err(CatalogError::Transient("connection reset".to_string()));
        }
        state.check_exists(did)?;
        Ok(state
            .replicas
            .get(did)
            .map(|files| files.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_files(&self, did: &Did) -> CatalogResult<Vec<CatalogFile>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_files");
        state.check_exists(did)?;
        Ok(state.files.get(did).cloned().unwrap_or_default())
    }

    async fn get_metadata(&self, did: &Did) -> CatalogResult<DidMetadata> {
        let mut state = self.state.lock().unwrap();
        state.call("get_metadata");
        state.check_exists(did)?;
        Ok(state.metadata.get(did).cloned().unwrap_or(DidMetadata {
            did_type: DidType::Dataset,
            parent: None,
        }))
    }

    async fn list_dids(&self, scope: &str, name_filter: &str, did_type: DidType) -> CatalogResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_dids");
        state
            .did_searches
            .push((scope.to_string(), name_filter.to_string(), did_type));
        Ok(state
            .dids
            .get(&(scope.to_string(), did_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_rule(&self, rule_id: &str) -> CatalogResult<Option<RuleLockStatus>> {
        let mut state = self.state.lock().unwrap();
        state.call("get_rule");
        if let Some(error) = state.rule_lookup_failures.get(rule_id) {
            return Err(error.clone());
        }
        Ok(state.rule_status.get(rule_id).cloned())
    }

    async fn create_rule(&self, did: &Did, rse_expression: &str, lifetime_seconds: u64) -> CatalogResult<String> {
        let mut state = self.state.lock().unwrap();
        state.call("create_rule");
        state.check_exists(did)?;
        if let Some(error) = state.create_failures.get(rse_expression) {
            return Err(error.clone());
        }

        let id = state.next_rule_id();
        state
            .created
            .push((did.clone(), rse_expression.to_string(), lifetime_seconds));
        state.rules.entry(did.clone()).or_default().push(ReplicationRule {
            id: id.clone(),
            rse_expression: rse_expression.to_string(),
            expires_at: None,
        });
        Ok(id)
    }

    async fn delete_rule(&self, rule_id: &str, purge_replicas: bool) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_rule");
        if let Some(error) = state.rule_change_failure.clone() {
            return Err(error);
        }
        state.deleted.push((rule_id.to_string(), purge_replicas));
        for rules in state.rules.values_mut() {
            rules.retain(|rule| rule.id != rule_id);
        }
        Ok(())
    }

    async fn update_rule(&self, rule_id: &str, lifetime_seconds: u64) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("update_rule");
        if let Some(error) = state.rule_change_failure.clone() {
            return Err(error);
        }
        state.updated.push((rule_id.to_string(), lifetime_seconds));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Task source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TaskSourceState {
    tasks: HashMap<String, Vec<TaskRecord>>,
    queries: Vec<(String, u32, Option<String>)>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTaskSource {
    state: Arc<Mutex<TaskSourceState>>,
}

impl MockTaskSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_tasks(self, user: &str, tasks: Vec<TaskRecord>) -> Self {
        self.state
            .lock()
            .unwrap()
            .tasks
            .entry(user.to_string())
            .or_default()
            .extend(tasks);
        self
    }

    /// `(user, days, status filter)` of every query, in order.
    pub(crate) fn queries(&self) -> Vec<(String, u32, Option<String>)> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl TaskSourceTrait for MockTaskSource {
    async fn query_tasks(&self, user: &str, days: u32, status_filter: Option<&str>) -> CatalogResult<Vec<TaskRecord>> {
        let mut state = self.state.lock().unwrap();
        state
            .queries
            .push((user.to_string(), days, status_filter.map(str::to_string)));
        Ok(state.tasks.get(user).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransferState {
    downloads: Vec<DownloadRequest>,
    uploads: Vec<UploadRequest>,
    failing: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransfer {
    state: Arc<Mutex<TransferState>>,
}

impl MockTransfer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every transfer fails.
    pub(crate) fn failing(self) -> Self {
        self.state.lock().unwrap().failing = true;
        self
    }

    /// Successful downloads, in order.
    pub(crate) fn downloads(&self) -> Vec<DownloadRequest> {
        self.state.lock().unwrap().downloads.clone()
    }

    /// Successful uploads, in order.
    pub(crate) fn uploads(&self) -> Vec<UploadRequest> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl TransferTrait for MockTransfer {
    async fn download(&self, request: &DownloadRequest) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(CatalogError::Rejected(format!("download of {} failed", request.did)));
        }
        state.downloads.push(request.clone());
        Ok(())
    }

    async fn upload(&self, request: &UploadRequest) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(CatalogError::Rejected(format!(
                "upload of {} failed",
                request.path.display()
            )));
        }
        state.uploads.push(request.clone());
        Ok(())
    }
}
