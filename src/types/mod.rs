use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;

/// Separator between scope and name in a scope-qualified identifier.
pub const SCOPE_SEPARATOR: char = ':';

/// Number of leading dot components that form the scope of a user dataset.
pub const DEFAULT_SCOPE_COMPONENTS: usize = 2;

/// Number of leading dot components that form the scope of a production dataset.
pub const PRODUCTION_SCOPE_COMPONENTS: usize = 1;

/// Rule id recorded for every action that was not submitted.
pub const NOT_SUBMITTED: &str = "NOT_SUBMITTED";

/// Strip the trailing/embedded `/` that container names carry in task records.
pub fn normalize_name(name: &str) -> String {
    name.replace('/', "")
}

/// Split a dataset name into `(scope, name)`.
///
/// Scope-qualified names (`scope:name`) are split on the separator. Otherwise
/// the scope is the first two dot-delimited components of the name, or the
/// first one when `production` is set.
pub fn derive_scope(name: &str, production: bool) -> (String, String) {
    if let Some((scope, bare)) = name.split_once(SCOPE_SEPARATOR) {
        return (scope.to_string(), bare.to_string());
    }

    let components = if production {
        PRODUCTION_SCOPE_COMPONENTS
    } else {
        DEFAULT_SCOPE_COMPONENTS
    };
    let scope = name
        .split('.')
        .take(components)
        .collect::<Vec<_>>()
        .join(".");
    (scope, name.to_string())
}

/// A scope-qualified data identifier as the catalog sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did {
    pub scope: String,
    pub name: String,
}

impl Did {
    /// The name is normalized so it can be used directly in catalog calls.
    pub fn new(scope: &str, name: &str) -> Self {
        Self {
            scope: scope.to_string(),
            name: normalize_name(name),
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scope, SCOPE_SEPARATOR, self.name)
    }
}

/// Mapping from scope to the set of dataset (or container) names selected in it.
///
/// Iteration is ordered by scope then name. Scopes never hold an empty set:
/// removing the last name of a scope removes the scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeDatasetSet {
    scopes: BTreeMap<String, BTreeSet<String>>,
}

impl ScopeDatasetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the name was not already present in the scope.
    pub fn insert(&mut self, scope: &str, name: &str) -> bool {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string())
    }

    pub fn contains(&self, scope: &str, name: &str) -> bool {
        self.scopes
            .get(scope)
            .is_some_and(|names| names.contains(name))
    }

    pub fn remove(&mut self, scope: &str, name: &str) -> bool {
        let Some(names) = self.scopes.get_mut(scope) else {
            return false;
        };
        let removed = names.remove(name);
        if names.is_empty() {
            self.scopes.remove(scope);
        }
        removed
    }

    /// Total number of names across all scopes.
    pub fn len(&self) -> usize {
        self.scopes.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn names(&self, scope: &str) -> Option<&BTreeSet<String>> {
        self.scopes.get(scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.scopes.iter().map(|(scope, names)| (scope.as_str(), names))
    }

    /// Flat `(scope, name)` view, ordered by scope then name.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.scopes.iter().flat_map(|(scope, names)| {
            names
                .iter()
                .map(move |name| (scope.as_str(), name.as_str()))
        })
    }
}

impl<S: Into<String>, N: Into<String>> FromIterator<(S, N)> for ScopeDatasetSet {
    fn from_iter<T: IntoIterator<Item = (S, N)>>(iter: T) -> Self {
        let mut set = ScopeDatasetSet::new();
        for (scope, name) in iter {
            set.insert(&scope.into(), &name.into());
        }
        set
    }
}

/// Role a dataset plays in a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetRole {
    Input,
    Output,
    #[serde(other)]
    Other,
}

impl DatasetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetRole::Input => "input",
            DatasetRole::Output => "output",
            DatasetRole::Other => "other",
        }
    }
}

/// One dataset attached to a task record, as reported by the task service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetRef {
    #[serde(rename = "datasetname")]
    pub name: String,
    #[serde(rename = "type")]
    pub role: DatasetRole,
    #[serde(rename = "containername", default)]
    pub container: Option<String>,
    #[serde(rename = "nfilesfinished", default, deserialize_with = "null_as_zero")]
    pub finished_files: u64,
}

/// A workload task with the datasets it reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskRecord {
    pub taskname: String,
    #[serde(default)]
    pub jeditaskid: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub datasets: Vec<DatasetRef>,
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DatasetRef>, D::Error> {
    Ok(Option::<Vec<DatasetRef>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Kind of data identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DidType {
    Dataset,
    Container,
    File,
    #[serde(other)]
    Other,
}

impl DidType {
    /// Lowercase form used in catalog search queries.
    pub fn as_query(&self) -> &'static str {
        match self {
            DidType::Dataset => "dataset",
            DidType::Container => "container",
            DidType::File => "file",
            DidType::Other => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidMetadata {
    pub did_type: DidType,
    /// First parent container, if any.
    pub parent: Option<String>,
}

/// A registered storage site.
#[derive(Debug, Clone, PartialEq)]
pub struct RseInfo {
    pub name: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RseInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: serde_json::Map::new(),
        }
    }
}

/// A currently active replication rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRule {
    pub id: String,
    pub rse_expression: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ReplicationRule {
    /// Seconds of lifetime left at `now`; `None` for rules that never expire.
    pub fn seconds_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - now).num_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHistoryEntry {
    pub rse_expression: String,
}

/// Replica state string the catalog uses for readable copies.
pub const REPLICA_STATE_AVAILABLE: &str = "AVAILABLE";

/// Physical copies of one file, per site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReplica {
    pub name: String,
    pub rses: BTreeMap<String, Vec<String>>,
    pub states: BTreeMap<String, String>,
}

impl FileReplica {
    /// A site with no reported state counts as available.
    pub fn is_available_on(&self, rse: &str) -> bool {
        self.states
            .get(rse)
            .is_none_or(|state| state == REPLICA_STATE_AVAILABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFile {
    pub name: String,
    pub bytes: u64,
}

/// Lock progress of a replication rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLockStatus {
    pub id: String,
    pub name: String,
    pub locks_ok: u64,
    pub locks_replicating: u64,
    pub locks_stuck: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Catalog identity used by the HTTP binding.
///
/// The auth token is cleared from memory when this struct is dropped.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct RucioCredentials {
    pub account: Option<String>,
    pub auth_token: Option<String>,
}

impl Debug for RucioCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth_token = self
            .auth_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        f.debug_struct("RucioCredentials")
            .field("account", &self.account)
            .field("auth_token", &auth_token)
            .finish()
    }
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, PartialEq)]
pub enum ActionStatistics {
    ActionBytes(u64),
    ActionComplete { did: String },
    ActionSkip { did: String },
    ActionError { did: String },
    ActionWarning { did: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRecord {
    pub ruleid: String,
}

/// `{dataset: {site: {"ruleid": id}}}` record of what was acted upon.
pub type ActionSummary = BTreeMap<String, BTreeMap<String, RuleRecord>>;
