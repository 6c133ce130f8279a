use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;
use tracing::{debug, warn};

use crate::config::{ClientConfig, ReplicaListingRetryConfig};
use crate::types::error::CatalogError;
use crate::types::{
    CatalogFile, Did, DidMetadata, DidType, FileReplica, ReplicationRule, RseInfo,
    RuleHistoryEntry, RuleLockStatus, TaskRecord,
};

pub mod panda;
pub mod rucio;
pub mod transfer;

/// Result of every collaborator call.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Type alias for a boxed catalog trait object.
pub type Catalog = Box<dyn CatalogTrait + Send + Sync>;

/// Type alias for a boxed task source trait object.
pub type TaskSource = Box<dyn TaskSourceTrait + Send + Sync>;

/// Type alias for a boxed transfer trait object.
pub type Transfer = Box<dyn TransferTrait + Send + Sync>;

/// Dataset, replica and rule catalog operations used by the pipeline.
///
/// Every method issues exactly one logical request. Not-found conditions are
/// reported as [`CatalogError::NotFound`], never as an empty result.
#[async_trait]
pub trait CatalogTrait: DynClone {
    /// All registered storage sites.
    async fn list_rses(&self) -> CatalogResult<Vec<RseInfo>>;

    /// Currently active replication rules of a DID.
    async fn list_did_rules(&self, did: &Did) -> CatalogResult<Vec<ReplicationRule>>;

    /// Every rule a DID ever had, including expired and deleted ones.
    async fn list_rule_history(&self, did: &Did) -> CatalogResult<Vec<RuleHistoryEntry>>;

    /// File replicas of a DID with their paths and states per site.
    async fn list_replicas(&self, did: &Did) -> CatalogResult<Vec<FileReplica>>;

    /// Files attached to a DID.
    async fn list_files(&self, did: &Did) -> CatalogResult<Vec<CatalogFile>>;

    /// DID type and first parent container.
    async fn get_metadata(&self, did: &Did) -> CatalogResult<DidMetadata>;

    /// Names in `scope` matching a wildcard filter (`*`), restricted to `did_type`.
    async fn list_dids(
        &self,
        scope: &str,
        name_filter: &str,
        did_type: DidType,
    ) -> CatalogResult<Vec<String>>;

    /// Lock status of a rule, `None` when the rule no longer exists.
    async fn get_rule(&self, rule_id: &str) -> CatalogResult<Option<RuleLockStatus>>;

    /// Create a single-copy rule and return its id.
    async fn create_rule(
        &self,
        did: &Did,
        rse_expression: &str,
        lifetime_seconds: u64,
    ) -> CatalogResult<String>;

    async fn delete_rule(&self, rule_id: &str, purge_replicas: bool) -> CatalogResult<()>;

    async fn update_rule(&self, rule_id: &str, lifetime_seconds: u64) -> CatalogResult<()>;
}

dyn_clone::clone_trait_object!(CatalogTrait);

/// Workload-management task queries.
#[async_trait]
pub trait TaskSourceTrait: DynClone {
    /// Tasks of `user` from the last `days`, optionally restricted to
    /// `|`-joined statuses.
    async fn query_tasks(
        &self,
        user: &str,
        days: u32,
        status_filter: Option<&str>,
    ) -> CatalogResult<Vec<TaskRecord>>;
}

dyn_clone::clone_trait_object!(TaskSourceTrait);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub did: Did,
    pub base_dir: Option<std::path::PathBuf>,
    pub rse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: std::path::PathBuf,
    pub rse: String,
    pub scope: String,
    pub lifetime_seconds: u64,
    pub dataset: Option<String>,
}

/// File transfer execution.
#[async_trait]
pub trait TransferTrait: DynClone {
    async fn download(&self, request: &DownloadRequest) -> CatalogResult<()>;

    async fn upload(&self, request: &UploadRequest) -> CatalogResult<()>;
}

dyn_clone::clone_trait_object!(TransferTrait);

/// The external services one pipeline run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Catalog,
    pub task_source: TaskSource,
    pub transfer: Transfer,
}

/// Build the HTTP catalog, HTTP task source and command-line transfer bindings.
pub fn create_collaborators(client_config: &ClientConfig) -> Result<Collaborators> {
    let catalog = rucio::RucioCatalog::new(client_config)?;
    let task_source = panda::PandaTaskSource::new(client_config)?;
    let transfer = transfer::RucioCommandTransfer::new(client_config);

    Ok(Collaborators {
        catalog: Box::new(catalog),
        task_source: Box::new(task_source),
        transfer: Box::new(transfer),
    })
}

/// List replicas, retrying transport failures with a fixed interval.
///
/// Not-found and other non-transient errors are returned immediately. When
/// every attempt fails the last error is returned.
pub async fn list_replicas_with_retry(
    catalog: &Catalog,
    did: &Did,
    retry_config: &ReplicaListingRetryConfig,
) -> CatalogResult<Vec<FileReplica>> {
    let max_attempts = retry_config.attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(retry_config.interval_milliseconds)).await;
        }

        match catalog.list_replicas(did).await {
            Ok(replicas) => {
                debug!(did = %did, attempt = attempt + 1, "replicas listed.");
                return Ok(replicas);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    did = %did,
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    error = %e,
                    "replica listing attempt failed."
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        CatalogError::Transient(format!("replica listing failed for {did}"))
    }))
}
