use anyhow::Error;
use thiserror::Error;

/// Application-level error types for dsrule-rs.
///
/// These represent errors that abort or end a run: configuration
/// contradictions, unresolvable destination sites, user cancellation and
/// failures bubbling up from the catalog.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled)
/// - 1: General errors (Catalog, Io, Pipeline)
/// - 2: Configuration errors (InvalidConfig, InvalidRegex, NoResolvableSite)
/// - 3: Partial failure (some dataset/site pairs processed, some failed)
#[derive(Error, Debug, PartialEq)]
pub enum DsRuleError {
    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    /// None of the site patterns resolved to a registered site.
    #[error("No resolvable site for patterns: {0}")]
    NoResolvableSite(String),

    /// Catalog or task service failure that was not recovered locally.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Some dataset/site pairs failed during dispatch.
    #[error("Partial failure: {processed} processed, {failed} failed")]
    PartialFailure { processed: u64, failed: u64 },

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl DsRuleError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DsRuleError::Cancelled => 0,
            DsRuleError::InvalidConfig(_)
            | DsRuleError::InvalidRegex(_)
            | DsRuleError::NoResolvableSite(_) => 2,
            DsRuleError::PartialFailure { .. } => 3,
            _ => 1,
        }
    }
}

/// Discriminated result of every catalog, task-service and transfer call.
///
/// `NotFound` is recovered locally by skipping the dataset, `DuplicateRule`
/// and `TemporarilyUnavailable` skip a single dataset/site pair, `Transient`
/// may be retried where a retry policy exists, `Rejected` is everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<DsRuleError>() {
        return *err == DsRuleError::Cancelled;
    }
    false
}

/// Check if an anyhow::Error wraps a catalog not-found error.
pub fn is_not_found_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<CatalogError>() {
        return err.is_not_found();
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<DsRuleError>() {
        return err.exit_code();
    }
    1
}
