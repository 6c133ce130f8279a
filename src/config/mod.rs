pub mod args;

use std::path::PathBuf;

use crate::pattern::PatternSet;
use crate::types::{DatasetRole, RucioCredentials};

/// The operation a run performs on the selected datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Action {
    /// List the datasets that pass selection and filtering.
    Find,
    /// Create a replication rule per dataset per destination site.
    Replicate,
    /// Delete rules on the given sites.
    Delete,
    /// Extend (or shorten) the lifetime of rules on the given sites.
    Update,
    /// Download the datasets.
    Download,
    /// Dump the file replica paths of each dataset.
    Listfiles,
    /// Upload local files into datasets.
    Upload,
    /// Report lock progress of previously created rules.
    Monitor,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Find => "find",
            Action::Replicate => "replicate",
            Action::Delete => "delete",
            Action::Update => "update",
            Action::Download => "download",
            Action::Listfiles => "listfiles",
            Action::Upload => "upload",
            Action::Monitor => "monitor",
        }
    }

    /// Actions that cannot run without at least one resolvable destination site.
    pub fn requires_sites(&self) -> bool {
        matches!(
            self,
            Action::Replicate | Action::Delete | Action::Update | Action::Upload
        )
    }

    /// Actions driven by the dataset selection pipeline.
    pub fn is_selection_driven(&self) -> bool {
        !matches!(self, Action::Upload | Action::Monitor)
    }

    /// Actions that change catalog state or consume quota when submitted.
    pub fn needs_confirmation(&self) -> bool {
        self.requires_sites()
    }
}

/// Main configuration for a dsrule-rs run.
///
/// Built from command-line arguments via `TryFrom<CLIArgs>`, or directly for
/// library usage:
///
/// ```
/// use dsrule_rs::Config;
/// use dsrule_rs::config::Action;
///
/// let config = Config::for_action(Action::Find);
/// assert!(config.force);
/// assert!(!config.submit);
/// assert_eq!(config.lifetime_seconds, 36000);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub action: Action,
    pub submit: bool,
    pub force: bool,
    pub show_no_progress: bool,
    /// `--regex`: task names for the task source, dataset names otherwise.
    pub name_patterns: PatternSet,
    /// `--rses`: destination site patterns.
    pub rse_patterns: PatternSet,
    pub selection: Option<SelectionSource>,
    pub container_mode: bool,
    pub production: bool,
    pub copy_requirement: CopyRequirement,
    pub exclusion_files: Vec<PathBuf>,
    pub lifetime_seconds: u64,
    pub max_lifetime_left_seconds: Option<u64>,
    pub outdir: PathBuf,
    pub no_scope_in_output: bool,
    pub download_dir: Option<PathBuf>,
    pub upload: Option<UploadConfig>,
    pub rule_ids_file: Option<PathBuf>,
    pub client_config: Option<ClientConfig>,
    pub replica_listing_retry_config: ReplicaListingRetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` for the given action with CLI defaults.
    ///
    /// `force` is set so library callers are never prompted.
    pub fn for_action(action: Action) -> Self {
        Config {
            action,
            force: true,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            action: Action::Find,
            submit: false,
            force: false,
            show_no_progress: false,
            name_patterns: PatternSet::default(),
            rse_patterns: PatternSet::default(),
            selection: None,
            container_mode: false,
            production: false,
            copy_requirement: CopyRequirement::default(),
            exclusion_files: Vec::new(),
            lifetime_seconds: 36000,
            max_lifetime_left_seconds: None,
            outdir: PathBuf::from("./"),
            no_scope_in_output: false,
            download_dir: None,
            upload: None,
            rule_ids_file: None,
            client_config: None,
            replica_listing_retry_config: ReplicaListingRetryConfig::default(),
            tracing_config: None,
            auto_complete_shell: None,
        }
    }
}

/// Where candidate datasets come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionSource {
    /// Plain text files, one `scope:name` or bare name per line.
    Files { paths: Vec<PathBuf> },
    /// Tasks returned by the task service.
    Tasks(TaskQuery),
    /// Catalog search in the given scopes.
    Catalog { scopes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskQuery {
    pub users: Vec<String>,
    pub days: u32,
    /// `|`-joined task statuses; `None` means any status.
    pub statuses: Option<String>,
    pub role: DatasetRole,
    /// `--did`: patterns on the chosen dataset/container identifier.
    pub did_patterns: Option<PatternSet>,
    pub match_files: bool,
}

/// Copy policy applied to every candidate dataset.
///
/// A site set that is absent means "no constraint requested" and the
/// corresponding predicate is vacuously true. A present but empty set is a
/// real constraint that no site can satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyRequirement {
    rule_sites: Option<PatternSet>,
    replica_sites: Option<PatternSet>,
    or_mode: bool,
    no_rule_history_sites: Option<PatternSet>,
    container_fallback: bool,
}

impl CopyRequirement {
    pub fn new(
        rule_sites: Option<PatternSet>,
        replica_sites: Option<PatternSet>,
        or_mode: bool,
        no_rule_history_sites: Option<PatternSet>,
        container_fallback: bool,
    ) -> Self {
        Self {
            rule_sites,
            replica_sites,
            or_mode,
            no_rule_history_sites,
            container_fallback,
        }
    }

    pub fn rule_sites(&self) -> Option<&PatternSet> {
        self.rule_sites.as_ref()
    }

    pub fn replica_sites(&self) -> Option<&PatternSet> {
        self.replica_sites.as_ref()
    }

    pub fn or_mode(&self) -> bool {
        self.or_mode
    }

    pub fn no_rule_history_sites(&self) -> Option<&PatternSet> {
        self.no_rule_history_sites.as_ref()
    }

    pub fn container_fallback(&self) -> bool {
        self.container_fallback
    }

    /// True when no metadata lookup is needed to evaluate the policy.
    pub fn is_unconstrained(&self) -> bool {
        self.rule_sites.is_none()
            && self.replica_sites.is_none()
            && self.no_rule_history_sites.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadSource {
    /// Directories laid out as `<dir>/<dataset>/<file>`.
    Dirs(Vec<PathBuf>),
    /// Text files listing one file path per line.
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub source: UploadSource,
    pub scopes: Vec<String>,
    /// JSON `{dataset: [file paths]}` grouping.
    pub dataset_map: Option<PathBuf>,
    /// Apply `--regex` to dataset names instead of file paths.
    pub filter_datasets: bool,
    /// Upload files on their own, outside any dataset.
    pub no_datasets: bool,
}

/// Catalog, task service and transfer client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rucio_url: String,
    pub credentials: RucioCredentials,
    pub panda_url: String,
    pub rucio_command: PathBuf,
    pub timeout_milliseconds: Option<u64>,
}

/// Retry policy for replica listing, the only retried catalog call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaListingRetryConfig {
    pub attempts: u32,
    pub interval_milliseconds: u64,
}

impl Default for ReplicaListingRetryConfig {
    fn default() -> Self {
        ReplicaListingRetryConfig {
            attempts: 3,
            interval_milliseconds: 0,
        }
    }
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_dummy_tracing_subscriber;

    #[test]
    fn default_config_is_a_dry_find() {
        init_dummy_tracing_subscriber();

        let config = Config::default();
        assert_eq!(config.action, Action::Find);
        assert!(!config.submit);
        assert!(!config.force);
        assert_eq!(config.replica_listing_retry_config.attempts, 3);
        assert!(config.copy_requirement.is_unconstrained());
    }

    #[test]
    fn for_action_skips_prompts() {
        let config = Config::for_action(Action::Delete);
        assert_eq!(config.action, Action::Delete);
        assert!(config.force);
        assert_eq!(config.outdir, PathBuf::from("./"));
    }

    #[test]
    fn action_predicates() {
        for action in [Action::Replicate, Action::Delete, Action::Update, Action::Upload] {
            assert!(action.requires_sites(), "{}", action.as_str());
            assert!(action.needs_confirmation());
        }
        for action in [Action::Find, Action::Download, Action::Listfiles, Action::Monitor] {
            assert!(!action.requires_sites(), "{}", action.as_str());
        }
        assert!(!Action::Upload.is_selection_driven());
        assert!(!Action::Monitor.is_selection_driven());
        assert!(Action::Listfiles.is_selection_driven());
    }

    #[test]
    fn copy_requirement_distinguishes_absent_from_empty() {
        let absent = CopyRequirement::default();
        assert!(absent.rule_sites().is_none());
        assert!(absent.is_unconstrained());

        let empty = CopyRequirement::new(
            Some(PatternSet::new::<&str>(&[]).unwrap()),
            None,
            false,
            None,
            false,
        );
        assert!(empty.rule_sites().is_some_and(PatternSet::is_empty));
        assert!(!empty.is_unconstrained());
    }

    #[test]
    fn copy_requirement_accessors() {
        let requirement = CopyRequirement::new(
            Some(PatternSet::new(&["CERN.*"]).unwrap()),
            Some(PatternSet::new(&["BNL.*"]).unwrap()),
            true,
            Some(PatternSet::new(&[".*TAPE"]).unwrap()),
            true,
        );
        assert_eq!(requirement.rule_sites().unwrap().sources(), vec!["CERN.*"]);
        assert_eq!(requirement.replica_sites().unwrap().sources(), vec!["BNL.*"]);
        assert!(requirement.or_mode());
        assert_eq!(
            requirement.no_rule_history_sites().unwrap().sources(),
            vec![".*TAPE"]
        );
        assert!(requirement.container_fallback());
    }
}
