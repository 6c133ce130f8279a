use crate::config::{
    Action, ClientConfig, Config, CopyRequirement, ReplicaListingRetryConfig, SelectionSource,
    TaskQuery, TracingConfig, UploadConfig, UploadSource,
};
use crate::pattern::PatternSet;
use crate::types::{DatasetRole, RucioCredentials};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;

pub mod value_parser;


use value_parser::{file_exist, url};

// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_DAYS: u32 = 30;
const DEFAULT_LIFETIME_SECONDS: u64 = 36000;
const DEFAULT_OUTDIR: &str = "./";
const DEFAULT_RUCIO_URL: &str = "https://rucio-lb-prod.cern.ch";
const DEFAULT_PANDA_URL: &str = "https://pandaserver.cern.ch:25443/server/panda";
const DEFAULT_RUCIO_COMMAND: &str = "rucio";
const DEFAULT_REPLICA_LISTING_ATTEMPTS: u32 = 3;
const DEFAULT_REPLICA_LISTING_INTERVAL_MILLISECONDS: u64 = 0;
const DEFAULT_SUBMIT: bool = false;
const DEFAULT_FORCE: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;

/// Task status that disables status filtering.
const ANY_TASK_STATUS: &str = "any";

const TASK_STATUSES: &[&str] = &[
    "submitted",
    "defined",
    "activated",
    "assigned",
    "starting",
    "running",
    "merging",
    "finished",
    "failed",
    "cancelled",
    "holding",
    "transferring",
    "closed",
    "aborted",
    "unknown",
    "all",
    "throttled",
    "scouting",
    "scouted",
    "done",
    "tobekilled",
    "ready",
    "pending",
    "exhausted",
    "paused",
    "broken",
    "submitting",
    "finishing",
    "aborting",
    "passed",
    "any",
];

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_FROMFILES_AND_USETASKS: &str = "Cannot specify both --usetasks and --fromfiles.";
const ERROR_MESSAGE_USETASKS_WITHOUT_TYPE: &str = "--type must be specified if --usetasks is used.";
const ERROR_MESSAGE_USETASKS_WITHOUT_USER: &str =
    "At least one --grid-user must be specified if --usetasks is used.";
const ERROR_MESSAGE_NO_SOURCE: &str =
    "--scopes must be specified if neither --usetasks nor --fromfiles is used.";
const ERROR_MESSAGE_REGEX_REQUIRED: &str = "--regex must be specified for this action.";
const ERROR_MESSAGE_RULE_IDS_FILE_REQUIRED: &str = "--rule-ids-file must be specified for monitor.";
const ERROR_MESSAGE_UPLOAD_DIRS_AND_FROMFILES: &str =
    "Cannot specify both --dirs and --fromfiles for upload.";
const ERROR_MESSAGE_UPLOAD_NO_SOURCE: &str = "Either --dirs or --fromfiles must be specified for upload.";
const ERROR_MESSAGE_UPLOAD_DSMAP_AND_NO_DATASETS: &str = "Cannot specify both --dsmap and --no-datasets.";
const ERROR_MESSAGE_UPLOAD_NO_SCOPES: &str = "--scopes must be specified for upload.";
const ERROR_MESSAGE_DOWNLOAD_DIR_REQUIRED: &str =
    "--downto must be specified to download with --submit.";

// ---------------------------------------------------------------------------
// Value enums
// ---------------------------------------------------------------------------

/// Which side of a task the datasets are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DatasetType {
    #[value(name = "IN")]
    In,
    #[value(name = "OUT")]
    Out,
}

impl From<DatasetType> for DatasetRole {
    fn from(value: DatasetType) -> Self {
        match value {
            DatasetType::In => DatasetRole::Input,
            DatasetType::Out => DatasetRole::Output,
        }
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// dsrule - Bulk replication-rule management for Rucio datasets.
///
/// Select datasets from PanDA tasks, catalog listings or plain lists, filter
/// them by what the catalog already holds, then find, replicate, delete,
/// update, download, list or upload them. Nothing is submitted without
/// --submit.
///
/// Example:
///   dsrule find -s 'user.jdoe.mc23.*' --scopes user.jdoe
///   dsrule replicate -s 'user.jdoe.ntup.*' -r 'CERN-PROD_.*DISK' --usetasks done --type OUT -u jdoe --submit
///   dsrule delete --fromfiles old.txt -s '.*' -r SITE_A_SCRATCHDISK --submit -f
#[derive(Parser, Clone, Debug)]
#[command(name = "dsrule", version, about, long_about = None)]
pub struct CLIArgs {
    /// The action to perform on the selected datasets.
    #[arg(
        value_enum,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "find"),
        required = false,
    )]
    pub action: Action,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Submit the action. Without it the run is a dry run.
    #[arg(long, env, default_value_t = DEFAULT_SUBMIT, help_heading = "General")]
    pub submit: bool,

    /// Skip the confirmation prompt before submitting.
    #[arg(short = 'f', long, env, default_value_t = DEFAULT_FORCE, help_heading = "General")]
    pub force: bool,

    /// Don't show the progress bar.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    /// Output directory for the monitoring and summary files.
    #[arg(long, env, default_value = DEFAULT_OUTDIR, help_heading = "General")]
    pub outdir: PathBuf,

    /// Write dataset names without their scope to the output files.
    #[arg(long, env, help_heading = "General")]
    pub no_scope_in_output: bool,

    // -----------------------------------------------------------------------
    // Selection options
    // -----------------------------------------------------------------------
    /// Patterns on the task name (--usetasks) or on the dataset name (otherwise).
    #[arg(
        short = 's',
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Selection"
    )]
    pub regex: Vec<String>,

    /// Files listing the datasets to process, one per line.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = file_exist::is_file_exist,
        help_heading = "Selection"
    )]
    pub fromfiles: Vec<String>,

    /// Find datasets through PanDA tasks in the given statuses ('any' disables the status filter).
    #[arg(
        long,
        env,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = clap::builder::PossibleValuesParser::new(TASK_STATUSES.iter().copied()),
        help_heading = "Selection"
    )]
    pub usetasks: Vec<String>,

    /// Use the task inputs (IN) or outputs (OUT). Required with --usetasks.
    #[arg(long = "type", env = "DATASET_TYPE", value_enum, help_heading = "Selection")]
    pub dataset_type: Option<DatasetType>,

    /// Grid user names whose tasks are searched.
    #[arg(
        short = 'u',
        long,
        env,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Selection"
    )]
    pub grid_user: Vec<String>,

    /// Number of days in the past to look for tasks in.
    #[arg(short = 'd', long, env, default_value_t = DEFAULT_DAYS, help_heading = "Selection")]
    pub days: u32,

    /// Patterns the dataset (or container) identifier of a task must match.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Selection"
    )]
    pub did: Vec<String>,

    /// Scopes to search the catalog in when neither --usetasks nor --fromfiles is used.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Selection"
    )]
    pub scopes: Vec<String>,

    /// Process containers instead of individual datasets.
    #[arg(long, env, help_heading = "Selection")]
    pub containers: bool,

    /// Drop datasets of tasks whose input and output finished-file counts differ.
    #[arg(long, env, help_heading = "Selection")]
    pub matchfiles: bool,

    /// Derive scopes the production way (first name component only).
    #[arg(long, env, help_heading = "Selection")]
    pub prod: bool,

    // -----------------------------------------------------------------------
    // Policy options
    // -----------------------------------------------------------------------
    /// Sites of which at least one must hold a rule on the dataset.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Policy"
    )]
    pub rule_on_rse: Option<Vec<String>>,

    /// Sites of which at least one must hold a full replica of the dataset.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Policy"
    )]
    pub replica_on_rse: Option<Vec<String>>,

    /// Accept a dataset when either the rule or the replica requirement holds.
    #[arg(long, env, help_heading = "Policy")]
    pub rule_or_replica_on_rse: bool,

    /// Sites on which the dataset must never have had a rule.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Policy"
    )]
    pub norulehist_on_rse: Option<Vec<String>>,

    /// Let a rule on the parent container satisfy --rule-on-rse.
    #[arg(long, env, help_heading = "Policy")]
    pub contrulereq: bool,

    /// Files listing datasets that are never processed.
    #[arg(
        long,
        env,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = file_exist::is_file_exist,
        help_heading = "Policy"
    )]
    pub notinfiles: Vec<String>,

    // -----------------------------------------------------------------------
    // Action options
    // -----------------------------------------------------------------------
    /// Destination site patterns. Required for replicate, delete, update and upload.
    #[arg(
        short = 'r',
        long,
        env,
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Action"
    )]
    pub rses: Vec<String>,

    /// Lifetime in seconds of created or updated rules.
    #[arg(short = 'l', long, env, default_value_t = DEFAULT_LIFETIME_SECONDS, help_heading = "Action")]
    pub lifetime: u64,

    /// Update only rules with less than this many seconds left.
    #[arg(long, env, help_heading = "Action")]
    pub maxlifeleft: Option<u64>,

    /// Directory to download into.
    #[arg(long, env, help_heading = "Action")]
    pub downto: Option<PathBuf>,

    // -----------------------------------------------------------------------
    // Upload options
    // -----------------------------------------------------------------------
    /// Directories laid out as <dir>/<dataset>/<file>.
    #[arg(long, env, num_args = 1.., value_delimiter = ',', help_heading = "Upload")]
    pub dirs: Vec<PathBuf>,

    /// JSON file mapping each dataset to the file paths it receives.
    #[arg(long, env, value_parser = file_exist::is_file_exist, help_heading = "Upload")]
    pub dsmap: Option<String>,

    /// Apply --regex to dataset names instead of file paths.
    #[arg(long, env, help_heading = "Upload")]
    pub filter_datasets: bool,

    /// Upload files on their own, outside any dataset.
    #[arg(long, env, help_heading = "Upload")]
    pub no_datasets: bool,

    // -----------------------------------------------------------------------
    // Monitor options
    // -----------------------------------------------------------------------
    /// File with one rule id per line, as written by a submitted run.
    #[arg(long, env, value_parser = file_exist::is_file_exist, help_heading = "Monitor")]
    pub rule_ids_file: Option<String>,

    // -----------------------------------------------------------------------
    // Catalog options
    // -----------------------------------------------------------------------
    /// Rucio server URL.
    #[arg(long, env, default_value = DEFAULT_RUCIO_URL, value_parser = url::check_scheme, help_heading = "Catalog")]
    pub rucio_url: String,

    /// Rucio account sent with every request.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Catalog")]
    pub rucio_account: Option<String>,

    /// Rucio auth token sent with every request.
    #[arg(long, env, hide_env_values = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "Catalog")]
    pub rucio_auth_token: Option<String>,

    /// PanDA server URL.
    #[arg(long, env, default_value = DEFAULT_PANDA_URL, value_parser = url::check_scheme, help_heading = "Catalog")]
    pub panda_url: String,

    /// Rucio command used for downloads and uploads.
    #[arg(long, env, default_value = DEFAULT_RUCIO_COMMAND, help_heading = "Catalog")]
    pub rucio_command: PathBuf,

    /// Request timeout in milliseconds for catalog and task queries.
    #[arg(long, env, help_heading = "Catalog")]
    pub timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Attempts for a replica listing that fails with a transport error.
    #[arg(long, env, default_value_t = DEFAULT_REPLICA_LISTING_ATTEMPTS, help_heading = "Retry")]
    pub replica_listing_attempts: u32,

    /// Interval in ms between replica listing attempts.
    #[arg(long, env, default_value_t = DEFAULT_REPLICA_LISTING_INTERVAL_MILLISECONDS, help_heading = "Retry")]
    pub replica_listing_interval_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use dsrule_rs::config::args::parse_from_args;
///
/// let args = vec!["dsrule", "find", "--regex", "user.jdoe.*", "--scopes", "user.jdoe"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(!cli_args.submit);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
///
/// Convenience function that combines `parse_from_args` and `Config::try_from`.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

fn compile_patterns(sources: &[String]) -> Result<PatternSet, String> {
    PatternSet::new(sources).map_err(|e| e.to_string())
}

fn compile_optional_patterns(sources: &Option<Vec<String>>) -> Result<Option<PatternSet>, String> {
    sources.as_deref().map(compile_patterns).transpose()
}

fn to_paths(paths: &[String]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.action != Action::Monitor && self.regex.is_empty() {
            return Err(ERROR_MESSAGE_REGEX_REQUIRED.to_string());
        }
        if self.action.requires_sites() && self.rses.is_empty() {
            return Err(format!(
                "--rses must be specified for action {}.",
                self.action.as_str()
            ));
        }

        match self.action {
            Action::Monitor => {
                if self.rule_ids_file.is_none() {
                    return Err(ERROR_MESSAGE_RULE_IDS_FILE_REQUIRED.to_string());
                }
            }
            Action::Upload => self.validate_upload()?,
            _ => self.validate_selection()?,
        }

        if self.action == Action::Download && self.submit && self.downto.is_none() {
            return Err(ERROR_MESSAGE_DOWNLOAD_DIR_REQUIRED.to_string());
        }
        Ok(())
    }

    fn validate_selection(&self) -> Result<(), String> {
        if !self.fromfiles.is_empty() && !self.usetasks.is_empty() {
            return Err(ERROR_MESSAGE_FROMFILES_AND_USETASKS.to_string());
        }
        if !self.usetasks.is_empty() {
            if self.dataset_type.is_none() {
                return Err(ERROR_MESSAGE_USETASKS_WITHOUT_TYPE.to_string());
            }
            if self.grid_user.is_empty() {
                return Err(ERROR_MESSAGE_USETASKS_WITHOUT_USER.to_string());
            }
        }
        if self.fromfiles.is_empty() && self.usetasks.is_empty() && self.scopes.is_empty() {
            return Err(ERROR_MESSAGE_NO_SOURCE.to_string());
        }
        Ok(())
    }

    fn validate_upload(&self) -> Result<(), String> {
        if !self.dirs.is_empty() && !self.fromfiles.is_empty() {
            return Err(ERROR_MESSAGE_UPLOAD_DIRS_AND_FROMFILES.to_string());
        }
        if self.dirs.is_empty() && self.fromfiles.is_empty() {
            return Err(ERROR_MESSAGE_UPLOAD_NO_SOURCE.to_string());
        }
        if self.dsmap.is_some() && self.no_datasets {
            return Err(ERROR_MESSAGE_UPLOAD_DSMAP_AND_NO_DATASETS.to_string());
        }
        if self.scopes.is_empty() {
            return Err(ERROR_MESSAGE_UPLOAD_NO_SCOPES.to_string());
        }
        Ok(())
    }

    fn build_selection(&self) -> Result<Option<SelectionSource>, String> {
        if !self.action.is_selection_driven() {
            return Ok(None);
        }

        let selection = if !self.fromfiles.is_empty() {
            SelectionSource::Files {
                paths: to_paths(&self.fromfiles),
            }
        } else if let Some(dataset_type) = self.dataset_type.filter(|_| !self.usetasks.is_empty()) {
            let statuses = if self.usetasks.iter().any(|status| status == ANY_TASK_STATUS) {
                None
            } else {
                Some(self.usetasks.join("|"))
            };
            let did_patterns = if self.did.is_empty() {
                None
            } else {
                Some(compile_patterns(&self.did)?)
            };

            SelectionSource::Tasks(TaskQuery {
                users: self.grid_user.clone(),
                days: self.days,
                statuses,
                role: dataset_type.into(),
                did_patterns,
                match_files: self.matchfiles,
            })
        } else {
            SelectionSource::Catalog {
                scopes: self.scopes.clone(),
            }
        };
        Ok(Some(selection))
    }

    fn build_copy_requirement(&self) -> Result<CopyRequirement, String> {
        Ok(CopyRequirement::new(
            compile_optional_patterns(&self.rule_on_rse)?,
            compile_optional_patterns(&self.replica_on_rse)?,
            self.rule_or_replica_on_rse,
            compile_optional_patterns(&self.norulehist_on_rse)?,
            self.contrulereq,
        ))
    }

    fn build_upload_config(&self) -> Option<UploadConfig> {
        if self.action != Action::Upload {
            return None;
        }

        let source = if self.dirs.is_empty() {
            UploadSource::Files(to_paths(&self.fromfiles))
        } else {
            UploadSource::Dirs(self.dirs.clone())
        };

        Some(UploadConfig {
            source,
            scopes: self.scopes.clone(),
            dataset_map: self.dsmap.as_ref().map(PathBuf::from),
            filter_datasets: self.filter_datasets,
            no_datasets: self.no_datasets,
        })
    }

    fn build_client_config(&self) -> Option<ClientConfig> {
        Some(ClientConfig {
            rucio_url: self.rucio_url.clone(),
            credentials: RucioCredentials {
                account: self.rucio_account.clone(),
                auth_token: self.rucio_auth_token.clone(),
            },
            panda_url: self.panda_url.clone(),
            rucio_command: self.rucio_command.clone(),
            timeout_milliseconds: self.timeout_milliseconds,
        })
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let name_patterns = compile_patterns(&args.regex)?;
        let rse_patterns = compile_patterns(&args.rses)?;
        let selection = args.build_selection()?;
        let copy_requirement = args.build_copy_requirement()?;
        let upload = args.build_upload_config();
        let client_config = args.build_client_config();
        let tracing_config = args.build_tracing_config();

        let rule_ids_file = args.rule_ids_file.as_ref().map(PathBuf::from);

        Ok(Config {
            action: args.action,
            submit: args.submit,
            force: args.force,
            show_no_progress: args.show_no_progress,
            name_patterns,
            rse_patterns,
            selection,
            container_mode: args.containers,
            production: args.prod,
            copy_requirement,
            exclusion_files: to_paths(&args.notinfiles),
            lifetime_seconds: args.lifetime,
            max_lifetime_left_seconds: args.maxlifeleft,
            outdir: args.outdir,
            no_scope_in_output: args.no_scope_in_output,
            download_dir: args.downto,
            upload,
            rule_ids_file,
            client_config,
            replica_listing_retry_config: ReplicaListingRetryConfig {
                attempts: args.replica_listing_attempts,
                interval_milliseconds: args.replica_listing_interval_milliseconds,
            },
            tracing_config,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
