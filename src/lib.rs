/*!
# Overview
dsrule-rs selects Rucio datasets in bulk and manages their replication rules.

Datasets are selected from PanDA task records, catalog listings or plain
lists, filtered against what the catalog already holds (rules, full replicas,
rule history, parent-container rules) and then found, replicated, deleted,
updated, downloaded, listed or uploaded.

## Features
- **Three dataset sources**: task records, catalog scope listings, list files
- **Container-level deduplication** and input/output file-count reconciliation for task records
- **Copy policy**: rule-on-site, replica-on-site, AND/OR combination, rule-history veto, container fallback
- **Dry run by default**: nothing is submitted without `--submit`
- **Monitoring files**: paired dataset / rule-id lists and a JSON summary per run
- **Library-First**: the `dsrule` CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
dsrule-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use dsrule_rs::config::Config;
use dsrule_rs::config::args::parse_from_args;
use dsrule_rs::pipeline::ActionPipeline;
use dsrule_rs::storage::create_collaborators;

#[tokio::main]
async fn main() {
    let args = vec![
        "dsrule",
        "find",
        "--regex",
        "user.jdoe.mc23.*",
        "--scopes",
        "user.jdoe",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let collaborators = create_collaborators(config.client_config.as_ref().unwrap()).unwrap();
    let mut pipeline = ActionPipeline::new(config, collaborators);
    pipeline.close_stats_sender();
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod config;
pub mod dispatcher;
pub mod extractor;
pub mod filters;
pub mod oracle;
pub mod pattern;
pub mod pipeline;
pub mod resolver;
pub mod safety;
pub mod source;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use pipeline::ActionPipeline;
pub use types::error::{DsRuleError, exit_code_from_error, is_cancelled_error};
pub use types::{ActionStatistics, Did, ScopeDatasetSet};
