//! Shared end-to-end test infrastructure for dsrule-rs.
//!
//! Provides `TestHelper`, which runs the action pipeline against an
//! in-process mock of the catalog and task services.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;
use tempfile::TempDir;

use dsrule_rs::config::args::build_config_from_args;
use dsrule_rs::dispatcher::report::ActionReport;
use dsrule_rs::storage::create_collaborators;
use dsrule_rs::{ActionPipeline, ActionStatistics, Config, exit_code_from_error};

pub const ACCOUNT: &str = "jdoe";
pub const AUTH_TOKEN: &str = "e2e-token";

/// Result of running an action pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    pub report: Option<ActionReport>,
    pub has_error: bool,
    pub has_warning: bool,
    /// Error messages collected from the pipeline (empty if no errors).
    pub errors: Vec<String>,
    /// Highest exit code among the collected errors, 0 when there were none.
    pub exit_code: i32,
    pub stats: Vec<ActionStatistics>,
}

pub struct TestHelper {
    pub server: MockServer,
    outdir: TempDir,
    inputs: TempDir,
}

impl TestHelper {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start_async().await,
            outdir: TempDir::new().unwrap(),
            inputs: TempDir::new().unwrap(),
        }
    }

    pub fn outdir(&self) -> &Path {
        self.outdir.path()
    }

    /// Write a list file with one entry per line and return its path.
    pub fn write_list_file(&self, file_name: &str, lines: &[&str]) -> PathBuf {
        let path = self.inputs.path().join(file_name);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    /// Build a config from command line arguments, pointing both services at
    /// the mock server and the output directory at a scratch directory.
    pub fn build_config(&self, args: Vec<&str>) -> Config {
        let base_url = self.server.base_url();
        let outdir = self.outdir.path().to_string_lossy().to_string();

        let mut full_args = vec!["dsrule"];
        full_args.extend(args);
        full_args.extend([
            "--rucio-url",
            &base_url,
            "--panda-url",
            &base_url,
            "--rucio-account",
            ACCOUNT,
            "--rucio-auth-token",
            AUTH_TOKEN,
            "--outdir",
            &outdir,
            "--show-no-progress",
        ]);

        build_config_from_args(full_args).unwrap()
    }

    pub async fn run_pipeline(&self, config: Config) -> PipelineResult {
        let collaborators = create_collaborators(config.client_config.as_ref().unwrap()).unwrap();
        let mut pipeline = ActionPipeline::new(config, collaborators);
        let receiver = pipeline.get_stats_receiver();

        pipeline.close_stats_sender();
        pipeline.run().await;

        let mut stats = Vec::new();
        while let Ok(stat) = receiver.try_recv() {
            stats.push(stat);
        }

        let has_error = pipeline.has_error();
        let errors = pipeline.get_errors_and_consume().unwrap_or_default();
        PipelineResult {
            report: pipeline.get_report().cloned(),
            has_error,
            has_warning: pipeline.has_warning(),
            exit_code: errors.iter().map(exit_code_from_error).max().unwrap_or(0),
            errors: errors.iter().map(|e| format!("{e:#}")).collect(),
            stats,
        }
    }

    // -----------------------------------------------------------------------
    // Catalog mocks
    // -----------------------------------------------------------------------

    pub fn mock_sites(&self, sites: &[&str]) -> Mock<'_> {
        let body: String = sites
            .iter()
            .map(|site| format!("{}\n", json!({"rse": site, "rse_type": "DISK"})))
            .collect();
        self.server.mock(|when, then| {
            when.method(GET)
                .path("/rses/")
                .header("X-Rucio-Auth-Token", AUTH_TOKEN)
                .header("X-Rucio-Account", ACCOUNT);
            then.status(200).body(body);
        })
    }

    /// Register a dataset with its files (name, bytes) and no parent container.
    pub fn mock_dataset(&self, scope: &str, name: &str, files: &[(&str, u64)]) {
        let base = format!("/dids/{scope}/{name}");

        self.server.mock(|when, then| {
            when.method(GET).path(format!("{base}/meta"));
            then.status(200).json_body(json!({"did_type": "DATASET"}));
        });
        self.server.mock(|when, then| {
            when.method(GET).path(format!("{base}/parents"));
            then.status(200).body("");
        });

        let body: String = files
            .iter()
            .map(|(file, bytes)| format!("{}\n", json!({"scope": scope, "name": file, "bytes": bytes})))
            .collect();
        self.server.mock(|when, then| {
            when.method(GET).path(format!("{base}/files"));
            then.status(200).body(body);
        });
    }

    /// Active rules of a dataset, as (rule id, site) pairs.
    pub fn mock_rules(&self, scope: &str, name: &str, rules: &[(&str, &str)]) -> Mock<'_> {
        let body: String = rules
            .iter()
            .map(|(id, site)| {
                format!(
                    "{}\n",
                    json!({"id": id, "rse_expression": site, "expires_at": null})
                )
            })
            .collect();
        self.server.mock(|when, then| {
            when.method(GET).path(format!("/dids/{scope}/{name}/rules"));
            then.status(200).body(body);
        })
    }

    pub fn mock_create_rule(
        &self,
        scope: &str,
        name: &str,
        site: &str,
        lifetime_seconds: u64,
        rule_id: &str,
    ) -> Mock<'_> {
        let body = json!({
            "dids": [{"scope": scope, "name": name}],
            "copies": 1,
            "rse_expression": site,
            "lifetime": lifetime_seconds,
            "account": ACCOUNT,
        });
        self.server.mock(|when, then| {
            when.method(POST).path("/rules/").json_body(body);
            then.status(201).json_body(json!([rule_id]));
        })
    }
}

/// Lines of a monitoring file.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}
