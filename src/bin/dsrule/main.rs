use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, info, trace};

use dsrule_rs::config::{Action, Config};
use dsrule_rs::dispatcher::ActionReport;
use dsrule_rs::dispatcher::monitor::format_lock_status;
use dsrule_rs::storage::create_collaborators;
use dsrule_rs::{ActionPipeline, CLIArgs, exit_code_from_error, is_cancelled_error};

pub mod indicator;
#[cfg(test)]
mod indicator_properties;
mod tracing_init;
pub mod ui_config;

const EXIT_CODE_WARNING: i32 = 3;

/// dsrule - Bulk replication-rule management for Rucio datasets.
///
/// This binary is a thin wrapper over the dsrule-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "dsrule",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    run(config).await
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

/// Log every error; configuration errors end the process with their own code.
fn handle_errors(errors: Vec<anyhow::Error>, duration_sec: &str) -> Result<()> {
    let mut exit_code = 1;
    for err in &errors {
        if is_cancelled_error(err) {
            debug!("run cancelled by user.");
            return Ok(());
        }
        error!("{:#}", err);
        exit_code = exit_code.max(exit_code_from_error(err));
    }
    error!(duration_sec = duration_sec, "dsrule failed.");

    if exit_code != 1 {
        std::process::exit(exit_code);
    }
    Err(anyhow!("dsrule failed."))
}

fn print_report(action: Action, report: &ActionReport) {
    if action == Action::Monitor {
        for status in &report.lock_status {
            println!("{}", format_lock_status(status));
        }
    }

    let artifacts = &report.artifacts;
    if let Some(summary) = artifacts.summary.as_ref() {
        info!(
            summary = %summary.display(),
            dids = ?artifacts.dids,
            rule_ids = ?artifacts.rule_ids,
            replicas = ?artifacts.replicas,
            "monitoring files written."
        );
    }
}

async fn run(config: Config) -> Result<()> {
    let client_config = config
        .client_config
        .as_ref()
        .ok_or_else(|| anyhow!("no catalog configuration given"))?;
    let collaborators = create_collaborators(client_config)?;

    let start_time = tokio::time::Instant::now();
    debug!(action = config.action.as_str(), "dsrule pipeline start.");

    let mut pipeline = ActionPipeline::new(config.clone(), collaborators);

    // Sites are resolved and the prompt answered before the progress line appears.
    if let Err(e) = pipeline.check_prerequisites().await {
        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
        return handle_errors(vec![e], &duration_sec);
    }

    let indicator_join_handle = indicator::show_indicator(
        pipeline.get_stats_receiver(),
        ui_config::is_progress_indicator_needed(&config),
        ui_config::is_show_result_needed(&config),
        !config.submit,
    );

    pipeline.run().await;
    indicator_join_handle.await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    if pipeline.has_error() {
        let errors = pipeline.get_errors_and_consume().unwrap_or_default();
        return handle_errors(errors, &duration_sec);
    }

    if let Some(report) = pipeline.get_report() {
        print_report(config.action, report);
    }

    debug!(duration_sec = duration_sec, "dsrule has been completed.");

    if pipeline.has_warning() {
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}
