//! Confirmation before submitting actions that change catalog state.
//!
//! Replicate, delete, update and upload consume quota or remove data once
//! submitted. Before such a run starts the user must type exactly `yes`.
//! The prompt is skipped when:
//! - the run is a dry run (no `--submit`),
//! - `--force` is given,
//! - the environment is not interactive (no TTY on stdin/stdout),
//! - JSON logging is enabled, so structured output stays parseable.

#[cfg(test)]
mod safety_properties;

use std::collections::BTreeSet;
use std::io::{BufRead, IsTerminal, Write};

use anyhow::{Result, anyhow};

use crate::config::{Action, Config};
use crate::types::error::DsRuleError;

// ---------------------------------------------------------------------------
// PromptHandler trait (for testability)
// ---------------------------------------------------------------------------

/// Trait for handling user prompts, enabling testability.
///
/// The default implementation ([`StdioPromptHandler`]) uses stdin/stdout.
/// Tests can provide custom implementations to avoid blocking on user input.
pub trait PromptHandler: Send + Sync {
    /// Display `summary`, ask for confirmation and return the trimmed answer.
    fn read_confirmation(&self, summary: &str) -> Result<String>;

    /// Returns `true` if both stdin and stdout are connected to a TTY.
    fn is_interactive(&self) -> bool;
}

/// Default prompt handler using stdin/stdout.
pub struct StdioPromptHandler;

impl PromptHandler for StdioPromptHandler {
    fn read_confirmation(&self, summary: &str) -> Result<String> {
        println!("{summary}");
        print!("Type 'yes' to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

// ---------------------------------------------------------------------------
// SafetyChecker
// ---------------------------------------------------------------------------

pub struct SafetyChecker {
    action: Action,
    submit: bool,
    force: bool,
    lifetime_seconds: u64,
    json_logging: bool,
    prompt_handler: Box<dyn PromptHandler>,
}

impl SafetyChecker {
    /// Uses [`StdioPromptHandler`] for interactive prompts.
    pub fn new(config: &Config) -> Self {
        Self::with_prompt_handler(config, Box::new(StdioPromptHandler))
    }

    pub fn with_prompt_handler(config: &Config, prompt_handler: Box<dyn PromptHandler>) -> Self {
        let json_logging = config
            .tracing_config
            .map(|tc| tc.json_tracing)
            .unwrap_or(false);

        Self {
            action: config.action,
            submit: config.submit,
            force: config.force,
            lifetime_seconds: config.lifetime_seconds,
            json_logging,
            prompt_handler,
        }
    }

    /// Check preconditions before an action is submitted to `sites`.
    ///
    /// Returns `Err(DsRuleError::Cancelled)` if the user declines.
    pub fn check_before_submission(&self, sites: &BTreeSet<String>) -> Result<()> {
        if !self.action.needs_confirmation() || !self.submit {
            return Ok(());
        }

        if self.force {
            return Ok(());
        }

        if self.should_skip_prompt() {
            return Ok(());
        }

        self.prompt_confirmation(sites)
    }

    fn should_skip_prompt(&self) -> bool {
        self.json_logging || !self.prompt_handler.is_interactive()
    }

    fn prompt_confirmation(&self, sites: &BTreeSet<String>) -> Result<()> {
        let input = self
            .prompt_handler
            .read_confirmation(&confirmation_summary(self.action, sites, self.lifetime_seconds))?;

        if input != "yes" {
            return Err(anyhow!(DsRuleError::Cancelled));
        }

        Ok(())
    }
}

/// One-line description of what is about to be submitted.
pub fn confirmation_summary(action: Action, sites: &BTreeSet<String>, lifetime_seconds: u64) -> String {
    let site_list = sites.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
    match action {
        Action::Replicate | Action::Upload => format!(
            "About to {} with a lifetime of {lifetime_seconds} seconds on {} site(s): {site_list}",
            action.as_str(),
            sites.len()
        ),
        _ => format!(
            "About to {} rules on {} site(s): {site_list}",
            action.as_str(),
            sites.len()
        ),
    }
}
