//! Property-based tests for the submission confirmation.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    use crate::config::{Action, Config, TracingConfig};
    use crate::safety::{PromptHandler, SafetyChecker};
    use crate::types::error::DsRuleError;
    use anyhow::Result;
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Mock PromptHandlers
    // -----------------------------------------------------------------------

    /// Returns a fixed answer and records every summary it was shown.
    /// Always reports as interactive so that prompt logic is exercised.
    #[derive(Clone)]
    struct MockPromptHandler {
        response: String,
        shown: Arc<Mutex<Vec<String>>>,
    }

    impl MockPromptHandler {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                shown: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.shown.lock().unwrap().clone()
        }
    }

    impl PromptHandler for MockPromptHandler {
        fn read_confirmation(&self, summary: &str) -> Result<String> {
            self.shown.lock().unwrap().push(summary.to_string());
            Ok(self.response.clone())
        }

        fn is_interactive(&self) -> bool {
            true
        }
    }

    struct NonInteractivePromptHandler;

    impl PromptHandler for NonInteractivePromptHandler {
        fn read_confirmation(&self, _summary: &str) -> Result<String> {
            Ok("no".to_string())
        }

        fn is_interactive(&self) -> bool {
            false
        }
    }

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn make_config(action: Action, submit: bool, force: bool, json_tracing: bool) -> Config {
        Config {
            action,
            submit,
            force,
            tracing_config: Some(TracingConfig {
                tracing_level: log::Level::Info,
                json_tracing,
                span_events_tracing: false,
                disable_color_tracing: false,
            }),
            ..Config::default()
        }
    }

    fn sites() -> BTreeSet<String> {
        BTreeSet::from(["SITE_A_DISK".to_string()])
    }

    fn arbitrary_action() -> impl Strategy<Value = Action> {
        prop_oneof![
            Just(Action::Find),
            Just(Action::Replicate),
            Just(Action::Delete),
            Just(Action::Update),
            Just(Action::Download),
            Just(Action::Listfiles),
            Just(Action::Upload),
            Just(Action::Monitor),
        ]
    }

    // -----------------------------------------------------------------------
    // Dry runs and read-only actions never prompt.
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_unsubmitted_or_read_only_runs_skip_confirmation(
            action in arbitrary_action(),
            submit in any::<bool>(),
            force in any::<bool>(),
        ) {
            prop_assume!(!submit || !action.needs_confirmation());

            let handler = MockPromptHandler::new("no");
            let config = make_config(action, submit, force, false);
            let checker = SafetyChecker::with_prompt_handler(&config, Box::new(handler.clone()));

            prop_assert!(checker.check_before_submission(&sites()).is_ok());
            prop_assert!(handler.prompts().is_empty());
        }
    }

    // -----------------------------------------------------------------------
    // Only the exact string "yes" confirms.
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_only_exact_yes_accepted(
            input in "[a-zA-Z0-9 ]{0,20}",
        ) {
            prop_assume!(input.trim() != "yes");

            let config = make_config(Action::Delete, true, false, false);
            let checker = SafetyChecker::with_prompt_handler(&config, Box::new(MockPromptHandler::new(&input)));

            let err = checker.check_before_submission(&sites()).unwrap_err();
            prop_assert_eq!(err.downcast_ref::<DsRuleError>(), Some(&DsRuleError::Cancelled));
        }
    }

    // -----------------------------------------------------------------------
    // --force skips the prompt whatever the logging mode.
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_force_skips_confirmation(
            json_tracing in any::<bool>(),
        ) {
            let handler = MockPromptHandler::new("no");
            let config = make_config(Action::Replicate, true, true, json_tracing);
            let checker = SafetyChecker::with_prompt_handler(&config, Box::new(handler.clone()));

            prop_assert!(checker.check_before_submission(&sites()).is_ok());
            prop_assert!(handler.prompts().is_empty());
        }
    }

    // -----------------------------------------------------------------------
    // Unit tests for edge cases
    // -----------------------------------------------------------------------

    #[test]
    fn exact_yes_is_accepted_and_summary_shown() {
        let handler = MockPromptHandler::new("yes");
        let config = make_config(Action::Update, true, false, false);
        let checker = SafetyChecker::with_prompt_handler(&config, Box::new(handler.clone()));

        assert!(checker.check_before_submission(&sites()).is_ok());
        assert_eq!(
            handler.prompts(),
            vec!["About to update rules on 1 site(s): SITE_A_DISK".to_string()]
        );
    }

    #[test]
    fn json_logging_skips_prompt() {
        let handler = MockPromptHandler::new("no");
        let config = make_config(Action::Delete, true, false, true);
        let checker = SafetyChecker::with_prompt_handler(&config, Box::new(handler.clone()));

        assert!(checker.check_before_submission(&sites()).is_ok());
        assert!(handler.prompts().is_empty());
    }

    #[test]
    fn non_interactive_environment_skips_prompt() {
        let config = make_config(Action::Upload, true, false, false);
        let checker = SafetyChecker::with_prompt_handler(&config, Box::new(NonInteractivePromptHandler));

        assert!(checker.check_before_submission(&sites()).is_ok());
    }
}
