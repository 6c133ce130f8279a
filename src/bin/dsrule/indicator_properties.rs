// Property-based tests for the progress indicator.

#[cfg(test)]
mod tests {
    use crate::indicator::{IndicatorSummary, show_indicator};
    use dsrule_rs::types::ActionStatistics;
    use proptest::prelude::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Event {
        Complete,
        Bytes(u64),
        Error,
        Skip,
        Warning,
    }

    impl Event {
        fn to_stats(self, index: usize) -> ActionStatistics {
            let did = format!("user.jdoe:user.jdoe.ds{index}");
            match self {
                Event::Complete => ActionStatistics::ActionComplete { did },
                Event::Bytes(size) => ActionStatistics::ActionBytes(size),
                Event::Error => ActionStatistics::ActionError { did },
                Event::Skip => ActionStatistics::ActionSkip { did },
                Event::Warning => ActionStatistics::ActionWarning { did },
            }
        }
    }

    fn arb_events() -> impl Strategy<Value = Vec<Event>> {
        prop::collection::vec(
            prop_oneof![
                Just(Event::Complete),
                (1u64..=10_000u64).prop_map(Event::Bytes),
                Just(Event::Error),
                Just(Event::Skip),
                Just(Event::Warning),
            ],
            0..50,
        )
    }

    fn expected_summary(events: &[Event]) -> IndicatorSummary {
        let count = |wanted: fn(&Event) -> bool| events.iter().filter(|event| wanted(event)).count() as u64;
        IndicatorSummary {
            total_complete_count: count(|event| matches!(event, Event::Complete)),
            total_bytes: events
                .iter()
                .map(|event| match event {
                    Event::Bytes(size) => *size,
                    _ => 0,
                })
                .sum(),
            total_error_count: count(|event| matches!(event, Event::Error)),
            total_skip_count: count(|event| matches!(event, Event::Skip)),
            total_warning_count: count(|event| matches!(event, Event::Warning)),
        }
    }

    fn run_indicator(events: &[Event], show_progress: bool, show_result: bool, dry_run: bool) -> IndicatorSummary {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let (sender, receiver) = async_channel::unbounded();
            for (index, event) in events.iter().enumerate() {
                sender.send(event.to_stats(index)).await.unwrap();
            }
            drop(sender);

            let handle = show_indicator(receiver, show_progress, show_result, dry_run);
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("indicator should complete within timeout")
                .expect("indicator task should not panic")
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Once the channel closes, the indicator completes and its totals
        /// account for every event sent.
        #[test]
        fn prop_indicator_counts_every_event(
            events in arb_events(),
            show_progress in proptest::bool::ANY,
            show_result in proptest::bool::ANY,
            dry_run in proptest::bool::ANY,
        ) {
            let summary = run_indicator(&events, show_progress, show_result, dry_run);
            prop_assert_eq!(summary, expected_summary(&events));
        }
    }
}
