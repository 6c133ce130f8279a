// Progress indicator for a dsrule run.
//
// Reads ActionStatistics from an async channel and keeps a one-line
// progress display up to date, with a moving average of datasets per second.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use dsrule_rs::types::ActionStatistics;
use indicatif::{HumanBytes, HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Summary returned by [`show_indicator`] after the stats channel closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub total_complete_count: u64,
    pub total_bytes: u64,
    pub total_error_count: u64,
    pub total_skip_count: u64,
    pub total_warning_count: u64,
}

/// Moving average window in seconds (samples).
const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn a background task that reads action statistics from the channel
/// and displays progress using indicatif.
///
/// The task runs until `stats_receiver` is closed. Returns a `JoinHandle`
/// that should be awaited after the pipeline finishes.
pub fn show_indicator(
    stats_receiver: Receiver<ActionStatistics>,
    show_progress: bool,
    show_result: bool,
    dry_run: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_complete_count = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();

        let mut total_complete_count: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut total_error_count: u64 = 0;
        let mut total_skip_count: u64 = 0;
        let mut total_warning_count: u64 = 0;

        loop {
            let mut period_count: u64 = 0;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    match stats {
                        ActionStatistics::ActionComplete { .. } => {
                            period_count += 1;
                            total_complete_count += 1;
                        }
                        ActionStatistics::ActionBytes(size) => {
                            total_bytes += size;
                        }
                        ActionStatistics::ActionError { .. } => {
                            total_error_count += 1;
                        }
                        ActionStatistics::ActionSkip { .. } => {
                            total_skip_count += 1;
                        }
                        ActionStatistics::ActionWarning { .. } => {
                            total_warning_count += 1;
                        }
                    }
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() && stats_receiver.is_empty() {
                    let elapsed = start_time.elapsed();
                    let elapsed_secs_f64 = elapsed.as_secs_f64();

                    info!(
                        message = "action summary",
                        processed = total_complete_count,
                        bytes = total_bytes,
                        skipped = total_skip_count,
                        error = total_error_count,
                        warning = total_warning_count,
                        dry_run = dry_run,
                        duration_sec = elapsed_secs_f64,
                    );

                    if show_result {
                        if let Ok(result_style) = ProgressStyle::with_template("{msg}") {
                            progress_text.set_style(result_style);
                        }

                        let mode = if dry_run { " (dry run)" } else { "" };
                        progress_text.finish_with_message(format!(
                            "processed {:>3} datasets{mode},  skipped {},  error {},  warning {},  size {:>3},  duration {}",
                            HumanCount(total_complete_count),
                            total_skip_count,
                            total_error_count,
                            total_warning_count,
                            HumanBytes(total_bytes),
                            HumanDuration(elapsed),
                        ));

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return IndicatorSummary {
                        total_complete_count,
                        total_bytes,
                        total_error_count,
                        total_skip_count,
                        total_warning_count,
                    };
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            ma_complete_count.add_sample(period_count);

            if show_progress {
                progress_text.set_message(format!(
                    "processed {:>3} datasets | {:>3} datasets/sec,  skipped {},  error {},  warning {},  size {:>3}",
                    HumanCount(total_complete_count),
                    HumanCount(ma_complete_count.get_average()),
                    total_skip_count,
                    total_error_count,
                    total_warning_count,
                    HumanBytes(total_bytes),
                ));
            }
        }
    })
}
