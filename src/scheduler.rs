use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::program::Program;

const RETRY_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodic triggers: content source polls, the retry sweep over stuck
/// items and daily maintenance. Everything runs under the program's task
/// tracker and stops with the cancellation token.
pub fn start(program: &'static Program, token: CancellationToken) {
    program.tracker.spawn(schedule_content_sources(program, token.clone()));

    program.tracker.spawn(run_interval(
        token.clone(),
        RETRY_SWEEP_INTERVAL,
        move || program.retry_library(),
    ));

    program.tracker.spawn(run_interval(
        token.clone(),
        MAINTENANCE_INTERVAL,
        move || program.maintenance(),
    ));

    if let Some(repair_interval) = program.symlink_repair_interval() {
        tracing::info!(
            "Symlink repair sweep runs every {} hours",
            repair_interval.as_secs() / 3600
        );
        program.tracker.spawn(run_interval(
            token.clone(),
            repair_interval,
            move || program.repair_symlinks(),
        ));
    }
}

/// Each initialized content source polls on its own configured interval.
async fn schedule_content_sources(program: &'static Program, token: CancellationToken) {
    for (kind, interval) in program.content_source_intervals().await {
        tracing::debug!(
            "Scheduled {} to run every {} seconds",
            kind.name(),
            interval.as_secs()
        );
        let source_token = token.clone();
        program.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // a missed tick runs once, late polls never burst
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = source_token.cancelled() => break,
                    _ = ticker.tick() => program.poll_content_source(kind).await,
                }
            }
        });
    }
}

async fn run_interval<F, Fut>(token: CancellationToken, period: Duration, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately, skip it so boot stays quiet
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => task().await,
        }
    }
}
