/// Async driver for tail sessions.
///
/// Each session gets its own task. Ticks run on the blocking pool because
/// probes and fetches are blocking HTTP calls; between ticks the task sleeps
/// without holding a thread.

use crate::session::{TailSession, TickOutcome};

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Poll `session` forever. Only process shutdown stops it.
pub async fn run(mut session: TailSession) {
    let interval = session.poll_interval();
    log::info!(
        "Tailing {} from offset {} every {}s",
        session.locator(),
        session.offset(),
        interval.as_secs()
    );

    loop {
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = session.tick();
            (session, outcome)
        })
        .await;

        let (returned, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                // The session moved into the panicked task; nothing to resume.
                log::error!("Tail task panicked, session stopped: {e}");
                return;
            }
        };
        session = returned;

        if let Some(delay) = next_delay(outcome, interval) {
            sleep(delay).await;
        }
    }
}

/// Run a single tick for every session, one after another.
pub async fn run_once(sessions: Vec<TailSession>) {
    for mut session in sessions {
        let result = tokio::task::spawn_blocking(move || {
            let outcome = session.tick();
            log::info!("{}: {outcome:?}", session.locator());
        })
        .await;
        if let Err(e) = result {
            log::error!("Tail task panicked: {e}");
        }
    }
}

/// Stop every session task, then wait for the writer to drain what they
/// already queued. A tick that is mid-fetch finishes first, since blocking
/// work cannot be cancelled; its session drops its sink when it returns.
pub async fn shutdown<T>(tasks: Vec<JoinHandle<()>>, writer: JoinHandle<T>) -> Option<T> {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("Tail task panicked: {e}"),
        }
    }
    match writer.await {
        Ok(out) => Some(out),
        Err(e) => {
            log::error!("Record writer failed: {e}");
            None
        }
    }
}

/// How long to wait after `outcome`; `None` means tick again right away.
pub fn next_delay(outcome: TickOutcome, interval: Duration) -> Option<Duration> {
    match outcome {
        TickOutcome::Advanced {
            more_pending: true, ..
        } => None,
        TickOutcome::Backoff(delay) => Some(delay),
        TickOutcome::Unchanged | TickOutcome::Advanced { .. } | TickOutcome::Skipped => {
            Some(interval)
        }
    }
}
