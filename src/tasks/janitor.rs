use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::store::TaskStore;

/// Deletes every task not updated within `retention`, whatever its status.
/// Returns how many were removed.
pub(crate) fn sweep(store: &TaskStore, retention: time::Duration) -> usize {
    let mut evicted = 0;
    for id in store.list_older_than(retention) {
        if store.delete(id) {
            tracing::info!(task_id = %id, "Evicted stale task");
            evicted += 1;
        }
    }

    if evicted > 0 {
        metrics::counter!("ocr_tasks_evicted_total").increment(evicted as u64);
    }
    evicted
}

pub(crate) async fn run(
    store: TaskStore,
    retention: time::Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let evicted = sweep(&store, retention);
                tracing::debug!(evicted, remaining = store.counts().total, "Janitor sweep done");
            }
        }
    }

    tracing::info!("Janitor stopped");
}
