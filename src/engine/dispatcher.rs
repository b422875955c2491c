//! Bounded worker pool — one pipeline per message.
//!
//! A single dispatch loop pulls from the intake queue and spawns up to
//! `max_workers` concurrent per-message pipelines, bounded by a
//! semaphore. The in-flight map is owned here and handed to workers; no
//! ambient global state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::executor::Executor;
use crate::intake::DedupQueue;

/// How often the dispatch loop wakes to re-check the shutdown flag while
/// the queue is idle.
const IDLE_WAKEUP: Duration = Duration::from_millis(500);

/// Spawn the dispatcher loop.
///
/// In-flight dedup is keyed by the message *subject*, not its id: two
/// distinct messages sharing a subject line are treated as one in-flight
/// unit and the later one is discarded. Intake dedup (by id) happens
/// earlier, in `DedupQueue`; the two layers can disagree.
///
/// Returns a `JoinHandle` and a shutdown flag. Setting the flag stops
/// dispatching; workers already running finish on their own.
pub fn spawn_dispatcher(
    queue: Arc<DedupQueue>,
    executor: Arc<Executor>,
    max_workers: usize,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(max_workers, "Dispatcher started");

        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let permits = Arc::new(Semaphore::new(max_workers));

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Dispatcher shutting down");
                return;
            }

            let message = tokio::select! {
                message = queue.dequeue() => message,
                _ = tokio::time::sleep(IDLE_WAKEUP) => continue,
            };

            let key = message.subject.clone();
            {
                let mut guard = in_flight.lock().unwrap();
                if !guard.insert(key.clone()) {
                    info!(subject = %key, id = %message.id, "subject already in flight, message discarded");
                    continue;
                }
            }

            // Completed workers free their permit; waiting here is the
            // backpressure that bounds concurrency.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return;
            };

            let executor = Arc::clone(&executor);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                match executor.process_message(&message).await {
                    Ok(outcome) => {
                        info!(id = %message.id, outcome = ?outcome, "pipeline finished");
                    }
                    Err(e) => {
                        // Contained: a failed pipeline never aborts
                        // siblings or the dispatcher.
                        error!(id = %message.id, subject = %message.subject, error = %e, "pipeline failed");
                    }
                }
                // Release the dedup key regardless of outcome.
                in_flight.lock().unwrap().remove(&key);
                drop(permit);
            });
        }
    });

    (handle, shutdown_flag)
}
