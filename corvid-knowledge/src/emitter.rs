//! Simulated ingestion backend.
//!
//! One task per item emits bounded-random progress deltas over the event
//! channel until the next delta would reach 100, then exactly one terminal
//! event; 100 is reported only by the terminal transition.
//! The registry side re-checks item existence on every consumed event, so
//! a tick racing a removal is harmless. A real backend replaces this by
//! feeding the same `IngestEvent`s from a webhook or poll loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use corvid_core::IngestSettings;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::models::{IngestEvent, JobOutcome};

pub struct ProgressEmitter {
    events: mpsc::UnboundedSender<IngestEvent>,
    tasks: Mutex<HashMap<String, AbortHandle>>,
    tick_interval: Duration,
    step_min: u8,
    step_max: u8,
    failure_rate: f64,
    rng_seed: Option<u64>,
    started: AtomicU64,
}

impl ProgressEmitter {
    pub fn new(settings: &IngestSettings, events: mpsc::UnboundedSender<IngestEvent>) -> Self {
        // Normalize degenerate bounds so a tick always makes progress.
        let step_min = settings.step_min.max(1);
        let step_max = settings.step_max.max(step_min);

        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            step_min,
            step_max,
            failure_rate: settings.failure_rate.clamp(0.0, 1.0),
            rng_seed: settings.rng_seed,
            started: AtomicU64::new(0),
        }
    }

    /// Schedule recurring progress increments for one item. Items progress
    /// fully independently; N started items advance in parallel.
    pub fn start(&self, item_id: &str) {
        let nth = self.started.fetch_add(1, Ordering::Relaxed);
        let mut rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(nth)),
            None => StdRng::from_entropy(),
        };

        let events = self.events.clone();
        let item_id_owned = item_id.to_string();
        let tick_interval = self.tick_interval;
        let step_min = self.step_min;
        let step_max = self.step_max;
        let fails = rng.gen_bool(self.failure_rate);

        let handle = tokio::spawn(async move {
            let mut total: u32 = 0;
            loop {
                sleep(tick_interval).await;
                let delta = rng.gen_range(step_min..=step_max);
                total += u32::from(delta);

                // The tick that would reach 100 is folded into the terminal
                // event: only the terminal transition ever reports 100.
                if total >= 100 {
                    let outcome = if fails {
                        JobOutcome::Failed
                    } else {
                        JobOutcome::Completed
                    };
                    let _ = events.send(IngestEvent::Terminal {
                        item_id: item_id_owned,
                        outcome,
                    });
                    return;
                }

                if events
                    .send(IngestEvent::Progress {
                        item_id: item_id_owned.clone(),
                        delta,
                    })
                    .is_err()
                {
                    // Consumer gone, controller shut down.
                    return;
                }
            }
        });

        if let Some(previous) = self
            .tasks_lock()
            .insert(item_id.to_string(), handle.abort_handle())
        {
            debug!(item_id, "replacing emitter task for item");
            previous.abort();
        }
    }

    /// Halt future ticks for one item without emitting a terminal event.
    pub fn cancel(&self, item_id: &str) {
        if let Some(handle) = self.tasks_lock().remove(item_id) {
            handle.abort();
        }
    }

    fn tasks_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ProgressEmitter {
    fn drop(&mut self) {
        for handle in self.tasks_lock().values() {
            handle.abort();
        }
    }
}
