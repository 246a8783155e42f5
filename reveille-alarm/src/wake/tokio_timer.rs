use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ScheduledWake, WakeTimer, WakeTimerError};
use crate::alarm::AlarmId;
use crate::clock::Clock;
use crate::tracing::prelude::*;

/// A sleeping wake task. `generation` tells a task whether its entry has
/// since been replaced by a newer arm for the same alarm.
struct Pending {
    generation: u64,
    token: CancellationToken,
}

type PendingMap = Arc<Mutex<HashMap<AlarmId, Pending>>>;

/// In-process wake timer backed by tokio sleeps.
///
/// The delay is measured against the clock when the wake is armed. Wall
/// clock jumps after that are not observed by the sleep itself; the time
/// watcher reports them and the scheduler re-arms.
pub struct TokioWakeTimer {
    clock: Arc<dyn Clock>,
    wake_tx: mpsc::Sender<AlarmId>,
    pending: PendingMap,
    generations: AtomicU64,
}

impl TokioWakeTimer {
    pub fn new(clock: Arc<dyn Clock>, wake_tx: mpsc::Sender<AlarmId>) -> Self {
        Self {
            clock,
            wake_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Create a timer together with the receiving end of its wake channel.
    pub fn channel(clock: Arc<dyn Clock>, capacity: usize) -> (Self, mpsc::Receiver<AlarmId>) {
        let (wake_tx, wake_rx) = mpsc::channel(capacity);
        (Self::new(clock, wake_tx), wake_rx)
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Drop the entry for `id` unless a newer arm replaced it.
fn release(pending: &PendingMap, id: AlarmId, generation: u64) {
    let mut pending = pending.lock();
    if pending
        .get(&id)
        .is_some_and(|entry| entry.generation == generation)
    {
        pending.remove(&id);
    }
}

#[async_trait]
impl WakeTimer for TokioWakeTimer {
    async fn arm(&self, wake: ScheduledWake) -> Result<(), WakeTimerError> {
        if self.wake_tx.is_closed() {
            return Err(WakeTimerError::Closed);
        }

        let delay = (wake.at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let entry = Pending {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.pending.lock().insert(wake.id, entry) {
            previous.token.cancel();
        }

        trace!(id = %wake.id, kind = %wake.kind, delay_ms = delay.as_millis(), "Wake armed");

        let wake_tx = self.wake_tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if wake_tx.send(wake.id).await.is_err() {
                        debug!(id = %wake.id, "Wake dropped, receiver gone");
                    }
                    release(&pending, wake.id, generation);
                }
            }
        });

        Ok(())
    }

    async fn cancel(&self, id: AlarmId) -> Result<(), WakeTimerError> {
        if let Some(entry) = self.pending.lock().remove(&id) {
            entry.token.cancel();
            trace!(id = %id, "Wake cancelled");
        }
        Ok(())
    }
}
