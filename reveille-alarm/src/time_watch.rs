//! Wall-clock change detection.
//!
//! Compares how far the wall clock moved against how far monotonic time
//! moved between two samples. A mismatch beyond the tolerance means the
//! clock was set (by hand, by NTP, or across a suspend) and is reported as
//! [`ClockEvent::TimeChanged`]. A different UTC offset is reported as
//! [`ClockEvent::TimezoneChanged`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, ClockEvent};
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Sample {
    wall: DateTime<Utc>,
    mono: Instant,
    offset: FixedOffset,
}

pub struct TimeWatcher {
    clock: Arc<dyn Clock>,
    period: Duration,
    tolerance: TimeDelta,
    events_tx: mpsc::Sender<ClockEvent>,
    last: Option<Sample>,
}

impl TimeWatcher {
    pub fn new(
        clock: Arc<dyn Clock>,
        period: Duration,
        tolerance: Duration,
        events_tx: mpsc::Sender<ClockEvent>,
    ) -> Self {
        Self {
            clock,
            period,
            tolerance: TimeDelta::from_std(tolerance).unwrap_or(TimeDelta::MAX),
            events_tx,
            last: None,
        }
    }

    pub async fn run(mut self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    for event in self.check() {
                        if self.events_tx.send(event).await.is_err() {
                            debug!("Clock event receiver gone; stopping time watcher");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Take a sample and report what changed since the previous one.
    pub fn check(&mut self) -> Vec<ClockEvent> {
        let sample = Sample {
            wall: self.clock.now(),
            mono: Instant::now(),
            offset: self.clock.utc_offset(),
        };
        let Some(last) = self.last.replace(sample) else {
            return Vec::new();
        };

        let mut events = Vec::new();

        let wall_elapsed = sample.wall - last.wall;
        let mono_elapsed =
            TimeDelta::from_std(sample.mono - last.mono).unwrap_or(TimeDelta::MAX);
        let drift = wall_elapsed - mono_elapsed;
        if drift.abs() > self.tolerance {
            info!(
                drift_secs = drift.num_seconds(),
                wall = %sample.wall,
                "Wall clock jumped"
            );
            events.push(ClockEvent::TimeChanged);
        }

        if sample.offset != last.offset {
            info!(from = %last.offset, to = %sample.offset, "UTC offset changed");
            events.push(ClockEvent::TimezoneChanged);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, TimeWatcher, mpsc::Receiver<ClockEvent>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 4, 6, 0, 0).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        ));
        let (tx, rx) = mpsc::channel(8);
        let watcher = TimeWatcher::new(
            clock.clone(),
            Duration::from_secs(10),
            Duration::from_secs(2),
            tx,
        );
        (clock, watcher, rx)
    }

    async fn elapse(clock: &ManualClock, secs: u64) {
        tokio::time::advance(Duration::from_secs(secs)).await;
        clock.advance(TimeDelta::seconds(secs as i64));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_clock_reports_nothing() {
        let (clock, mut watcher, _rx) = setup();
        assert!(watcher.check().is_empty());

        elapse(&clock, 10).await;
        assert!(watcher.check().is_empty());

        // Small drift within tolerance.
        elapse(&clock, 10).await;
        clock.advance(TimeDelta::seconds(1));
        assert!(watcher.check().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forward_jump_is_detected() {
        let (clock, mut watcher, _rx) = setup();
        watcher.check();

        elapse(&clock, 10).await;
        clock.advance(TimeDelta::hours(1));
        assert_eq!(watcher.check(), vec![ClockEvent::TimeChanged]);

        elapse(&clock, 10).await;
        assert!(watcher.check().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backward_jump_is_detected() {
        let (clock, mut watcher, _rx) = setup();
        watcher.check();

        elapse(&clock, 10).await;
        clock.advance(TimeDelta::minutes(-30));
        assert_eq!(watcher.check(), vec![ClockEvent::TimeChanged]);
    }

    #[tokio::test(start_paused = true)]
    async fn offset_change_is_detected() {
        let (clock, mut watcher, _rx) = setup();
        watcher.check();

        elapse(&clock, 10).await;
        clock.set_offset(FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(watcher.check(), vec![ClockEvent::TimezoneChanged]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sends_events() {
        let (clock, mut watcher, mut rx) = setup();
        watcher.check();
        clock.advance(TimeDelta::hours(1));
        clock.set_offset(FixedOffset::west_opt(3600).unwrap());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(cancel.clone()));

        assert_eq!(rx.recv().await, Some(ClockEvent::TimeChanged));
        assert_eq!(rx.recv().await, Some(ClockEvent::TimezoneChanged));

        cancel.cancel();
        task.await.unwrap();
    }
}
