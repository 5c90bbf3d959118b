//! Countdown and transform-push timers.
//!
//! A [`TimerScheduler`] owns at most one live [`TimerHandle`] per
//! [`TimerKind`]. Each live timer is a small tokio task that does nothing but
//! push [`TimerTick`]s into the session loop's tick channel; all state changes
//! happen in the loop when the tick is dispatched.
//!
//! Every handle carries a generation number. Cancelling a timer aborts its
//! task, and any tick it had already queued is rejected by
//! [`TimerScheduler::accept`] because its generation no longer matches. That
//! is what keeps "at most one live tick stream per kind" true even across a
//! restart.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Default countdown tick period.
pub const DEFAULT_COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Default delay between session start and the first transform push.
pub const DEFAULT_PUSH_WARMUP: Duration = Duration::from_secs(2);

/// Default transform push period.
pub const DEFAULT_PUSH_PERIOD: Duration = Duration::from_secs(2);

/// Default per-component perturbation bound for pushed transforms.
pub const DEFAULT_PUSH_JITTER: f64 = 0.05;

/// The two timers a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Per-second display of the server-advised remaining time.
    Countdown,
    /// Periodic perturb-and-send of the local transform.
    TransformPush,
}

/// One firing of a timer, delivered to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub kind: TimerKind,
    generation: u64,
}

/// Timing parameters for the session timers.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSettings {
    pub countdown_period: Duration,
    pub push_warmup: Duration,
    pub push_period: Duration,
    /// Bound of the uniform delta added to each transform component per push.
    pub push_jitter: f64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            countdown_period: DEFAULT_COUNTDOWN_PERIOD,
            push_warmup: DEFAULT_PUSH_WARMUP,
            push_period: DEFAULT_PUSH_PERIOD,
            push_jitter: DEFAULT_PUSH_JITTER,
        }
    }
}

/// A live scheduled activity. Dropping the handle aborts the task.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owner of the session's timer handles.
///
/// Must be used from within a tokio runtime, since starting a timer spawns a
/// task.
#[derive(Debug)]
pub struct TimerScheduler {
    settings: TimerSettings,
    tick_tx: mpsc::UnboundedSender<TimerTick>,
    next_generation: u64,
    countdown: Option<TimerHandle>,
    transform_push: Option<TimerHandle>,
}

impl TimerScheduler {
    pub fn new(settings: TimerSettings, tick_tx: mpsc::UnboundedSender<TimerTick>) -> Self {
        Self {
            settings,
            tick_tx,
            next_generation: 0,
            countdown: None,
            transform_push: None,
        }
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    /// Start (or restart) the countdown. The first tick arrives one period
    /// from now.
    pub fn start_countdown(&mut self) {
        let period = self.settings.countdown_period;
        self.start(TimerKind::Countdown, period, period);
    }

    /// Start (or restart) the transform push. The first tick arrives after
    /// the warm-up, then once per push period.
    pub fn start_transform_push(&mut self) {
        let warmup = self.settings.push_warmup;
        let period = self.settings.push_period;
        self.start(TimerKind::TransformPush, warmup, period);
    }

    /// Cancel one timer. No-op if it is not running.
    pub fn cancel(&mut self, kind: TimerKind) {
        if self.slot(kind).take().is_some() {
            debug!(?kind, "timer cancelled");
        }
    }

    /// Cancel every timer and clear all handles. Idempotent.
    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::Countdown);
        self.cancel(TimerKind::TransformPush);
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Countdown => self.countdown.is_some(),
            TimerKind::TransformPush => self.transform_push.is_some(),
        }
    }

    /// Returns `true` if `tick` came from the currently live timer of its kind.
    pub fn accept(&self, tick: &TimerTick) -> bool {
        let live = match tick.kind {
            TimerKind::Countdown => self.countdown.as_ref(),
            TimerKind::TransformPush => self.transform_push.as_ref(),
        };
        live.is_some_and(|handle| handle.generation == tick.generation)
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Countdown => &mut self.countdown,
            TimerKind::TransformPush => &mut self.transform_push,
        }
    }

    fn start(&mut self, kind: TimerKind, first: Duration, period: Duration) {
        // The previous handle is dropped (and its task aborted) before the
        // replacement exists.
        self.cancel(kind);

        self.next_generation += 1;
        let generation = self.next_generation;
        let tick = TimerTick { kind, generation };
        let tx = self.tick_tx.clone();
        let first_tick = Instant::now() + first;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(first_tick, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(tick).is_err() {
                    break;
                }
            }
        });

        debug!(?kind, generation, "timer started");
        *self.slot(kind) = Some(TimerHandle {
            generation,
            task,
        });
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn scheduler() -> (TimerScheduler, mpsc::UnboundedReceiver<TimerTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimerScheduler::new(TimerSettings::default(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TimerTick>) -> Vec<TimerTick> {
        let mut ticks = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            ticks.push(tick);
        }
        ticks
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_once_per_period() {
        let (mut timers, mut rx) = scheduler();
        timers.start_countdown();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let ticks = drain(&mut rx);
        assert_eq!(ticks.len(), 3);
        assert!(ticks.iter().all(|t| timers.accept(t)));
    }

    #[tokio::test(start_paused = true)]
    async fn push_waits_for_warmup() {
        let (mut timers, mut rx) = scheduler();
        timers.start_transform_push();

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(drain(&mut rx).len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_rejects_ticks_from_previous_generation() {
        let (mut timers, mut rx) = scheduler();
        timers.start_countdown();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let stale = drain(&mut rx);
        assert_eq!(stale.len(), 1);

        timers.start_countdown();
        assert!(!timers.accept(&stale[0]));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let fresh = drain(&mut rx);
        assert_eq!(fresh.len(), 1, "only the restarted stream may tick");
        assert!(timers.accept(&fresh[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_is_idempotent_and_stops_ticks() {
        let (mut timers, mut rx) = scheduler();
        timers.start_countdown();
        timers.start_transform_push();
        assert!(timers.is_active(TimerKind::Countdown));
        assert!(timers.is_active(TimerKind::TransformPush));

        timers.cancel_all();
        timers.cancel_all();
        assert!(!timers.is_active(TimerKind::Countdown));
        assert!(!timers.is_active(TimerKind::TransformPush));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_aborts_timers() {
        let (mut timers, mut rx) = scheduler();
        timers.start_transform_push();
        drop(timers);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_independent() {
        let (mut timers, mut rx) = scheduler();
        timers.start_countdown();
        timers.start_transform_push();
        timers.cancel(TimerKind::Countdown);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let ticks = drain(&mut rx);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].kind, TimerKind::TransformPush);
    }
}
