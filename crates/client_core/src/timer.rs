use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};

/// One-shot timer with a single authoritative handle.
///
/// Every arm or cancel bumps the generation. A timer task that already woke
/// up must call [`TimerSlot::take_if_current`] with the generation it was
/// armed with before applying its transition, so a late wake-up can never
/// act on state that has since moved on.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub(crate) fn arm<F, Fut>(&mut self, deadline: Instant, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            on_fire(generation).await;
        }));
    }

    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Claims the fired timer. Returns false when the slot was re-armed or
    /// cancelled after `generation` was handed out.
    pub(crate) fn take_if_current(&mut self, generation: u64) -> bool {
        if self.handle.is_none() || self.generation != generation {
            return false;
        }
        // The calling task is the timer itself; drop the handle without aborting it.
        self.handle = None;
        true
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Periodic task, first tick one period after start.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn start<F, Fut>(&mut self, period: Duration, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                on_tick().await;
            }
        }));
    }

    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
