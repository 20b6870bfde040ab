//! Cooperative frame scheduling for the recorder thread.

use std::time::{Duration, Instant};

/// Deadline-based frame clock.
///
/// Nothing runs on its own: the recorder asks [`FrameClock::is_due`], does
/// one compose pass, then calls [`FrameClock::complete_tick`]. Missed ticks
/// are skipped, never queued; [`FrameClock::slots_elapsed`] tells the
/// recorder how many frames the elapsed time calls for.
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    next: Option<Instant>,
    ticks: u64,
}

impl FrameClock {
    /// A stopped clock ticking at `fps` once started.
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Self::interval_for(fps),
            next: None,
            ticks: 0,
        }
    }

    fn interval_for(fps: u32) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
    }

    /// Change the tick rate. Takes effect from the next reschedule.
    pub fn set_fps(&mut self, fps: u32) {
        self.interval = Self::interval_for(fps);
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking; the first tick is due at `now`.
    pub fn start(&mut self, now: Instant) {
        self.next = Some(now);
        self.ticks = 0;
    }

    /// Stop ticking. A pending tick will never become due.
    pub fn cancel(&mut self) {
        self.next = None;
    }

    /// Returns true while a tick is scheduled.
    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    /// Returns true if a scheduled tick is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.next, Some(deadline) if now >= deadline)
    }

    /// Finish the due tick and schedule the next one interval after it,
    /// or stop when `keep_running` is false. If the recorder fell more than
    /// one interval behind, the next tick is one interval from `now`.
    pub fn complete_tick(&mut self, now: Instant, keep_running: bool) {
        let Some(scheduled) = self.next else {
            return;
        };
        self.ticks += 1;

        if !keep_running {
            self.next = None;
            return;
        }

        let next = scheduled + self.interval;
        self.next = Some(if next <= now { now + self.interval } else { next });
    }

    /// When the next tick is due, if running.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }

    /// Ticks completed since the last start.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of frame slots that have begun between `start` and `now`,
    /// counting the slot at `start` itself.
    pub fn slots_elapsed(&self, start: Instant, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(start).as_nanos();
        let slots = elapsed / self.interval.as_nanos().max(1) + 1;
        u64::try_from(slots).unwrap_or(u64::MAX)
    }

    /// Presentation time of frame slot `slot` of a recording begun at `start`.
    pub fn slot_time(&self, start: Instant, slot: u64) -> Instant {
        let nanos = u64::try_from(self.interval.as_nanos()).unwrap_or(u64::MAX);
        start + Duration::from_nanos(nanos.saturating_mul(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_due_immediately() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(30);
        assert!(!clock.is_running());
        assert!(!clock.is_due(t0));

        clock.start(t0);
        assert!(clock.is_due(t0));
        assert_eq!(clock.next_deadline(), Some(t0));
    }

    #[test]
    fn test_reschedules_one_interval_after_schedule() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(30);
        clock.start(t0);
        clock.complete_tick(t0 + Duration::from_millis(5), true);

        let next = t0 + clock.interval();
        assert_eq!(clock.next_deadline(), Some(next));
        assert!(!clock.is_due(next - Duration::from_millis(1)));
        assert!(clock.is_due(next));
        assert_eq!(clock.ticks(), 1);
    }

    #[test]
    fn test_late_tick_skips_instead_of_bursting() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(30);
        clock.start(t0);
        let late = t0 + Duration::from_millis(200);
        clock.complete_tick(late, true);
        assert_eq!(clock.next_deadline(), Some(late + clock.interval()));
        assert!(!clock.is_due(late));
    }

    #[test]
    fn test_cancel_prevents_scheduled_tick() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(30);
        clock.start(t0);
        clock.cancel();
        assert!(!clock.is_running());
        assert!(!clock.is_due(t0 + Duration::from_secs(1)));
        assert_eq!(clock.next_deadline(), None);
    }

    #[test]
    fn test_complete_without_keep_running_stops() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(30);
        clock.start(t0);
        clock.complete_tick(t0, false);
        assert!(!clock.is_running());
        assert_eq!(clock.ticks(), 1);
    }

    #[test]
    fn test_slots_track_elapsed_time() {
        let t0 = Instant::now();
        let clock = FrameClock::new(25);
        assert_eq!(clock.slots_elapsed(t0, t0), 1);
        assert_eq!(clock.slots_elapsed(t0, t0 + Duration::from_millis(39)), 1);
        assert_eq!(clock.slots_elapsed(t0, t0 + Duration::from_millis(40)), 2);
        assert_eq!(clock.slots_elapsed(t0, t0 + Duration::from_secs(2)), 51);
        assert_eq!(clock.slot_time(t0, 3), t0 + Duration::from_millis(120));
    }

    #[test]
    fn test_interval_from_fps() {
        assert_eq!(FrameClock::new(25).interval(), Duration::from_millis(40));
        assert_eq!(FrameClock::new(0).interval(), Duration::from_secs(1));
    }
}
