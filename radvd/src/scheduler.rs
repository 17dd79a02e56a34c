//! Computes when the next Router Advertisement should go out, under three
//! interacting constraints from RFC 4861 §6.2.1/§6.2.4: periodic jitter,
//! solicited-response jitter, and a hard minimum gap between sends.

use std::time::Instant;

use crate::clock::Clock;

/// Upper bound on the jitter applied to a solicited or interface-triggered
/// advertisement (RFC 4861 `MAX_RA_DELAY_TIME`).
pub const MAX_RA_DELAY_TIME_MS: u64 = 500;
/// Minimum time between two consecutive advertisements on the same
/// interface (RFC 4861 `MIN_DELAY_BETWEEN_RAS`).
pub const MIN_DELAY_BETWEEN_RAS_MS: u64 = 3000;

const DEFAULT_MAX_RTR_ADV_INTERVAL_SECS: u64 = 600;

/// `next_advert`/`next_advert_earliest`, always measured against the
/// `Clock` passed into each method. Configuration is fixed at construction
/// (`min_rtr_adv_interval`/`max_rtr_adv_interval`), matching the data
/// model's immutable-after-startup Configuration.
pub struct Scheduler {
    min_rtr_adv_interval_ms: u64,
    max_rtr_adv_interval_ms: u64,
    next_advert: Instant,
    next_advert_earliest: Instant,
}

/// Derive `min_rtr_adv_interval` from a configured `max_rtr_adv_interval`,
/// mirroring RFC 4861's `DEFAULT_MIN_RTR_ADV_INTERVAL = DEFAULT_MAX /3`,
/// clamped to a 3 second floor.
pub fn derive_min_rtr_adv_interval_secs(max_rtr_adv_interval_secs: u64) -> u64 {
    (max_rtr_adv_interval_secs / 3).max(3)
}

impl Scheduler {
    /// Builds a scheduler with its deadline already pushed to the far
    /// future; the first real deadline is established by whichever of
    /// `schedule_unsolicited`/`schedule_periodic` the caller invokes once
    /// the interface becomes ready.
    pub fn new(clock: &Clock, max_rtr_adv_interval_secs: u64) -> Scheduler {
        let max_rtr_adv_interval_secs =
            if max_rtr_adv_interval_secs == 0 { DEFAULT_MAX_RTR_ADV_INTERVAL_SECS } else { max_rtr_adv_interval_secs };
        let min_rtr_adv_interval_secs = derive_min_rtr_adv_interval_secs(max_rtr_adv_interval_secs);
        let now = clock.now();
        Scheduler {
            min_rtr_adv_interval_ms: min_rtr_adv_interval_secs * 1000,
            max_rtr_adv_interval_ms: max_rtr_adv_interval_secs * 1000,
            next_advert: now,
            next_advert_earliest: now,
        }
    }

    pub fn next_advert(&self) -> Instant {
        self.next_advert
    }

    /// Reset to "send as soon as allowed", used when the interface first
    /// transitions to ready.
    pub fn reset(&mut self, clock: &Clock) {
        let now = clock.now();
        self.next_advert = now;
        self.next_advert_earliest = now;
    }

    /// Unsolicited or interface-triggered: only ever pulls the deadline
    /// earlier, never pushes it later, so a flurry of triggers collapses
    /// into a single send at the earliest requested time.
    pub fn schedule_unsolicited(&mut self, clock: &Clock) {
        let now = clock.now();
        let jitter_ms = clock.rand_range(0, MAX_RA_DELAY_TIME_MS);
        let mut target = clock.add(now, jitter_ms);
        if clock.after(self.next_advert_earliest, target) {
            target = self.next_advert_earliest;
        }
        if clock.after(self.next_advert, target) {
            self.next_advert = target;
        }
    }

    /// Periodic: unconditionally replaces the deadline with a fresh
    /// uniformly-random point in `[min, max)`.
    pub fn schedule_periodic(&mut self, clock: &Clock) {
        let now = clock.now();
        let jitter_ms = clock.rand_range(self.min_rtr_adv_interval_ms, self.max_rtr_adv_interval_ms);
        let mut target = clock.add(now, jitter_ms);
        if clock.after(self.next_advert_earliest, target) {
            target = self.next_advert_earliest;
        }
        self.next_advert = target;
    }

    /// Called immediately after a successful send: no further
    /// advertisement may go out for `MIN_DELAY_BETWEEN_RAS`.
    pub fn record_send(&mut self, clock: &Clock) {
        let now = clock.now();
        self.next_advert_earliest = clock.add(now, MIN_DELAY_BETWEEN_RAS_MS);
        if clock.after(self.next_advert_earliest, self.next_advert) {
            self.next_advert = self.next_advert_earliest;
        }
    }

    /// Whether `now` has reached `next_advert`.
    pub fn is_due(&self, clock: &Clock, now: Instant) -> bool {
        !clock.after(self.next_advert, now)
    }
}
