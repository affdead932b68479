// src/policy.rs
//! Update suppression: only forward fixes that moved or went stale

use crate::gps::Fix;

/// A fix at an unchanged position is still forwarded once this many seconds pass.
pub const FRESHNESS_WINDOW_SECS: u64 = 30;

/// Value the suppression counter starts each drain at. Sits just past the
/// freshness window so the first fix of a drain is always eligible.
pub const COUNTER_SENTINEL_SECS: u64 = FRESHNESS_WINDOW_SECS + 1;

/// Decide whether `candidate` should be logged and published
pub fn should_emit(previous: Option<&Fix>, candidate: &Fix, seconds_since_last_emission: u64) -> bool {
    match previous {
        None => true,
        Some(previous) => {
            candidate.latitude != previous.latitude
                || candidate.longitude != previous.longitude
                || seconds_since_last_emission > FRESHNESS_WINDOW_SECS
        }
    }
}

/// Emission bookkeeping owned by the acquisition loop
#[derive(Debug, Clone)]
pub struct EmissionState {
    last_emitted: Option<Fix>,
    seconds_since_last_emission: u64,
}

impl EmissionState {
    pub fn new() -> Self {
        Self {
            last_emitted: None,
            seconds_since_last_emission: COUNTER_SENTINEL_SECS,
        }
    }

    pub fn last_emitted(&self) -> Option<&Fix> {
        self.last_emitted.as_ref()
    }

    pub fn seconds_since_last_emission(&self) -> u64 {
        self.seconds_since_last_emission
    }

    /// Called at the top of every drain
    pub fn restart_counter(&mut self) {
        self.seconds_since_last_emission = COUNTER_SENTINEL_SECS;
    }

    pub fn should_emit(&self, candidate: &Fix) -> bool {
        should_emit(self.last_emitted.as_ref(), candidate, self.seconds_since_last_emission)
    }

    pub fn record_emission(&mut self, fix: Fix) {
        self.last_emitted = Some(fix);
        self.seconds_since_last_emission = 0;
    }

    pub fn record_suppression(&mut self, poll_interval_secs: u64) {
        self.seconds_since_last_emission = self
            .seconds_since_last_emission
            .saturating_add(poll_interval_secs);
    }
}

impl Default for EmissionState {
    fn default() -> Self {
        Self::new()
    }
}
