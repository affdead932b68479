// src/gps/correlator.rs
//! Merges GGA quality samples with RMC position reports into fixes

use super::{
    data::{Fix, QualitySample},
    nmea::{PositionReport, Sentence},
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrelatorState {
    AwaitingQuality,
    HaveQuality(QualitySample),
}

/// Two-state machine pairing the latest quality sample with active position reports.
///
/// A quality sample is not consumed by a fix: receivers send GGA less often than
/// RMC, so one sample is reused until a newer GGA replaces it.
#[derive(Debug, Clone)]
pub struct FixCorrelator {
    identity: String,
    state: CorrelatorState,
}

impl FixCorrelator {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            state: CorrelatorState::AwaitingQuality,
        }
    }

    pub fn state(&self) -> &CorrelatorState {
        &self.state
    }

    /// Drop any pending quality sample
    pub fn reset(&mut self) {
        self.state = CorrelatorState::AwaitingQuality;
    }

    /// Feed one decoded sentence; returns a fix when an active position report
    /// arrives while a quality sample is held.
    pub fn observe(&mut self, sentence: &Sentence, now: DateTime<Utc>) -> Option<Fix> {
        match (sentence, &self.state) {
            (Sentence::Quality(sample), _) => {
                self.state = CorrelatorState::HaveQuality(*sample);
                None
            }
            (
                Sentence::Position(PositionReport::Active(track)),
                CorrelatorState::HaveQuality(sample),
            ) => Some(Fix::from_parts(now, &self.identity, sample, track)),
            _ => None,
        }
    }
}
