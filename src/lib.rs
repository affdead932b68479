// src/lib.rs
//! GPS Relay Library
//!
//! Reads NMEA 0183 sentences from a serial receiver, pairs fix quality with
//! position reports, suppresses redundant updates and forwards the rest to a
//! durable log and a remote HTTP collector.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod gps;
pub mod liveness;
pub mod policy;
pub mod shutdown;
pub mod sink;
pub mod supervisor;

// Re-export main types for convenience
pub use acquisition::{Acquisition, AcquisitionSettings, IterationStats};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use gps::{Fix, FixCorrelator, FixQuality};
pub use policy::{should_emit, EmissionState};
pub use sink::{FixLog, FixSink, Publisher, SinkReport, TelemetrySink};
