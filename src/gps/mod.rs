// src/gps/mod.rs
//! GPS data handling, parsing and correlation

pub mod correlator;
pub mod data;
pub mod nmea;

pub use correlator::{CorrelatorState, FixCorrelator};
pub use data::{Fix, FixQuality, QualitySample, Track};
pub use nmea::{parse, ParseError, PositionReport, Sentence};
