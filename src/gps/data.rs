// src/gps/data.rs
//! GPS fix data structures and their wire representation

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Timestamp layout used by the fix log and the collector.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M:%SUTC";

/// Knots to km/h.
pub const KNOTS_TO_KMH: f64 = 1.852;

/// GGA fix quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NoFix,
    Gps,
    Dgps,
    Pps,
    Rtk,
    FloatRtk,
    Estimated,
    Manual,
    Simulation,
    Other(u8),
}

impl FixQuality {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => FixQuality::NoFix,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::Rtk,
            5 => FixQuality::FloatRtk,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            other => FixQuality::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FixQuality::NoFix => 0,
            FixQuality::Gps => 1,
            FixQuality::Dgps => 2,
            FixQuality::Pps => 3,
            FixQuality::Rtk => 4,
            FixQuality::FloatRtk => 5,
            FixQuality::Estimated => 6,
            FixQuality::Manual => 7,
            FixQuality::Simulation => 8,
            FixQuality::Other(code) => code,
        }
    }

    /// Get fix type description
    pub fn description(self) -> String {
        match self {
            FixQuality::NoFix => "No fix".to_string(),
            FixQuality::Gps => "GPS".to_string(),
            FixQuality::Dgps => "DGPS".to_string(),
            FixQuality::Pps => "PPS".to_string(),
            FixQuality::Rtk => "RTK".to_string(),
            FixQuality::FloatRtk => "Float RTK".to_string(),
            FixQuality::Estimated => "Estimated".to_string(),
            FixQuality::Manual => "Manual".to_string(),
            FixQuality::Simulation => "Simulation".to_string(),
            FixQuality::Other(code) => format!("Unknown ({})", code),
        }
    }
}

impl Serialize for FixQuality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Quality half of a fix, taken from a GGA sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySample {
    pub fix_quality: FixQuality,
    pub satellites: u32,
    pub hdop: f64,
}

/// Position half of a fix, taken from an active RMC sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub latitude: f64,   // signed decimal degrees
    pub longitude: f64,  // signed decimal degrees
    pub speed_kmh: f64,
    pub bearing_deg: f64, // degrees true
}

/// A correlated, validated position ready for emission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fix {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "spd", serialize_with = "serialize_speed")]
    pub speed_kmh: f64,
    #[serde(rename = "bearing", serialize_with = "serialize_bearing")]
    pub bearing_deg: f64,
    pub valid: bool,
    pub satellites: u32,
    #[serde(rename = "quality")]
    pub fix_quality: FixQuality,
    pub hdop: f64,
}

impl Fix {
    /// Combine a quality sample with an active track. Only the correlator calls this,
    /// which guarantees the track came from an active position sentence.
    pub(crate) fn from_parts(
        timestamp: DateTime<Utc>,
        identity: &str,
        quality: &QualitySample,
        track: &Track,
    ) -> Self {
        Self {
            timestamp,
            identity: identity.to_string(),
            latitude: track.latitude,
            longitude: track.longitude,
            speed_kmh: track.speed_kmh,
            bearing_deg: track.bearing_deg,
            valid: true,
            satellites: quality.satellites,
            fix_quality: quality.fix_quality,
            hdop: quality.hdop,
        }
    }

    pub fn format_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn format_speed(&self) -> String {
        format!("{:.2} km/h", self.speed_kmh)
    }

    pub fn format_bearing(&self) -> String {
        format!("{} deg. true", self.bearing_deg)
    }

    /// Single-line JSON record, as written to the fix log
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

fn serialize_speed<S: Serializer>(speed: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{:.2} km/h", speed))
}

fn serialize_bearing<S: Serializer>(bearing: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{} deg. true", bearing))
}
