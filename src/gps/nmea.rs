// src/gps/nmea.rs
//! NMEA sentence parsing

use super::data::{FixQuality, QualitySample, Track, KNOTS_TO_KMH};
use std::str::FromStr;
use thiserror::Error;

/// Minimum field count (identifier included) for a GGA sentence
const GGA_MIN_FIELDS: usize = 9;
/// Minimum field count (identifier included) for an RMC sentence
const RMC_MIN_FIELDS: usize = 9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("malformed sentence: {0}")]
    Malformed(String),
    #[error("{sentence} sentence has {found} fields, expected at least {expected}")]
    TooShort {
        sentence: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

type ParseResult<T> = std::result::Result<T, ParseError>;

/// One line split into its comma separated fields.
///
/// `identifier` is the first field without its leading `$`/`!` sentinel.
/// A trailing `*hh` checksum has already been verified and stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSentence<'a> {
    pub identifier: &'a str,
    pub fields: Vec<&'a str>,
}

impl<'a> RawSentence<'a> {
    pub fn split(line: &'a str) -> ParseResult<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Malformed("empty line".to_string()));
        }

        let body = match line.rfind('*') {
            Some(star) => {
                let (body, checksum) = (&line[..star], &line[star + 1..]);
                verify_checksum(body, checksum)?;
                body
            }
            None => line,
        };

        let fields: Vec<&str> = body.split(',').collect();
        let first: &'a str = fields[0];
        let mut chars = first.chars();
        if chars.next().is_none() || chars.as_str().is_empty() {
            return Err(ParseError::Malformed(format!("missing sentence identifier in {:?}", line)));
        }

        Ok(Self {
            identifier: chars.as_str(),
            fields,
        })
    }

    fn field(&self, index: usize) -> &'a str {
        self.fields.get(index).copied().unwrap_or("")
    }

    fn require(&self, expected: usize) -> ParseResult<()> {
        if self.fields.len() < expected {
            return Err(ParseError::TooShort {
                sentence: self.identifier.to_string(),
                expected,
                found: self.fields.len(),
            });
        }
        Ok(())
    }
}

/// Status half of an RMC sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionReport {
    Active(Track),
    Void,
}

/// A decoded sentence
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    /// GGA: fix quality, satellites in use, HDOP
    Quality(QualitySample),
    /// RMC: status, position, speed and bearing
    Position(PositionReport),
    /// Anything else; callers ignore these
    Unrecognized(String),
}

/// Parse a single line read from the receiver
pub fn parse(line: &[u8]) -> ParseResult<Sentence> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ParseError::Malformed(format!("invalid UTF-8: {}", e)))?;
    let raw = RawSentence::split(text)?;

    match raw.identifier {
        "GPGGA" | "GNGGA" => parse_gga(&raw).map(Sentence::Quality),
        "GPRMC" | "GNRMC" => parse_rmc(&raw).map(Sentence::Position),
        other => Ok(Sentence::Unrecognized(other.to_string())),
    }
}

/// XOR of every byte between the leading sentinel and the `*`
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

fn verify_checksum(body: &str, checksum_field: &str) -> ParseResult<()> {
    let expected = u8::from_str_radix(checksum_field.trim(), 16)
        .map_err(|_| ParseError::Malformed(format!("bad checksum field {:?}", checksum_field)))?;
    let payload = body.get(1..).unwrap_or("");
    let actual = checksum(payload);
    if actual != expected {
        return Err(ParseError::Malformed(format!(
            "checksum mismatch: expected {:02X}, computed {:02X}",
            expected, actual
        )));
    }
    Ok(())
}

/// Parse GPGGA (Global Positioning System Fix Data) sentence
fn parse_gga(raw: &RawSentence<'_>) -> ParseResult<QualitySample> {
    raw.require(GGA_MIN_FIELDS)?;

    let fix_quality = FixQuality::from_code(parse_field(raw.field(6), "fix quality")?);

    // Receivers leave the satellite count empty while searching
    let satellites = match raw.field(7) {
        "" => 0,
        value => parse_field(value, "satellite count")?,
    };

    let hdop: f64 = parse_field(raw.field(8), "hdop")?;
    if !hdop.is_finite() || hdop < 0.0 {
        return Err(invalid("hdop", raw.field(8)));
    }

    Ok(QualitySample {
        fix_quality,
        satellites,
        hdop,
    })
}

/// Parse GPRMC (Recommended Minimum Course) sentence
fn parse_rmc(raw: &RawSentence<'_>) -> ParseResult<PositionReport> {
    raw.require(RMC_MIN_FIELDS)?;

    if raw.field(2) != "A" {
        return Ok(PositionReport::Void);
    }

    let latitude = decode_latitude(raw.field(3), raw.field(4))?;
    let longitude = decode_longitude(raw.field(5), raw.field(6))?;

    // Speed over ground in knots (field 7)
    let speed_knots = parse_optional_f64(raw.field(7), "speed")?;
    if speed_knots < 0.0 {
        return Err(invalid("speed", raw.field(7)));
    }

    // Course over ground in degrees (field 8)
    let bearing_deg = parse_optional_f64(raw.field(8), "bearing")?;

    Ok(PositionReport::Active(Track {
        latitude,
        longitude,
        speed_kmh: speed_knots * KNOTS_TO_KMH,
        bearing_deg,
    }))
}

/// `DDMM.MMMM` + `N`/`S` to signed decimal degrees
pub fn decode_latitude(value: &str, hemisphere: &str) -> ParseResult<f64> {
    decode_coordinate(value, hemisphere, 2, ("N", "S"), 90.0, "latitude")
}

/// `DDDMM.MMMM` + `E`/`W` to signed decimal degrees
pub fn decode_longitude(value: &str, hemisphere: &str) -> ParseResult<f64> {
    decode_coordinate(value, hemisphere, 3, ("E", "W"), 180.0, "longitude")
}

fn decode_coordinate(
    value: &str,
    hemisphere: &str,
    degree_width: usize,
    (positive, negative): (&str, &str),
    limit: f64,
    field: &'static str,
) -> ParseResult<f64> {
    if !value.is_ascii() || value.len() <= degree_width {
        return Err(invalid(field, value));
    }

    let (degrees, minutes) = value.split_at(degree_width);
    let degrees: u32 = degrees.parse().map_err(|_| invalid(field, value))?;
    let minutes: f64 = minutes.parse().map_err(|_| invalid(field, value))?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(invalid(field, value));
    }

    let magnitude = degrees as f64 + minutes / 60.0;
    if magnitude > limit {
        return Err(invalid(field, value));
    }

    if hemisphere == positive {
        Ok(magnitude)
    } else if hemisphere == negative {
        Ok(-magnitude)
    } else {
        Err(invalid("hemisphere", hemisphere))
    }
}

fn parse_field<T: FromStr>(value: &str, field: &'static str) -> ParseResult<T> {
    value.trim().parse::<T>().map_err(|_| invalid(field, value))
}

fn parse_optional_f64(value: &str, field: &'static str) -> ParseResult<f64> {
    if value.is_empty() {
        return Ok(0.0);
    }
    let parsed: f64 = parse_field(value, field)?;
    if !parsed.is_finite() {
        return Err(invalid(field, value));
    }
    Ok(parsed)
}

fn invalid(field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}
