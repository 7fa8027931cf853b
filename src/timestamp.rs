//! Sample timestamps: float seconds since the epoch.
//!
//! Persisted as Python-style float strings (`"1704067200.0"`) so they can be
//! used as JSON object keys by both pipeline stages.
use chrono::{Local, NaiveDateTime, TimeDelta, TimeZone};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Write};
use std::str::FromStr;

const MICROS_PER_SEC: f64 = 1_000_000.0;
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Seconds since the Unix epoch, totally ordered so it can key a `BTreeMap`.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Whole microseconds, rounded the way a datetime conversion rounds.
    fn as_micros(self) -> i64 {
        (self.as_secs() * MICROS_PER_SEC).round() as i64
    }

    /// Calendar span from `self` to `later`, at microsecond resolution.
    pub fn span_to(self, later: Timestamp) -> TimeDelta {
        TimeDelta::microseconds(later.as_micros() - self.as_micros())
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Integral values keep their ".0" so keys read back as floats.
        if self.0.is_finite() && self.0.fract() == 0.0 && self.0.abs() < 1e16 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<f64>().map(Timestamp::from_secs)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a unix timestamp as a number or float string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        v.parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
        Ok(Timestamp(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
        Ok(Timestamp(v as f64))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
        Ok(Timestamp(v as f64))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Why a date line could not be turned into a timestamp.
#[derive(Debug)]
pub enum DateLineError {
    /// Wrong number of whitespace-separated fields (expected 6).
    Shape(usize),
    Parse(chrono::ParseError),
    /// The wall-clock time does not exist in the local zone (DST gap).
    Nonexistent,
}

impl fmt::Display for DateLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateLineError::Shape(n) => write!(f, "expected 6 date fields, found {n}"),
            DateLineError::Parse(e) => write!(f, "invalid date: {e}"),
            DateLineError::Nonexistent => write!(f, "time does not exist in the local time zone"),
        }
    }
}

impl std::error::Error for DateLineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DateLineError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse a `date`-style line such as `Mon Jan  1 00:00:00 UTC 2024`.
///
/// `UTC`, `GMT` and `Z` are read as UTC. Any other zone name is read as a
/// wall-clock time in the host's local zone.
pub fn parse_date_line(line: &str) -> Result<Timestamp, DateLineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [weekday, month, day, time, zone, year] = fields.as_slice() else {
        return Err(DateLineError::Shape(fields.len()));
    };

    let naive = NaiveDateTime::parse_from_str(
        &format!("{weekday} {month} {day} {time} {year}"),
        "%a %b %d %H:%M:%S %Y",
    )
    .map_err(DateLineError::Parse)?;

    let secs = match *zone {
        "UTC" | "GMT" | "Z" => naive.and_utc().timestamp(),
        _ => Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or(DateLineError::Nonexistent)?
            .timestamp(),
    };
    Ok(Timestamp::from_secs(secs as f64))
}

/// Render a span as `H:MM:SS`, prefixed with `N day(s), ` for spans of a day
/// or more and suffixed with `.ffffff` when there are leftover microseconds.
/// Negative spans borrow from the day count (`-1 day, 23:59:59`).
pub fn format_duration(span: TimeDelta) -> String {
    let total = span.num_microseconds().unwrap_or(i64::MAX);
    let days = total.div_euclid(MICROS_PER_DAY);
    let rest = total.rem_euclid(MICROS_PER_DAY);
    let (secs, micros) = (rest / 1_000_000, rest % 1_000_000);

    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        let _ = write!(out, "{days} day{plural}, ");
    }
    let _ = write!(out, "{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60);
    if micros != 0 {
        let _ = write!(out, ".{micros:06}");
    }
    out
}

/// Span length in seconds, at microsecond resolution.
pub fn span_seconds(span: TimeDelta) -> f64 {
    span.num_microseconds()
        .map(|us| us as f64 / MICROS_PER_SEC)
        .unwrap_or(span.num_seconds() as f64)
}
