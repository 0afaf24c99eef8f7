use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReminderError, Result};

pub const TIME_FMT: &str = "%H:%M";
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M";

// ============================================================================
// Scheduled Time
// ============================================================================

/// A daily time of day, always stored as zero-padded 24-hour `HH:MM`.
///
/// Matching against the clock is plain string equality on the formatted
/// minute. Seconds are ignored on purpose: a reminder is due for the whole
/// minute it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduledTime(String);

impl ScheduledTime {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ReminderError::InputValidation("time must not be empty".into()));
        }
        let time = NaiveTime::parse_from_str(s, TIME_FMT).map_err(|_| {
            ReminderError::InputValidation(format!("`{s}` is not a 24-hour HH:MM time"))
        })?;
        Ok(Self(time.format(TIME_FMT).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, now: NaiveDateTime) -> bool {
        now.format(TIME_FMT).to_string() == self.0
    }
}

impl TryFrom<String> for ScheduledTime {
    type Error = ReminderError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ScheduledTime> for String {
    fn from(t: ScheduledTime) -> Self {
        t.0
    }
}

impl fmt::Display for ScheduledTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Medicine Entry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineEntry {
    pub name: String,
    pub time: ScheduledTime,
}

impl MedicineEntry {
    /// Validates both fields the way the add form does.
    pub fn new(name: &str, time: &str) -> Result<Self> {
        Ok(Self {
            name: validate_name(name)?,
            time: ScheduledTime::parse(time)?,
        })
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.time.matches(now)
    }
}

pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ReminderError::InputValidation("medicine name must not be empty".into()));
    }
    Ok(name.to_string())
}

// ============================================================================
// Dose Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoseStatus {
    Taken,
    Missed,
    #[serde(rename = "Missed (Auto)")]
    MissedAuto,
}

impl DoseStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Taken => "Taken",
            Self::Missed => "Missed",
            Self::MissedAuto => "Missed (Auto)",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Taken => "✅",
            Self::Missed => "❌",
            Self::MissedAuto => "⏰",
        }
    }
}

impl fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub status: DoseStatus,
}

impl LogRecord {
    /// Log timestamps keep second resolution; sub-second noise is dropped.
    pub fn new(name: &str, at: NaiveDateTime, status: DoseStatus) -> Self {
        Self {
            name: name.to_string(),
            timestamp: at.with_nanosecond(0).unwrap_or(at),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn time_rejects_empty_and_garbage() {
        assert!(ScheduledTime::parse("").unwrap_err().is_input_error());
        assert!(ScheduledTime::parse("   ").is_err());
        assert!(ScheduledTime::parse("noon").is_err());
        assert!(ScheduledTime::parse("25:00").is_err());
        assert!(ScheduledTime::parse("12:61").is_err());
    }

    #[test]
    fn time_matches_whole_minute_only() {
        let t = ScheduledTime::parse("08:00").unwrap();
        assert!(t.matches(at(8, 0, 0)));
        assert!(t.matches(at(8, 0, 59)));
        assert!(!t.matches(at(8, 1, 0)));
        assert!(!t.matches(at(20, 0, 0)));
    }

    #[test]
    fn entry_trims_name() {
        let e = MedicineEntry::new("  Aspirin ", "08:00").unwrap();
        assert_eq!(e.name, "Aspirin");
        assert!(MedicineEntry::new("", "08:00").is_err());
        assert!(MedicineEntry::new("Aspirin", "").is_err());
    }

    #[test]
    fn status_serializes_with_log_labels() {
        assert_eq!(serde_json::to_string(&DoseStatus::Taken).unwrap(), "\"Taken\"");
        assert_eq!(serde_json::to_string(&DoseStatus::Missed).unwrap(), "\"Missed\"");
        assert_eq!(
            serde_json::to_string(&DoseStatus::MissedAuto).unwrap(),
            "\"Missed (Auto)\""
        );
        let back: DoseStatus = serde_json::from_str("\"Missed (Auto)\"").unwrap();
        assert_eq!(back, DoseStatus::MissedAuto);
    }

    #[test]
    fn entry_rejects_bad_time_on_deserialize() {
        let bad = r#"{"name":"Aspirin","time":"8 o'clock"}"#;
        assert!(serde_json::from_str::<MedicineEntry>(bad).is_err());

        let good: MedicineEntry = serde_json::from_str(r#"{"name":"Aspirin","time":"08:00"}"#).unwrap();
        assert_eq!(good.time.as_str(), "08:00");
    }

    #[test]
    fn log_record_drops_subseconds() {
        let ts = at(9, 0, 5) + chrono::Duration::milliseconds(250);
        let rec = LogRecord::new("Vitamin", ts, DoseStatus::MissedAuto);
        assert_eq!(rec.timestamp, at(9, 0, 5));
    }
}
