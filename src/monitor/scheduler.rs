//! Monitor scheduling
//!
//! Maps each monitor's schedule string to a trigger and guarantees
//! at-most-one concurrent execution per monitor: a trigger that fires
//! while the previous run is still in flight is dropped and logged.

use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// When a monitor runs
#[derive(Debug, Clone)]
pub enum Schedule {
    Daily,
    Hourly,
    Manual,
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Next fire time strictly after `after`; None for manual monitors
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Daily => Some(after + Duration::days(1)),
            Schedule::Hourly => Some(after + Duration::hours(1)),
            Schedule::Manual => None,
            Schedule::Cron(schedule) => schedule.after(&after).next(),
        }
    }

    /// Whether a monitor last run at `last_run` is due at `now`
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => !matches!(self, Schedule::Manual),
            Some(last) => self.next_fire(last).map(|next| next <= now).unwrap_or(false),
        }
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily" => Ok(Schedule::Daily),
            "hourly" => Ok(Schedule::Hourly),
            "manual" => Ok(Schedule::Manual),
            other => match other.strip_prefix("cron:") {
                Some(expr) => cron::Schedule::from_str(expr.trim())
                    .map(|schedule| Schedule::Cron(Box::new(schedule)))
                    .map_err(|e| format!("invalid cron expression '{}': {}", expr, e)),
                None => Err(format!(
                    "unknown schedule '{}' (expected daily, hourly, manual, or cron:<expr>)",
                    other
                )),
            },
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily => write!(f, "daily"),
            Schedule::Hourly => write!(f, "hourly"),
            Schedule::Manual => write!(f, "manual"),
            Schedule::Cron(schedule) => write!(f, "cron:{}", schedule),
        }
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Tracks in-flight monitor executions; cheap to clone
#[derive(Clone, Default)]
pub struct InFlightGuard {
    running: Arc<Mutex<HashSet<String>>>,
}

/// Releases the monitor's slot on drop
pub struct RunSlot {
    name: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.name);
        }
    }
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the monitor's execution slot; None when a run is in flight
    pub fn try_begin(&self, name: &str) -> Option<RunSlot> {
        let mut running = self.running.lock().ok()?;
        if !running.insert(name.to_string()) {
            return None;
        }
        Some(RunSlot {
            name: name.to_string(),
            running: self.running.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_schedules() {
        assert!(matches!("daily".parse::<Schedule>().unwrap(), Schedule::Daily));
        assert!(matches!("hourly".parse::<Schedule>().unwrap(), Schedule::Hourly));
        assert!(matches!("manual".parse::<Schedule>().unwrap(), Schedule::Manual));
        assert!(matches!(
            "cron:0 0 6 * * * *".parse::<Schedule>().unwrap(),
            Schedule::Cron(_)
        ));
        assert!("weekly".parse::<Schedule>().is_err());
        assert!("cron:not an expr".parse::<Schedule>().is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let daily: Schedule = "daily".parse().unwrap();
        let hourly: Schedule = "hourly".parse().unwrap();
        let manual: Schedule = "manual".parse().unwrap();

        // Never run: everything but manual is due
        assert!(daily.is_due(None, now));
        assert!(hourly.is_due(None, now));
        assert!(!manual.is_due(None, now));

        let two_hours_ago = now - Duration::hours(2);
        assert!(hourly.is_due(Some(two_hours_ago), now));
        assert!(!daily.is_due(Some(two_hours_ago), now));
        assert!(!manual.is_due(Some(two_hours_ago), now));
    }

    #[test]
    fn test_cron_next_fire() {
        // Six-field cron: sec min hour dom month dow (+ optional year)
        let schedule: Schedule = "cron:0 30 6 * * * *".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let next = schedule.next_fire(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 2, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_in_flight_guard_at_most_one() {
        let guard = InFlightGuard::new();
        let slot = guard.try_begin("sap-watch");
        assert!(slot.is_some());
        assert!(guard.try_begin("sap-watch").is_none());
        // A different monitor is unaffected
        assert!(guard.try_begin("other").is_some());
        drop(slot);
        assert!(guard.try_begin("sap-watch").is_some());
    }

    #[test]
    fn test_schedule_serde_round_trip() {
        let schedule: Schedule = "cron:0 15 7 * * * *".parse().unwrap();
        let yaml = serde_yaml::to_string(&schedule).unwrap();
        let back: Schedule = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(schedule.to_string(), back.to_string());
    }
}
