//! Narrow cron-like pattern matcher and next-run calculator.
//!
//! Supported forms, all on local wall-clock time:
//!
//! - `*/N * * * *`: every N minutes (`minute % N == 0`)
//! - `0 H1,H2,.. * * *`: at minute 0 of the listed hours
//! - `0 H1,.. * * D1,..`: same, restricted to weekdays (Sunday = 0)
//! - `0 */N * * *`: at minute 0 of every hour divisible by N
//!
//! Any other five-field pattern parses as [`CronPattern::Unsupported`] and
//! never fires.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::OrchestratorError;

/// Longest span searched for the next fire time.
const SEARCH_HORIZON_DAYS: i64 = 8;

/// Parsed pattern kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    /// Every N minutes.
    EveryMinutes(u32),
    /// Top of every N-th hour.
    EveryHours(u32),
    /// Top of the listed hours, optionally on listed weekdays only.
    AtHours {
        /// Sorted, deduplicated hours.
        hours: Vec<u32>,
        /// Sorted weekdays (Sunday = 0), `None` for every day.
        weekdays: Option<Vec<u32>>,
    },
    /// Stored but never fires.
    Unsupported,
}

/// A schedule pattern together with its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronPattern {
    raw: String,
    kind: PatternKind,
}

fn invalid(pattern: &str, reason: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: reason.into(),
    }
}

fn step(field: &str, max: u32) -> Option<u32> {
    field
        .strip_prefix("*/")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| (1..=max).contains(n))
}

fn list(field: &str, max: u32) -> Option<Vec<u32>> {
    let mut values = field
        .split(',')
        .map(|v| v.parse::<u32>().ok().filter(|v| *v <= max))
        .collect::<Option<Vec<_>>>()?;
    values.sort_unstable();
    values.dedup();
    Some(values)
}

impl CronPattern {
    /// Parse a five-field pattern.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` when the text does not have exactly five fields.
    pub fn parse(raw: &str) -> Result<Self, OrchestratorError> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(invalid(
                raw,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        };

        let kind = if *dom != "*" || *month != "*" {
            PatternKind::Unsupported
        } else if let Some(n) = step(minute, 59) {
            if *hour == "*" && *dow == "*" {
                PatternKind::EveryMinutes(n)
            } else {
                PatternKind::Unsupported
            }
        } else if *minute == "0" {
            if let Some(n) = step(hour, 23) {
                if *dow == "*" {
                    PatternKind::EveryHours(n)
                } else {
                    PatternKind::Unsupported
                }
            } else if let Some(hours) = list(hour, 23) {
                let weekdays = if *dow == "*" {
                    Some(None)
                } else {
                    // 7 is an alias for Sunday
                    list(dow, 7).map(|days| {
                        let mut days: Vec<u32> = days.into_iter().map(|d| d % 7).collect();
                        days.sort_unstable();
                        days.dedup();
                        Some(days)
                    })
                };
                weekdays.map_or(PatternKind::Unsupported, |weekdays| PatternKind::AtHours {
                    hours,
                    weekdays,
                })
            } else {
                PatternKind::Unsupported
            }
        } else {
            PatternKind::Unsupported
        };

        Ok(Self {
            raw: raw.trim().to_owned(),
            kind,
        })
    }

    /// Source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed kind.
    #[must_use]
    pub const fn kind(&self) -> &PatternKind {
        &self.kind
    }

    /// False for patterns that never fire.
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        !matches!(self.kind, PatternKind::Unsupported)
    }

    /// Whether the pattern fires in the minute containing `at`.
    #[must_use]
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        match &self.kind {
            PatternKind::EveryMinutes(n) => at.minute() % n == 0,
            PatternKind::EveryHours(n) => at.minute() == 0 && at.hour() % n == 0,
            PatternKind::AtHours { hours, weekdays } => {
                at.minute() == 0
                    && hours.contains(&at.hour())
                    && weekdays
                        .as_ref()
                        .is_none_or(|w| w.contains(&at.weekday().num_days_from_sunday()))
            }
            PatternKind::Unsupported => false,
        }
    }

    /// First fire time strictly after `after`, within an eight-day horizon.
    #[must_use]
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.is_supported() {
            return None;
        }
        let minute_start = after.with_second(0)?.with_nanosecond(0)?;
        let mut candidate = minute_start + Duration::minutes(1);
        let horizon = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        if let PatternKind::EveryMinutes(_) = self.kind {
            // a match always exists within the next hour
            for _ in 0..=60 {
                if self.matches(candidate) {
                    return Some(candidate);
                }
                candidate += Duration::minutes(1);
            }
            return None;
        }

        if candidate.minute() != 0 {
            candidate = candidate.with_minute(0)? + Duration::hours(1);
        }
        while candidate <= horizon {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::hours(1);
        }
        None
    }

    /// Whether a fire time falls in `(since, until]`.
    #[must_use]
    pub fn fires_between(&self, since: NaiveDateTime, until: NaiveDateTime) -> bool {
        self.next_after(since).is_some_and(|t| t <= until)
    }
}

impl fmt::Display for CronPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for CronPattern {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CronPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for CronPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
