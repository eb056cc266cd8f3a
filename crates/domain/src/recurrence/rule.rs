//! `RRULE` text parsing.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Errors raised while parsing an `RRULE` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("recurrence rule is empty")]
    Empty,

    #[error("rule part {0:?} is not of the form KEY=VALUE")]
    MalformedPart(String),

    #[error("unsupported rule part {0}")]
    UnknownPart(String),

    #[error("rule part {0} is given more than once")]
    DuplicatePart(String),

    #[error("FREQ is required")]
    MissingFrequency,

    #[error("unknown frequency {0}")]
    InvalidFrequency(String),

    #[error("{part} expects an integer, got {value:?}")]
    InvalidInteger { part: &'static str, value: String },

    #[error("{part} value {value} is out of range")]
    OutOfRange { part: &'static str, value: i64 },

    #[error("invalid weekday {0:?}")]
    InvalidWeekday(String),

    #[error("weekday ordinals are only allowed with FREQ=MONTHLY or FREQ=YEARLY")]
    OrdinalNotAllowed,

    #[error("invalid UNTIL value {0:?}")]
    InvalidUntil(String),

    #[error("COUNT and UNTIL are mutually exclusive")]
    CountWithUntil,
}

/// Recurrence frequency, ordered from the finest to the coarsest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// The `FREQ` token for this frequency.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secondly => "SECONDLY",
            Self::Minutely => "MINUTELY",
            Self::Hourly => "HOURLY",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl FromStr for Frequency {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SECONDLY" => Ok(Self::Secondly),
            "MINUTELY" => Ok(Self::Minutely),
            "HOURLY" => Ok(Self::Hourly),
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "MONTHLY" => Ok(Self::Monthly),
            "YEARLY" => Ok(Self::Yearly),
            other => Err(RuleParseError::InvalidFrequency(other.to_string())),
        }
    }
}

/// One `BYDAY` entry: a weekday, optionally with an ordinal (`2MO`, `-1FR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

impl fmt::Display for ByDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

/// A parsed recurrence rule.
///
/// Empty `by_*` lists mean "not constrained"; the expander then inherits the
/// missing component from the anchor time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<Timestamp>,
    pub by_month: Vec<u32>,
    pub by_month_day: Vec<i32>,
    pub by_day: Vec<ByDay>,
    pub by_hour: Vec<u32>,
    pub by_minute: Vec<u32>,
    pub by_second: Vec<u32>,
    pub week_start: Weekday,
}

impl RecurrenceRule {
    /// A rule firing every `interval` units of `frequency`, unconstrained otherwise.
    #[must_use]
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            count: None,
            until: None,
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_day: Vec::new(),
            by_hour: Vec::new(),
            by_minute: Vec::new(),
            by_second: Vec::new(),
            week_start: Weekday::Mon,
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_uppercase();
        let text = text.strip_prefix("RRULE:").unwrap_or(&text);
        if text.is_empty() {
            return Err(RuleParseError::Empty);
        }

        let mut frequency = None;
        let mut rule = RecurrenceRule::new(Frequency::Daily);
        let mut seen: Vec<&str> = Vec::new();

        for part in text.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RuleParseError::MalformedPart(part.to_string()))?;
            if seen.contains(&key) {
                return Err(RuleParseError::DuplicatePart(key.to_string()));
            }
            seen.push(key);

            match key {
                "FREQ" => frequency = Some(value.parse::<Frequency>()?),
                "INTERVAL" => {
                    rule.interval = to_u32("INTERVAL", parse_int("INTERVAL", value)?, 1, u32::MAX)?;
                }
                "COUNT" => {
                    rule.count = Some(to_u32("COUNT", parse_int("COUNT", value)?, 1, u32::MAX)?);
                }
                "UNTIL" => rule.until = Some(parse_until(value)?),
                "BYMONTH" => rule.by_month = parse_list("BYMONTH", value, 1, 12)?,
                "BYHOUR" => rule.by_hour = parse_list("BYHOUR", value, 0, 23)?,
                "BYMINUTE" => rule.by_minute = parse_list("BYMINUTE", value, 0, 59)?,
                "BYSECOND" => rule.by_second = parse_list("BYSECOND", value, 0, 59)?,
                "BYMONTHDAY" => {
                    rule.by_month_day = value
                        .split(',')
                        .map(|v| {
                            let n = parse_int("BYMONTHDAY", v)?;
                            if n == 0 || !(-31..=31).contains(&n) {
                                return Err(RuleParseError::OutOfRange {
                                    part: "BYMONTHDAY",
                                    value: n,
                                });
                            }
                            Ok(i32::try_from(n).unwrap_or_default())
                        })
                        .collect::<Result<_, _>>()?;
                }
                "BYDAY" => {
                    rule.by_day = value
                        .split(',')
                        .map(parse_by_day)
                        .collect::<Result<_, _>>()?;
                }
                "WKST" => rule.week_start = parse_weekday(value)?,
                other => return Err(RuleParseError::UnknownPart(other.to_string())),
            }
        }

        rule.frequency = frequency.ok_or(RuleParseError::MissingFrequency)?;
        if rule.count.is_some() && rule.until.is_some() {
            return Err(RuleParseError::CountWithUntil);
        }
        let ordinals_allowed = matches!(rule.frequency, Frequency::Monthly | Frequency::Yearly);
        if !ordinals_allowed && rule.by_day.iter().any(|d| d.ordinal.is_some()) {
            return Err(RuleParseError::OrdinalNotAllowed);
        }
        rule.by_month.sort_unstable();
        rule.by_hour.sort_unstable();
        rule.by_minute.sort_unstable();
        rule.by_second.sort_unstable();
        Ok(rule)
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.frequency.as_str())?;
        if self.interval != 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))?;
        }
        write_list(f, "BYMONTH", &self.by_month)?;
        write_list(f, "BYMONTHDAY", &self.by_month_day)?;
        write_list(f, "BYDAY", &self.by_day)?;
        write_list(f, "BYHOUR", &self.by_hour)?;
        write_list(f, "BYMINUTE", &self.by_minute)?;
        write_list(f, "BYSECOND", &self.by_second)?;
        if self.week_start != Weekday::Mon {
            write!(f, ";WKST={}", weekday_code(self.week_start))?;
        }
        Ok(())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, key: &str, values: &[T]) -> fmt::Result {
    if values.is_empty() {
        return Ok(());
    }
    write!(f, ";{key}=")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

fn parse_int(part: &'static str, value: &str) -> Result<i64, RuleParseError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| RuleParseError::InvalidInteger {
            part,
            value: value.to_string(),
        })
}

fn to_u32(part: &'static str, n: i64, min: u32, max: u32) -> Result<u32, RuleParseError> {
    u32::try_from(n)
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or(RuleParseError::OutOfRange { part, value: n })
}

fn parse_list(
    part: &'static str,
    value: &str,
    min: u32,
    max: u32,
) -> Result<Vec<u32>, RuleParseError> {
    value
        .split(',')
        .map(|v| to_u32(part, parse_int(part, v)?, min, max))
        .collect()
}

fn parse_by_day(value: &str) -> Result<ByDay, RuleParseError> {
    let value = value.trim();
    if value.len() < 2 || !value.is_char_boundary(value.len() - 2) {
        return Err(RuleParseError::InvalidWeekday(value.to_string()));
    }
    let (ordinal, code) = value.split_at(value.len() - 2);
    let weekday = parse_weekday(code)?;
    let ordinal = if ordinal.is_empty() {
        None
    } else {
        let n = parse_int("BYDAY", ordinal.strip_prefix('+').unwrap_or(ordinal))?;
        if n == 0 || !(-53..=53).contains(&n) {
            return Err(RuleParseError::OutOfRange {
                part: "BYDAY",
                value: n,
            });
        }
        Some(i32::try_from(n).unwrap_or_default())
    };
    Ok(ByDay { ordinal, weekday })
}

fn parse_weekday(code: &str) -> Result<Weekday, RuleParseError> {
    match code {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(RuleParseError::InvalidWeekday(other.to_string())),
    }
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// Parse `UNTIL` as `YYYYMMDDTHHMMSSZ`, floating `YYYYMMDDTHHMMSS` (read as
/// UTC) or a bare `YYYYMMDD` date, which includes that whole day.
fn parse_until(value: &str) -> Result<Timestamp, RuleParseError> {
    let invalid = || RuleParseError::InvalidUntil(value.to_string());
    let naive = if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| invalid())?;
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).ok_or_else(invalid)?;
        date.and_time(end_of_day)
    } else {
        let text = value.strip_suffix('Z').unwrap_or(value);
        NaiveDateTime::parse_from_str(text, "%Y%m%dT%H%M%S").map_err(|_| invalid())?
    };
    Ok(naive.and_utc())
}
