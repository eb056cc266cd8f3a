//! Occurrence expansion: rule + anchor + window → concrete fire times.

use std::collections::VecDeque;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use super::rule::{ByDay, Frequency, RecurrenceRule};
use crate::time::Timestamp;

/// Upper bound on periods scanned by a single expansion.
///
/// Every realistic rule reaches the end of its window long before this;
/// the bound only guards against rules that can never match.
const MAX_SCANNED_PERIODS: u32 = 1_000_000;

/// Lazily produced, ascending occurrences inside an inclusive window.
///
/// Built by [`expand`]. Holds no state beyond one expansion, so expanding the
/// same inputs again yields the same sequence.
#[derive(Debug, Clone)]
pub struct Occurrences {
    inner: Inner,
}

#[derive(Debug, Clone)]
enum Inner {
    Single(Option<Timestamp>),
    Rule(Box<RuleCursor>),
}

impl Iterator for Occurrences {
    type Item = Timestamp;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Single(slot) => slot.take(),
            Inner::Rule(cursor) => cursor.advance().map(|dt| dt.and_utc()),
        }
    }
}

/// Expand an event anchored at `anchor` into its occurrences within
/// `[window_start, window_end]` (both inclusive).
///
/// Without a rule the anchor itself is the only candidate. With a rule,
/// occurrences never precede the anchor and `COUNT` is counted from the
/// anchor, not from the window.
#[must_use]
pub fn expand(
    anchor: Timestamp,
    rule: Option<&RecurrenceRule>,
    window_start: Timestamp,
    window_end: Timestamp,
) -> Occurrences {
    let inner = match rule {
        _ if window_start > window_end => Inner::Single(None),
        None => Inner::Single(
            (window_start <= anchor && anchor <= window_end).then_some(anchor),
        ),
        Some(rule) => Inner::Rule(Box::new(RuleCursor::new(
            rule.clone(),
            anchor.naive_utc(),
            window_start.naive_utc(),
            window_end.naive_utc(),
        ))),
    };
    Occurrences { inner }
}

#[derive(Debug, Clone)]
struct RuleCursor {
    rule: RecurrenceRule,
    anchor: NaiveDateTime,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    until: Option<NaiveDateTime>,
    next_period: i64,
    buffer: VecDeque<NaiveDateTime>,
    counted: u32,
    scanned: u32,
    finished: bool,
}

impl RuleCursor {
    fn new(
        rule: RecurrenceRule,
        anchor: NaiveDateTime,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Self {
        let until = rule.until.map(|u| u.naive_utc());
        // Candidates have whole-second precision.
        let anchor = anchor.with_nanosecond(0).unwrap_or(anchor);
        let mut cursor = Self {
            rule,
            anchor,
            window_start,
            window_end,
            until,
            next_period: 0,
            buffer: VecDeque::new(),
            counted: 0,
            scanned: 0,
            finished: false,
        };
        // COUNT is relative to the anchor, so only uncounted rules may skip ahead.
        if cursor.rule.count.is_none() {
            cursor.next_period = cursor.first_useful_period();
        }
        cursor
    }

    fn interval(&self) -> i64 {
        i64::from(self.rule.interval)
    }

    /// The latest interval-aligned period index that cannot be after the
    /// window start, backed off by one step so nothing is lost at the edge.
    fn first_useful_period(&self) -> i64 {
        let elapsed = periods_between(
            self.rule.frequency,
            self.anchor,
            self.window_start,
            self.rule.week_start,
        );
        if elapsed <= 0 {
            return 0;
        }
        let steps = elapsed / self.interval() - 1;
        steps.max(0) * self.interval()
    }

    fn advance(&mut self) -> Option<NaiveDateTime> {
        loop {
            if let Some(candidate) = self.buffer.pop_front() {
                if self.rule.count.is_some_and(|count| self.counted >= count) {
                    self.finish();
                    return None;
                }
                self.counted += 1;
                if candidate > self.window_end {
                    self.finish();
                    return None;
                }
                if candidate < self.window_start {
                    continue;
                }
                return Some(candidate);
            }

            if self.finished {
                return None;
            }
            if self.scanned >= MAX_SCANNED_PERIODS {
                self.finish();
                continue;
            }
            self.scanned += 1;

            let period = self.next_period;
            self.next_period = period.saturating_add(self.interval());
            let Some(start) = self.period_start(period) else {
                self.finish();
                continue;
            };
            if start > self.window_end || self.until.is_some_and(|u| start > u) {
                self.finish();
                continue;
            }

            let mut candidates = self.candidates(start);
            candidates.sort_unstable();
            candidates.dedup();
            let anchor = self.anchor;
            let until = self.until;
            self.buffer.extend(
                candidates
                    .into_iter()
                    .filter(|c| *c >= anchor && until.is_none_or(|u| *c <= u)),
            );
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.buffer.clear();
    }

    /// First instant covered by period `index`.
    fn period_start(&self, index: i64) -> Option<NaiveDateTime> {
        let anchor = self.anchor;
        let midnight = NaiveTime::MIN;
        match self.rule.frequency {
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(anchor.year()) + index).ok()?;
                NaiveDate::from_ymd_opt(year, 1, 1).map(|d| d.and_time(midnight))
            }
            Frequency::Monthly => {
                let first = NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), 1)?;
                let months = u32::try_from(index).ok()?;
                first
                    .checked_add_months(Months::new(months))
                    .map(|d| d.and_time(midnight))
            }
            Frequency::Weekly => {
                let week = week_start(anchor.date(), self.rule.week_start);
                add_days(week, index.checked_mul(7)?).map(|d| d.and_time(midnight))
            }
            Frequency::Daily => add_days(anchor.date(), index).map(|d| d.and_time(midnight)),
            Frequency::Hourly => {
                let base = anchor.with_minute(0)?.with_second(0)?.with_nanosecond(0)?;
                base.checked_add_signed(TimeDelta::try_hours(index)?)
            }
            Frequency::Minutely => {
                let base = anchor.with_second(0)?.with_nanosecond(0)?;
                base.checked_add_signed(TimeDelta::try_minutes(index)?)
            }
            Frequency::Secondly => {
                let base = anchor.with_nanosecond(0)?;
                base.checked_add_signed(TimeDelta::try_seconds(index)?)
            }
        }
    }

    fn candidates(&self, start: NaiveDateTime) -> Vec<NaiveDateTime> {
        match self.rule.frequency {
            Frequency::Hourly | Frequency::Minutely | Frequency::Secondly => {
                self.sub_daily_candidates(start)
            }
            Frequency::Daily | Frequency::Weekly | Frequency::Monthly | Frequency::Yearly => {
                let times = self.times_of_day();
                self.dates(start.date())
                    .into_iter()
                    .flat_map(|date| times.iter().map(move |t| date.and_time(*t)))
                    .collect()
            }
        }
    }

    /// Candidate dates for a day-or-coarser period.
    fn dates(&self, start: NaiveDate) -> Vec<NaiveDate> {
        let rule = &self.rule;
        let no_day_selectors = rule.by_month_day.is_empty() && rule.by_day.is_empty();
        match rule.frequency {
            Frequency::Daily => {
                if self.date_matches(start, Scope::Month) {
                    vec![start]
                } else {
                    Vec::new()
                }
            }
            Frequency::Weekly => (0..7)
                .filter_map(|offset| start.checked_add_days(Days::new(offset)))
                .filter(|d| {
                    if rule.by_day.is_empty() {
                        d.weekday() == self.anchor.weekday() && self.month_allowed(d.month())
                    } else {
                        self.date_matches(*d, Scope::Month)
                    }
                })
                .collect(),
            Frequency::Monthly => {
                if !self.month_allowed(start.month()) {
                    return Vec::new();
                }
                month_days(start)
                    .filter(|d| {
                        if no_day_selectors {
                            d.day() == self.anchor.day()
                        } else {
                            self.date_matches(*d, Scope::Month)
                        }
                    })
                    .collect()
            }
            Frequency::Yearly => {
                let months: Vec<u32> = if !rule.by_month.is_empty() {
                    rule.by_month.clone()
                } else if no_day_selectors {
                    vec![self.anchor.month()]
                } else {
                    (1..=12).collect()
                };
                let scope = if rule.by_month.is_empty() {
                    Scope::Year
                } else {
                    Scope::Month
                };
                months
                    .into_iter()
                    .filter_map(|m| NaiveDate::from_ymd_opt(start.year(), m, 1))
                    .flat_map(month_days)
                    .filter(|d| {
                        if no_day_selectors {
                            d.day() == self.anchor.day()
                        } else {
                            self.date_matches(*d, scope)
                        }
                    })
                    .collect()
            }
            Frequency::Hourly | Frequency::Minutely | Frequency::Secondly => Vec::new(),
        }
    }

    /// Times of day for day-or-coarser periods; missing parts come from the anchor.
    fn times_of_day(&self) -> Vec<NaiveTime> {
        let rule = &self.rule;
        let hours = or_anchor(&rule.by_hour, self.anchor.hour());
        let minutes = or_anchor(&rule.by_minute, self.anchor.minute());
        let seconds = or_anchor(&rule.by_second, self.anchor.second());
        let mut times = Vec::with_capacity(hours.len() * minutes.len() * seconds.len());
        for h in &hours {
            for m in &minutes {
                for s in &seconds {
                    if let Some(t) = NaiveTime::from_hms_opt(*h, *m, *s) {
                        times.push(t);
                    }
                }
            }
        }
        times
    }

    /// Candidates for hourly, minutely and secondly periods: the period fixes
    /// the coarse components, `BY*` lists filter them, finer ones expand.
    fn sub_daily_candidates(&self, start: NaiveDateTime) -> Vec<NaiveDateTime> {
        let rule = &self.rule;
        if !self.date_matches(start.date(), Scope::Month) {
            return Vec::new();
        }
        if !allows(&rule.by_hour, start.hour()) {
            return Vec::new();
        }
        let minutes = match rule.frequency {
            Frequency::Hourly => or_anchor(&rule.by_minute, self.anchor.minute()),
            _ if allows(&rule.by_minute, start.minute()) => vec![start.minute()],
            _ => return Vec::new(),
        };
        let seconds = match rule.frequency {
            Frequency::Secondly if allows(&rule.by_second, start.second()) => {
                vec![start.second()]
            }
            Frequency::Secondly => return Vec::new(),
            _ => or_anchor(&rule.by_second, self.anchor.second()),
        };
        let date = start.date();
        let hour = start.hour();
        minutes
            .iter()
            .flat_map(|m| seconds.iter().map(move |s| (*m, *s)))
            .filter_map(|(m, s)| NaiveTime::from_hms_opt(hour, m, s))
            .map(|t| date.and_time(t))
            .collect()
    }

    fn month_allowed(&self, month: u32) -> bool {
        allows(&self.rule.by_month, month)
    }

    fn date_matches(&self, date: NaiveDate, scope: Scope) -> bool {
        let rule = &self.rule;
        if !self.month_allowed(date.month()) {
            return false;
        }
        if !rule.by_month_day.is_empty()
            && !rule
                .by_month_day
                .iter()
                .any(|md| month_day_matches(date, *md))
        {
            return false;
        }
        if !rule.by_day.is_empty()
            && !rule
                .by_day
                .iter()
                .any(|bd| by_day_matches(date, *bd, scope))
        {
            return false;
        }
        true
    }
}

/// Span that `BYDAY` ordinals are counted in.
#[derive(Debug, Clone, Copy)]
enum Scope {
    Month,
    Year,
}

fn allows(list: &[u32], value: u32) -> bool {
    list.is_empty() || list.contains(&value)
}

fn or_anchor(list: &[u32], anchor_value: u32) -> Vec<u32> {
    if list.is_empty() {
        vec![anchor_value]
    } else {
        list.to_vec()
    }
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(TimeDelta::try_days(days)?)
}

fn week_start(date: NaiveDate, first_day: chrono::Weekday) -> NaiveDate {
    let back = (7 + date.weekday().num_days_from_monday() - first_day.num_days_from_monday()) % 7;
    date.checked_sub_days(Days::new(u64::from(back))).unwrap_or(date)
}

fn month_days(first: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    first.iter_days().take_while(move |d| d.month() == first.month())
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .map_or(31, |last| last.day())
}

fn month_day_matches(date: NaiveDate, month_day: i32) -> bool {
    let day = i64::from(date.day());
    let wanted = if month_day > 0 {
        i64::from(month_day)
    } else {
        i64::from(last_day_of_month(date)) + i64::from(month_day) + 1
    };
    day == wanted
}

fn by_day_matches(date: NaiveDate, by_day: ByDay, scope: Scope) -> bool {
    if date.weekday() != by_day.weekday {
        return false;
    }
    let Some(ordinal) = by_day.ordinal else {
        return true;
    };
    let (first, last) = match scope {
        Scope::Month => (
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            NaiveDate::from_ymd_opt(date.year(), date.month(), last_day_of_month(date)),
        ),
        Scope::Year => (
            NaiveDate::from_ymd_opt(date.year(), 1, 1),
            NaiveDate::from_ymd_opt(date.year(), 12, 31),
        ),
    };
    let (Some(first), Some(last)) = (first, last) else {
        return false;
    };
    if ordinal > 0 {
        (date - first).num_days() / 7 + 1 == i64::from(ordinal)
    } else {
        (last - date).num_days() / 7 + 1 == -i64::from(ordinal)
    }
}

/// Whole periods of `frequency` from the period containing `from` to the one
/// containing `to`.
fn periods_between(
    frequency: Frequency,
    from: NaiveDateTime,
    to: NaiveDateTime,
    first_day: chrono::Weekday,
) -> i64 {
    match frequency {
        Frequency::Yearly => i64::from(to.year()) - i64::from(from.year()),
        Frequency::Monthly => {
            (i64::from(to.year()) * 12 + i64::from(to.month0()))
                - (i64::from(from.year()) * 12 + i64::from(from.month0()))
        }
        Frequency::Weekly => {
            (week_start(to.date(), first_day) - week_start(from.date(), first_day)).num_days() / 7
        }
        Frequency::Daily => (to.date() - from.date()).num_days(),
        Frequency::Hourly => (truncate(to, 3600) - truncate(from, 3600)).num_hours(),
        Frequency::Minutely => (truncate(to, 60) - truncate(from, 60)).num_minutes(),
        Frequency::Secondly => (truncate(to, 1) - truncate(from, 1)).num_seconds(),
    }
}

fn truncate(dt: NaiveDateTime, unit_seconds: u32) -> NaiveDateTime {
    let secs = dt.num_seconds_from_midnight();
    let kept = secs - secs % unit_seconds;
    NaiveTime::from_num_seconds_from_midnight_opt(kept, 0)
        .map_or(dt, |t| dt.date().and_time(t))
}
