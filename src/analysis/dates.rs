use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display sentinel for months without a run
pub const NO_RUN: &str = "-";

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Validation year for dates that carry no year (leap, so `29-02` is accepted)
const YEARLESS_PROBE: i32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Parses the `YYYY-MM` keys used by keyed monthly records.
    pub fn parse(raw: &str) -> Option<Self> {
        let (year, month) = raw.trim().split_once('-')?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return None;
        }
        if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn current() -> Self {
        Self::of(chrono::Local::now().date_naive())
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// `count` consecutive months ending at `self`, oldest first.
    pub fn window_ending(self, count: usize) -> Vec<YearMonth> {
        let mut months = Vec::with_capacity(count);
        let mut cursor = self;
        for _ in 0..count {
            months.push(cursor);
            cursor = cursor.pred();
        }
        months.reverse();
        months
    }

    /// All twelve months of `year`.
    pub fn calendar_year(year: i32) -> Vec<YearMonth> {
        (1..=12).map(|month| YearMonth { year, month }).collect()
    }

    /// Axis label such as `Oct 25`
    pub fn label(&self) -> String {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .map(|d| d.format("%b %y").to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A normalised run date. Day-month encodings carry no year; the requested
/// year stands in for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunDate {
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
}

impl RunDate {
    pub fn in_month(&self, ym: YearMonth) -> bool {
        self.month == ym.month && self.year.map_or(true, |year| year == ym.year)
    }

    pub fn resolve(&self, year_context: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year.unwrap_or(year_context), self.month, self.day)
    }

    fn from_date(date: NaiveDate) -> Self {
        Self {
            year: Some(date.year()),
            month: date.month(),
            day: date.day(),
        }
    }
}

/// Sentinels the dashboard uses for "no run this month".
pub fn is_absent(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed == NO_RUN
        || trimmed == "—"
        || trimmed.eq_ignore_ascii_case("not run")
        || trimmed.eq_ignore_ascii_case("n/a")
}

/// Normalises every date encoding seen in customer payloads.
///
/// Accepted: `YYYY-MM-DD`, ISO/RFC 3339 timestamps, `DD-MM`, `D-Mon-YY`,
/// `D-Mon-YYYY` and `DD/MM/YYYY`. Anything else is `None`.
pub fn parse_run_date(raw: &str) -> Option<RunDate> {
    let s = raw.trim();
    if is_absent(s) {
        return None;
    }

    if let Some(date) = parse_iso(s) {
        return Some(RunDate::from_date(date));
    }

    if let Some((day, month, year)) = split3(s, '/') {
        let date = NaiveDate::from_ymd_opt(parse_year(year)?, parse_number(month)?, parse_number(day)?)?;
        return Some(RunDate::from_date(date));
    }

    if let Some((day, month, year)) = split3(s, '-') {
        let month = month_from_name(month)?;
        let date = NaiveDate::from_ymd_opt(parse_year(year)?, month, parse_number(day)?)?;
        return Some(RunDate::from_date(date));
    }

    let (day, month) = s.split_once('-')?;
    let (day, month) = (parse_number(day)?, parse_number(month)?);
    NaiveDate::from_ymd_opt(YEARLESS_PROBE, month, day)?;
    Some(RunDate { year: None, month, day })
}

/// `25-Aug-24`
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%y").to_string()
}

fn parse_iso(s: &str) -> Option<NaiveDate> {
    let head = s.get(..10)?;
    let date = NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    if s.len() == 10 {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}

fn split3(s: &str, sep: char) -> Option<(&str, &str, &str)> {
    let mut parts = s.split(sep);
    let first = parts.next()?;
    let second = parts.next()?;
    let third = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((first, second, third))
}

fn parse_number(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > 2 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match raw.len() {
        2 => raw.parse::<i32>().ok().map(|yy| 2000 + yy),
        4 => raw.parse().ok(),
        _ => None,
    }
}

fn month_from_name(raw: &str) -> Option<u32> {
    let lower = raw.trim().to_ascii_lowercase();
    let prefix = lower.get(..3)?;
    MONTH_ABBREVIATIONS
        .iter()
        .position(|abbr| *abbr == prefix)
        .map(|index| index as u32 + 1)
}
