//! Monthly run reconciliation.
//!
//! Customer and network records describe "when did this run" in three
//! encodings that evolved independently: ordered sequences, keyed mappings
//! and a single `last_run_date`. Each encoding is a [`RunSource`]; sources
//! are tried in that order and the first one that matches the requested
//! month decides the result.

use crate::analysis::dates::{format_display_date, is_absent, parse_run_date, YearMonth, NO_RUN};
use crate::models::customer::{Customer, MonthlyRuns, RunRecord, RunSlot, RunsField};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub enum RunSource<'a> {
    Sequence(&'a [RunSlot]),
    Mapping(&'a BTreeMap<String, RunSlot>),
    LastRun(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRunResult {
    pub count: u64,
    pub display_date: String,
}

impl MonthlyRunResult {
    pub fn none() -> Self {
        Self {
            count: 0,
            display_date: NO_RUN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MonthOutcome {
    Matched(MonthlyRunResult),
    NoData,
    /// Nothing matched and at least one entry could not be read.
    Malformed { rejected: Vec<String> },
}

impl MonthOutcome {
    pub fn summary(&self) -> MonthlyRunResult {
        match self {
            MonthOutcome::Matched(result) => result.clone(),
            MonthOutcome::NoData | MonthOutcome::Malformed { .. } => MonthlyRunResult::none(),
        }
    }
}

/// Runs found for one month in one source.
#[derive(Debug, Default)]
struct Tally {
    count: u64,
    dates: Vec<NaiveDate>,
}

impl Tally {
    fn add(&mut self, count: u64, date: Option<NaiveDate>) {
        self.count = self.count.saturating_add(count);
        if let Some(date) = date {
            self.dates.push(date);
        }
    }

    fn merge(&mut self, other: Tally) {
        self.count = self.count.saturating_add(other.count);
        self.dates.extend(other.dates);
    }

    fn into_result(self) -> MonthlyRunResult {
        let display_date = match self.dates.iter().max() {
            Some(latest) => format_display_date(*latest),
            None => self.count.to_string(),
        };
        MonthlyRunResult {
            count: self.count,
            display_date,
        }
    }
}

enum Scan {
    Hit(Tally),
    Miss { rejected: Vec<String> },
}

/// Sources of a record in priority order: sequences, then mappings, then
/// the single `last_run_date`.
pub fn sources<R: RunRecord + ?Sized>(record: &R) -> Vec<RunSource<'_>> {
    let monthly: Vec<&MonthlyRuns> = [
        record.monthly_runs(),
        match record.runs() {
            Some(RunsField::Monthly(monthly)) => Some(monthly),
            _ => None,
        },
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut out = Vec::with_capacity(monthly.len() + 1);
    out.extend(monthly.iter().copied().filter_map(|m| match m {
        MonthlyRuns::Indexed(slots) => Some(RunSource::Sequence(slots.as_slice())),
        MonthlyRuns::Keyed(_) => None,
    }));
    out.extend(monthly.iter().copied().filter_map(|m| match m {
        MonthlyRuns::Keyed(map) => Some(RunSource::Mapping(map)),
        MonthlyRuns::Indexed(_) => None,
    }));
    if let Some(raw) = record.last_run_date() {
        out.push(RunSource::LastRun(raw));
    }
    out
}

/// Reconciles a single network (or any record) for one month.
pub fn reconcile_record<R: RunRecord + ?Sized>(record: &R, ym: YearMonth) -> MonthOutcome {
    match scan_record(record, ym) {
        Scan::Hit(tally) => MonthOutcome::Matched(tally.into_result()),
        Scan::Miss { rejected } => miss_outcome(rejected),
    }
}

/// Reconciles a customer: its own monthly record first, then the aggregate
/// of its networks (summed counts, latest date).
pub fn reconcile_customer(customer: &Customer, ym: YearMonth) -> MonthOutcome {
    let mut rejected = match scan_record(customer, ym) {
        Scan::Hit(tally) => return MonthOutcome::Matched(tally.into_result()),
        Scan::Miss { rejected } => rejected,
    };

    let mut aggregate: Option<Tally> = None;
    for network in &customer.networks {
        match scan_record(network, ym) {
            Scan::Hit(tally) => aggregate.get_or_insert_with(Tally::default).merge(tally),
            Scan::Miss { rejected: more } => rejected.extend(more),
        }
    }

    match aggregate {
        Some(tally) => MonthOutcome::Matched(tally.into_result()),
        None => miss_outcome(rejected),
    }
}

/// Every dated run of the winning source, oldest first, formatted `D-Mon-YY`.
pub fn network_month_run_dates<R: RunRecord + ?Sized>(record: &R, ym: YearMonth) -> Vec<String> {
    let Scan::Hit(mut tally) = scan_record(record, ym) else {
        return Vec::new();
    };
    tally.dates.sort();
    tally.dates.dedup();
    tally.dates.into_iter().map(format_display_date).collect()
}

fn miss_outcome(rejected: Vec<String>) -> MonthOutcome {
    if rejected.is_empty() {
        MonthOutcome::NoData
    } else {
        MonthOutcome::Malformed { rejected }
    }
}

fn scan_record<R: RunRecord + ?Sized>(record: &R, ym: YearMonth) -> Scan {
    let mut rejected = Vec::new();
    for source in sources(record) {
        let tally = scan_source(source, ym, &mut rejected);
        if tally.count > 0 {
            return Scan::Hit(tally);
        }
    }
    Scan::Miss { rejected }
}

fn scan_source(source: RunSource<'_>, ym: YearMonth, rejected: &mut Vec<String>) -> Tally {
    let mut tally = Tally::default();
    match source {
        RunSource::Sequence(slots) => {
            for (index, slot) in slots.iter().enumerate() {
                match slot {
                    RunSlot::Empty => {}
                    RunSlot::Text(raw) if is_absent(raw) => {}
                    RunSlot::Text(raw) => match parse_run_date(raw) {
                        Some(date) if date.in_month(ym) => match date.resolve(ym.year) {
                            Some(resolved) => tally.add(1, Some(resolved)),
                            None => rejected.push(raw.clone()),
                        },
                        Some(_) => {}
                        None => rejected.push(raw.clone()),
                    },
                    // Bare counts are positional: slot i is month i + 1.
                    RunSlot::Count(count) => {
                        if index as u32 + 1 == ym.month {
                            tally.add(*count, None);
                        }
                    }
                    RunSlot::Other(value) => rejected.push(value.to_string()),
                }
            }
        }
        RunSource::Mapping(map) => {
            for (key, value) in map {
                if let Some(key_month) = YearMonth::parse(key) {
                    if key_month == ym {
                        scan_month_bucket(key_month, value, &mut tally, rejected);
                    }
                    continue;
                }

                let Some(date) = parse_run_date(key) else {
                    rejected.push(key.clone());
                    continue;
                };
                if !date.in_month(ym) {
                    continue;
                }
                let Some(resolved) = date.resolve(ym.year) else {
                    rejected.push(key.clone());
                    continue;
                };
                match value {
                    RunSlot::Empty => {}
                    RunSlot::Text(raw) if is_absent(raw) => {}
                    RunSlot::Count(count) => tally.add(*count, Some(resolved).filter(|_| *count > 0)),
                    RunSlot::Text(_) | RunSlot::Other(_) => tally.add(1, Some(resolved)),
                }
            }
        }
        RunSource::LastRun(raw) => {
            if is_absent(raw) {
                return tally;
            }
            match parse_run_date(raw) {
                Some(date) if date.year == Some(ym.year) && date.month == ym.month => {
                    tally.add(1, date.resolve(ym.year));
                }
                Some(_) => {}
                None => rejected.push(raw.to_string()),
            }
        }
    }
    tally
}

/// Value stored under a `YYYY-MM` key. Year-less values take the key's year.
fn scan_month_bucket(key_month: YearMonth, value: &RunSlot, tally: &mut Tally, rejected: &mut Vec<String>) {
    match value {
        RunSlot::Empty => {}
        RunSlot::Text(raw) if is_absent(raw) => {}
        RunSlot::Text(raw) => match parse_run_date(raw) {
            Some(date) => match date.resolve(key_month.year) {
                Some(resolved) => tally.add(1, Some(resolved)),
                None => rejected.push(raw.clone()),
            },
            None => rejected.push(raw.clone()),
        },
        RunSlot::Count(count) => tally.add(*count, None),
        RunSlot::Other(other) => rejected.push(other.to_string()),
    }
}
