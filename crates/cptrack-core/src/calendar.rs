//! Submission-calendar math shared by the CodeChef, Codeforces and GitHub
//! records: trailing windows, aggregates, intensity levels and streaks.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// One calendar cell. `level` is the 0..=4 intensity bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub count: u32,
    #[serde(default)]
    pub level: u8,
}

impl CalendarDay {
    pub fn new(date: NaiveDate, count: u32) -> Self {
        Self { date, count, level: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubmissionStats {
    pub days_with_submissions: u32,
    pub max_daily: u32,
    pub avg_daily: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Collapses duplicate dates (summing counts) and returns cells sorted by date.
pub fn collapse_days(days: impl IntoIterator<Item = CalendarDay>) -> Vec<CalendarDay> {
    let mut by_date: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    for day in days {
        *by_date.entry(day.date).or_default() += day.count;
    }
    by_date
        .into_iter()
        .map(|(date, count)| CalendarDay::new(date, count))
        .collect()
}

/// Keeps the cells in `(today - window_days, today]`.
pub fn trailing_window(days: Vec<CalendarDay>, today: NaiveDate, window_days: u32) -> Vec<CalendarDay> {
    let start = today - Duration::days(i64::from(window_days));
    days.into_iter()
        .filter(|d| d.date > start && d.date <= today)
        .collect()
}

pub fn total_count(days: &[CalendarDay]) -> u32 {
    days.iter().map(|d| d.count).sum()
}

/// `avg_daily` is `total / days_with_submissions` rounded to two decimals,
/// 0 when no day has submissions.
pub fn submission_stats(days: &[CalendarDay]) -> SubmissionStats {
    let active: Vec<u32> = days.iter().map(|d| d.count).filter(|c| *c > 0).collect();
    let days_with_submissions = active.len() as u32;
    let max_daily = active.iter().copied().max().unwrap_or(0);
    let total: u32 = active.iter().sum();
    let avg_daily = if days_with_submissions == 0 {
        0.0
    } else {
        round2(f64::from(total) / f64::from(days_with_submissions))
    };
    SubmissionStats {
        days_with_submissions,
        max_daily,
        avg_daily,
    }
}

/// Intensity bucket: `min(4, count / max(1, max_daily / 4))`.
pub fn intensity_level(count: u32, max_daily: u32) -> u8 {
    if count == 0 {
        return 0;
    }
    let step = (max_daily / 4).max(1);
    (count / step).min(4) as u8
}

pub fn assign_levels(days: &mut [CalendarDay]) {
    let max_daily = days.iter().map(|d| d.count).max().unwrap_or(0);
    for day in days.iter_mut() {
        day.level = intensity_level(day.count, max_daily);
    }
}

/// Consecutive active days ending today, or yesterday when today has no
/// activity yet.
pub fn current_streak(days: &[CalendarDay], today: NaiveDate) -> u32 {
    let active: BTreeMap<NaiveDate, u32> = days
        .iter()
        .filter(|d| d.count > 0)
        .map(|d| (d.date, d.count))
        .collect();

    let mut cursor = today;
    if !active.contains_key(&cursor) {
        cursor -= Duration::days(1);
    }
    let mut streak = 0;
    while active.contains_key(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

pub fn longest_streak(days: &[CalendarDay]) -> u32 {
    let mut dates: Vec<NaiveDate> = days.iter().filter(|d| d.count > 0).map(|d| d.date).collect();
    dates.sort();
    dates.dedup();

    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for date in dates {
        run = match prev {
            Some(p) if date - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(date);
    }
    best
}

/// Sum of counts over the last `days_back` days including today.
pub fn recent_total(days: &[CalendarDay], today: NaiveDate, days_back: u32) -> u32 {
    let start = today - Duration::days(i64::from(days_back));
    days.iter()
        .filter(|d| d.date > start && d.date <= today)
        .map(|d| d.count)
        .sum()
}
