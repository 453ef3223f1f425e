//! Draft to canonical record: fills defaults, derives aggregates, repairs
//! invariants and truncates history.

mod codechef;
mod codeforces;
mod github;
mod leetcode;

use chrono::{DateTime, Utc};
use cptrack_adapters::ExtractOptions;
use cptrack_core::calendar::{assign_levels, collapse_days, trailing_window, CalendarDay};
use cptrack_core::draft::CodolioDraft;
use cptrack_core::record::{CodolioRecord, RecordHeader};
use cptrack_core::{DataSource, PlatformRecord, ProfileDraft, Source};
use tracing::warn;

pub use codechef::{division_for, estimate_contest_date, DATE_ESTIMATION_BASE};

/// Normalizes any draft; `now` anchors the trailing windows.
pub fn normalize(draft: ProfileDraft, options: &ExtractOptions, now: DateTime<Utc>) -> PlatformRecord {
    match draft {
        ProfileDraft::LeetCode(d) => PlatformRecord::LeetCode(leetcode::normalize(d, options, now)),
        ProfileDraft::CodeChef(d) => PlatformRecord::CodeChef(codechef::normalize(d, options, now)),
        ProfileDraft::Codeforces(d) => PlatformRecord::Codeforces(codeforces::normalize(d, options, now)),
        ProfileDraft::GitHub(d) => PlatformRecord::GitHub(github::normalize(d, options, now)),
        ProfileDraft::Codolio(d) => PlatformRecord::Codolio(codolio(d)),
    }
}

fn header(handle: &str, fetched_at: DateTime<Utc>, data_source: DataSource) -> RecordHeader {
    RecordHeader {
        username: handle.to_string(),
        last_updated: fetched_at,
        data_source,
    }
}

/// Replaces an implausible `max_rating` (below a positive `rating`) with the
/// rating itself.
pub fn repair_max_rating(source: Source, handle: &str, rating: i64, max_rating: i64) -> i64 {
    if rating > 0 && max_rating < rating {
        warn!(%source, handle, rating, max_rating, "max_rating below rating; using rating");
        rating
    } else {
        max_rating
    }
}

/// Collapsed, windowed and level-tagged calendar, ascending by date.
fn windowed_calendar(days: Vec<CalendarDay>, now: DateTime<Utc>, window_days: u32) -> Vec<CalendarDay> {
    let mut days = trailing_window(collapse_days(days), now.date_naive(), window_days);
    assign_levels(&mut days);
    days
}

fn codolio(draft: CodolioDraft) -> CodolioRecord {
    CodolioRecord {
        header: header(&draft.handle, draft.fetched_at, DataSource::CodolioBrowser),
        total_active_days: draft.total_active_days.unwrap_or(0),
        total_contests: draft.total_contests.unwrap_or(0),
        total_submissions: draft.total_submissions.unwrap_or(0),
        badges: draft.badges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn implausible_max_is_replaced_by_rating() {
        assert_eq!(repair_max_rating(Source::CodeChef, "x", 1500, 1400), 1500);
        assert_eq!(repair_max_rating(Source::CodeChef, "x", 1500, 1600), 1600);
        assert_eq!(repair_max_rating(Source::CodeChef, "x", 0, 0), 0);
    }

    #[test]
    fn calendar_is_windowed_and_levelled() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        let day = |d: u32, c: u32| CalendarDay::new(NaiveDate::from_ymd_opt(2026, 3, d).unwrap(), c);
        let days = windowed_calendar(vec![day(9, 2), day(9, 2), day(10, 8), day(1, 1)], now, 5);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].count, 4);
        assert_eq!(days[1].level, 4);
    }
}
