use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use cptrack_adapters::ExtractOptions;
use cptrack_core::calendar::{submission_stats, total_count};
use cptrack_core::draft::{CodeChefDraft, CodeChefRatingPoint, ContestSolved};
use cptrack_core::record::{CodeChefContest, CodeChefRecord};
use cptrack_core::Source;
use regex::Regex;

use super::{header, repair_max_rating, windowed_calendar};

/// Anchor for contest-date estimation: Starters 219 ended on this day.
pub const DATE_ESTIMATION_BASE: NaiveDate = match NaiveDate::from_ymd_opt(2025, 12, 31) {
    Some(date) => date,
    None => NaiveDate::MIN,
};
const STARTERS_ANCHOR: i64 = 219;
const COOK_OFF_ANCHOR: i64 = 150;
const LUNCHTIME_ANCHOR: i64 = 120;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("contest pattern {pattern}: {e}"))
}

static STARTERS: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\bSTART(?:ERS)?\s*(\d+)"));
static COOK_OFF: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\bCOOK(?:[\s-]*OFF)?\s*(\d+)"));
static LUNCHTIME: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\b(?:LTIME|LUNCHTIME)\s*(\d+)"));

pub fn division_for(rating: i64) -> &'static str {
    match rating {
        r if r >= 2500 => "Div 1",
        r if r >= 1800 => "Div 2",
        r if r >= 1400 => "Div 3",
        _ => "Div 4",
    }
}

fn contest_number(re: &Regex, code: &str, name: &str) -> Option<i64> {
    [code, name]
        .into_iter()
        .find_map(|text| re.captures(text)?.get(1)?.as_str().parse().ok())
}

fn shift_months(base: NaiveDate, back: i64) -> Option<NaiveDate> {
    let months = Months::new(u32::try_from(back.unsigned_abs()).ok()?);
    if back >= 0 {
        base.checked_sub_months(months)
    } else {
        base.checked_add_months(months)
    }
}

/// Weekly cadence for Starters, monthly for Cook-Off and Lunchtime, counted
/// back from [`DATE_ESTIMATION_BASE`]: Starters N lands on
/// `base - (anchor - N)` weeks, so lower numbers always date earlier. Adding
/// the offset instead would put Starters 100 after Starters 219.
pub fn estimate_contest_date(code: &str, name: &str) -> Option<NaiveDate> {
    if let Some(n) = contest_number(&STARTERS, code, name) {
        return DATE_ESTIMATION_BASE.checked_sub_signed(Duration::weeks(STARTERS_ANCHOR - n));
    }
    if let Some(n) = contest_number(&COOK_OFF, code, name) {
        return shift_months(DATE_ESTIMATION_BASE, COOK_OFF_ANCHOR - n);
    }
    if let Some(n) = contest_number(&LUNCHTIME, code, name) {
        return shift_months(DATE_ESTIMATION_BASE, LUNCHTIME_ANCHOR - n);
    }
    None
}

/// Whether `needle` occurs in `haystack` with no letter or digit directly
/// on either side, so "starters 21" does not match inside "starters 210".
fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn exact_match(point: &CodeChefRatingPoint, solved: &ContestSolved) -> bool {
    let title = solved.contest.trim();
    !title.is_empty() && (title.eq_ignore_ascii_case(point.code.trim()) || title.eq_ignore_ascii_case(point.name.trim()))
}

fn token_match(point: &CodeChefRatingPoint, solved: &ContestSolved) -> bool {
    let title = solved.contest.trim().to_ascii_lowercase();
    let code = point.code.trim().to_ascii_lowercase();
    let name = point.name.trim().to_ascii_lowercase();
    if title.is_empty() {
        return false;
    }
    contains_token(&title, &code) || contains_token(&title, &name) || contains_token(&name, &title)
}

/// Exact code or name matches win over token matches.
fn problems_for(point: &CodeChefRatingPoint, solved: &[ContestSolved]) -> Vec<String> {
    solved
        .iter()
        .find(|s| exact_match(point, s))
        .or_else(|| solved.iter().find(|s| token_match(point, s)))
        .map(|s| s.problems.clone())
        .unwrap_or_default()
}

/// Rating history joined with solved problems, newest first. Returns whether
/// any date had to be estimated.
fn contest_history(draft: &CodeChefDraft, options: &ExtractOptions) -> (Vec<CodeChefContest>, bool) {
    let fallback_date = draft.fetched_at.date_naive();
    let mut estimated_any = false;
    let mut previous: Option<f64> = None;

    let mut entries: Vec<CodeChefContest> = draft
        .allrating
        .iter()
        .map(|point| {
            let (date, date_estimated) = match point.date {
                Some(date) => (date, false),
                None => (
                    estimate_contest_date(&point.code, &point.name).unwrap_or(fallback_date),
                    true,
                ),
            };
            estimated_any |= date_estimated;
            let rating_change = point
                .rating_change
                .unwrap_or_else(|| previous.map_or(0, |p| (point.rating - p).round() as i64));
            previous = Some(point.rating);
            let problems_solved = problems_for(point, &draft.solved_by_contest);
            CodeChefContest {
                code: point.code.clone(),
                name: point.name.clone(),
                date,
                date_estimated,
                rating: point.rating.round() as i64,
                rank: point.rank.unwrap_or(0),
                rating_change,
                problems_count: problems_solved.len() as u32,
                problems_solved,
                attended: true,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.date.cmp(&a.date));
    entries.truncate(options.history_limit);
    let estimated_kept = entries.iter().any(|e| e.date_estimated);
    (entries, estimated_any && estimated_kept)
}

pub(super) fn normalize(draft: CodeChefDraft, options: &ExtractOptions, now: DateTime<Utc>) -> CodeChefRecord {
    let rating = draft.rating.map(|r| r.round() as i64).unwrap_or(0);
    let history_max = draft.allrating.iter().map(|p| p.rating.round() as i64).max().unwrap_or(0);
    let reported_max = draft.max_rating.map(|r| r.round() as i64).unwrap_or(0);
    let max_rating = repair_max_rating(Source::CodeChef, &draft.handle, rating, reported_max.max(history_max));

    let unique_codes = draft.allrating.iter().map(|p| p.code.as_str()).collect::<BTreeSet<_>>().len() as u32;
    let contests_attended = draft.contests_attended.unwrap_or(0).max(unique_codes);

    let fully_solved = draft.fully_solved.unwrap_or(0);
    let partially_solved = draft.partially_solved.unwrap_or(0);
    let total_solved = draft.total_solved.unwrap_or(0).max(fully_solved + partially_solved);

    let (history, estimated) = if options.include_history {
        contest_history(&draft, options)
    } else {
        (Vec::new(), false)
    };
    let data_source = if estimated {
        draft.data_source.with_estimated_dates()
    } else {
        draft.data_source
    };

    let heatmap = windowed_calendar(draft.heatmap, now, options.heatmap_window_days);

    CodeChefRecord {
        header: header(&draft.handle, draft.fetched_at, data_source),
        name: draft.name.unwrap_or_default(),
        rating,
        max_rating,
        global_rank: draft.global_rank.unwrap_or(0),
        country_rank: draft.country_rank.unwrap_or(0),
        stars: draft.stars.unwrap_or(0).min(7),
        division: division_for(rating).to_string(),
        league: draft.league.unwrap_or_default(),
        institution: draft.institution.unwrap_or_default(),
        country: draft.country.unwrap_or_default(),
        total_solved,
        fully_solved,
        partially_solved,
        contests_attended,
        contest_history: history,
        total_submissions: total_count(&heatmap),
        submission_stats: submission_stats(&heatmap),
        submission_heatmap: heatmap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cptrack_core::calendar::CalendarDay;
    use cptrack_core::DataSource;

    fn point(code: &str, name: &str, rating: f64, date: Option<NaiveDate>) -> CodeChefRatingPoint {
        CodeChefRatingPoint {
            code: code.into(),
            name: name.into(),
            rating,
            date,
            rank: Some(10),
            rating_change: None,
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn divisions_follow_rating_thresholds() {
        assert_eq!(division_for(2500), "Div 1");
        assert_eq!(division_for(1800), "Div 2");
        assert_eq!(division_for(1799), "Div 3");
        assert_eq!(division_for(1264), "Div 4");
    }

    #[test]
    fn contest_dates_are_estimated_from_the_number() {
        assert_eq!(estimate_contest_date("START219", ""), Some(ymd(2025, 12, 31)));
        assert_eq!(estimate_contest_date("START217", ""), Some(ymd(2025, 12, 17)));
        assert_eq!(estimate_contest_date("", "Starters 218 (Rated)"), Some(ymd(2025, 12, 24)));
        assert_eq!(estimate_contest_date("COOK148", ""), Some(ymd(2025, 10, 31)));
        assert_eq!(estimate_contest_date("LTIME119", ""), Some(ymd(2025, 11, 30)));
        assert_eq!(estimate_contest_date("SNCK2021", "SnackDown"), None);
    }

    #[test]
    fn history_joins_solved_problems_and_flags_estimates() {
        let now = Utc::now();
        let mut draft = CodeChefDraft::new("kit27csbs23", now, DataSource::CodeChefBrowser);
        draft.rating = Some(1264.0);
        draft.max_rating = Some(1200.0);
        draft.contests_attended = None;
        draft.allrating = vec![
            point("START210", "Starters 210", 1180.0, Some(ymd(2025, 10, 29))),
            point("START219", "Starters 219 (Rated till 5 star)", 1264.0, None),
        ];
        draft.solved_by_contest = vec![ContestSolved {
            contest: "Starters 219 (Rated till 5 star)".into(),
            problems: vec!["PALINX".into(), "DIVSUM".into()],
        }];
        draft.heatmap = vec![CalendarDay::new(now.date_naive(), 5)];

        let record = normalize(draft, &ExtractOptions::default(), now);
        assert_eq!(record.max_rating, 1264);
        assert_eq!(record.contests_attended, 2);
        assert_eq!(record.header.data_source, DataSource::CodeChefBrowserEstimated);
        assert_eq!(record.contest_history[0].code, "START219");
        assert!(record.contest_history[0].date_estimated);
        assert_eq!(record.contest_history[0].problems_count, 2);
        assert_eq!(record.contest_history[0].rating_change, 84);
        assert_eq!(record.contest_history[1].problems_count, 0);
        assert_eq!(record.total_submissions, 5);
        assert_eq!(record.submission_stats.avg_daily, 5.0);
    }

    #[test]
    fn solved_total_never_trails_its_parts() {
        let now = Utc::now();
        let mut draft = CodeChefDraft::new("x", now, DataSource::CodeChefStatic);
        draft.total_solved = Some(10);
        draft.fully_solved = Some(9);
        draft.partially_solved = Some(3);
        let record = normalize(draft, &ExtractOptions::default(), now);
        assert_eq!(record.total_solved, 12);
        assert_eq!(record.header.data_source, DataSource::CodeChefStatic);
    }

    #[test]
    fn solved_problems_attach_to_the_right_contest_number() {
        let now = Utc::now();
        let mut draft = CodeChefDraft::new("x", now, DataSource::CodeChefBrowser);
        draft.allrating = vec![
            point("START21", "Starters 21", 1400.0, Some(ymd(2022, 1, 5))),
            point("START210", "Starters 210", 1500.0, Some(ymd(2025, 10, 29))),
        ];
        draft.solved_by_contest = vec![
            ContestSolved {
                contest: "Starters 210 (Rated)".into(),
                problems: vec!["LATE1".into(), "LATE2".into()],
            },
            ContestSolved {
                contest: "Starters 21".into(),
                problems: vec!["EARLY".into()],
            },
        ];

        let record = normalize(draft, &ExtractOptions::default(), now);
        let by_code = |code: &str| {
            record
                .contest_history
                .iter()
                .find(|c| c.code == code)
                .map(|c| c.problems_solved.clone())
                .unwrap_or_default()
        };
        assert_eq!(by_code("START21"), vec!["EARLY".to_string()]);
        assert_eq!(by_code("START210"), vec!["LATE1".to_string(), "LATE2".to_string()]);
    }

    #[test]
    fn tokens_need_a_boundary_on_both_sides() {
        assert!(contains_token("starters 21 (rated)", "starters 21"));
        assert!(contains_token("start21", "start21"));
        assert!(!contains_token("starters 210 (rated)", "starters 21"));
        assert!(!contains_token("xstart21", "start21"));
        assert!(!contains_token("anything", ""));
    }
}
