use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use cptrack_adapters::ExtractOptions;
use cptrack_core::calendar::round2;
use cptrack_core::draft::{LeetCodeContestDraft, LeetCodeDraft};
use cptrack_core::record::{LeetCodeContest, LeetCodeRecord};
use cptrack_core::{DataSource, Source};
use serde_json::Value as JsonValue;

use super::{header, repair_max_rating};

/// Days with at least one submission in a `submissionCalendar` JSON string
/// (`{"<unix seconds>": count, ...}`).
pub fn active_days_in_calendar(calendar: &str) -> Option<u32> {
    let parsed: BTreeMap<String, JsonValue> = serde_json::from_str(calendar).ok()?;
    let active = parsed
        .values()
        .filter(|v| match v {
            JsonValue::Number(n) => n.as_f64().is_some_and(|c| c > 0.0),
            JsonValue::String(s) => s.trim().parse::<f64>().is_ok_and(|c| c > 0.0),
            _ => false,
        })
        .count();
    Some(active as u32)
}

fn start_time(contest: &LeetCodeContestDraft) -> DateTime<Utc> {
    DateTime::from_timestamp(contest.start_time, 0).unwrap_or_default()
}

fn acceptance_rate(solved: u32, submissions: u32) -> f64 {
    if submissions == 0 {
        return 0.0;
    }
    round2(f64::from(solved) / f64::from(submissions) * 100.0).min(100.0)
}

pub(super) fn normalize(draft: LeetCodeDraft, options: &ExtractOptions, now: DateTime<Utc>) -> LeetCodeRecord {
    let easy = draft.easy_solved.unwrap_or(0);
    let medium = draft.medium_solved.unwrap_or(0);
    let hard = draft.hard_solved.unwrap_or(0);
    let total_solved = draft.all_solved.unwrap_or(easy + medium + hard);
    let total_submissions = draft.total_submissions.unwrap_or(0);

    // Chronological, attended entries only.
    let mut attended: Vec<&LeetCodeContestDraft> = draft.contest_history.iter().filter(|c| c.attended).collect();
    attended.sort_by_key(|c| c.start_time);

    let rating = draft.rating.map(|r| r.round() as i64).unwrap_or(0);
    let history_max = attended.iter().map(|c| c.rating.round() as i64).max().unwrap_or(0);
    let max_rating = repair_max_rating(Source::LeetCode, &draft.handle, rating, history_max.max(rating));

    let week_ago = now - Duration::days(7);
    let last_week_rating = attended
        .iter()
        .rev()
        .find(|c| start_time(c) <= week_ago)
        .map(|c| c.rating.round() as i64)
        .unwrap_or(0);
    let recent_contests = attended
        .iter()
        .filter(|c| {
            let at = start_time(c);
            at > week_ago && at <= now
        })
        .count() as u32;

    let submission_calendar = draft.submission_calendar.unwrap_or_else(|| "{}".to_string());
    let total_active_days = draft
        .total_active_days
        .or_else(|| active_days_in_calendar(&submission_calendar))
        .unwrap_or(0);

    let contest_history: Vec<LeetCodeContest> = if options.include_history {
        attended
            .iter()
            .rev()
            .take(options.history_limit)
            .map(|c| LeetCodeContest {
                title: c.title.clone(),
                start_time: start_time(c),
                rating: c.rating.round() as i64,
                ranking: c.ranking,
                problems_solved: c.problems_solved,
                total_problems: c.total_problems,
                finish_time_seconds: c.finish_time_seconds,
                trend_direction: c.trend_direction.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    LeetCodeRecord {
        header: header(&draft.handle, draft.fetched_at, DataSource::LeetCodeGraphql),
        real_name: draft.real_name.unwrap_or_default(),
        avatar: draft.avatar.unwrap_or_default(),
        profile_ranking: draft.profile_ranking.unwrap_or(0),
        total_solved,
        easy_solved: easy,
        medium_solved: medium,
        hard_solved: hard,
        total_submissions,
        accepted_submissions: draft.accepted_submissions.unwrap_or(0),
        acceptance_rate: acceptance_rate(total_solved, total_submissions),
        rating,
        max_rating,
        last_week_rating,
        contests_attended: draft.contests_attended.unwrap_or(attended.len() as u32),
        recent_contests,
        global_ranking: draft.global_ranking.unwrap_or(0),
        top_percentage: draft.top_percentage.unwrap_or(0.0),
        total_participants: draft.total_participants.unwrap_or(0),
        badge: draft.badge.unwrap_or_default(),
        streak: draft.streak.unwrap_or(0),
        total_active_days,
        submission_calendar,
        badges: draft.badges,
        active_badge: draft.active_badge.unwrap_or_default(),
        contest_history,
    }
}
