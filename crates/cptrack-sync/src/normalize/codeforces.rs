use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use cptrack_adapters::ExtractOptions;
use cptrack_core::calendar::{submission_stats, total_count, CalendarDay};
use cptrack_core::draft::CodeforcesDraft;
use cptrack_core::record::{CodeforcesContest, CodeforcesRecord};
use cptrack_core::{DataSource, Source};

use super::{header, repair_max_rating, windowed_calendar};

/// Submissions scanned when joining solved problems onto contests.
const SOLVED_SCAN_LIMIT: usize = 5_000;

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

pub(super) fn normalize(draft: CodeforcesDraft, options: &ExtractOptions, now: DateTime<Utc>) -> CodeforcesRecord {
    let accepted: Vec<_> = draft.submissions.iter().filter(|s| s.is_accepted()).collect();
    let total_solved = accepted
        .iter()
        .map(|s| (s.contest_id, s.index.as_str()))
        .collect::<HashSet<_>>()
        .len() as u32;

    let days = draft
        .submissions
        .iter()
        .map(|s| CalendarDay::new(timestamp(s.creation_time_seconds).date_naive(), 1));
    let heatmap = windowed_calendar(days.collect(), now, options.heatmap_window_days);

    let mut solved_by_contest: BTreeMap<u64, BTreeSet<&str>> = BTreeMap::new();
    for submission in draft.submissions.iter().take(SOLVED_SCAN_LIMIT).filter(|s| s.is_accepted()) {
        if let Some(contest_id) = submission.contest_id {
            solved_by_contest.entry(contest_id).or_default().insert(&submission.index);
        }
    }

    let contest_history: Vec<CodeforcesContest> = if options.include_history {
        draft
            .rating_changes
            .iter()
            .rev()
            .take(options.history_limit)
            .map(|change| {
                let problems_solved: Vec<String> = solved_by_contest
                    .get(&change.contest_id)
                    .map(|set| set.iter().map(|p| p.to_string()).collect())
                    .unwrap_or_default();
                CodeforcesContest {
                    contest_id: change.contest_id,
                    name: change.contest_name.clone(),
                    date: timestamp(change.update_time_seconds).date_naive(),
                    old_rating: change.old_rating,
                    new_rating: change.new_rating,
                    rating_change: change.new_rating - change.old_rating,
                    rank: change.rank,
                    problems_count: problems_solved.len() as u32,
                    problems_solved,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let rating = draft.rating.unwrap_or(0);
    let history_max = draft.rating_changes.iter().map(|c| c.new_rating).max().unwrap_or(0);
    let max_rating = repair_max_rating(
        Source::Codeforces,
        &draft.handle,
        rating,
        draft.max_rating.unwrap_or(history_max),
    );

    CodeforcesRecord {
        header: header(&draft.handle, draft.fetched_at, DataSource::CodeforcesApi),
        rating,
        max_rating,
        rank: draft.rank.unwrap_or_else(|| "unrated".to_string()),
        max_rank: draft.max_rank.unwrap_or_else(|| "unrated".to_string()),
        total_solved,
        total_submissions: total_count(&heatmap),
        lifetime_submissions: draft.submissions.len() as u32,
        accepted_submissions: accepted.len() as u32,
        contests_attended: draft.rating_changes.len() as u32,
        contest_history,
        submission_stats: submission_stats(&heatmap),
        submission_heatmap: heatmap,
        country: draft.country.unwrap_or_default(),
        city: draft.city.unwrap_or_default(),
        organization: draft.organization.unwrap_or_default(),
        avatar: draft.avatar.unwrap_or_default(),
        contribution: draft.contribution.unwrap_or(0),
        friend_of_count: draft.friend_of_count.unwrap_or(0),
        registration_time: draft.registration_time.unwrap_or(0),
        last_online_time: draft.last_online_time.unwrap_or(0),
    }
}
