use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use cptrack_adapters::ExtractOptions;
use cptrack_core::calendar::{current_streak, longest_streak, recent_total, total_count};
use cptrack_core::draft::{GitHubDraft, GitHubEventSummary, GitHubRepoSummary};
use cptrack_core::record::{GitHubRecord, LanguageCount};

use super::{header, windowed_calendar};

const TOP_LANGUAGES: usize = 5;
const PINNED_LIMIT: usize = 6;
const RECENT_DAYS: u32 = 7;
/// Tokenless contribution estimate per public repository.
const CONTRIBUTIONS_PER_REPO: u32 = 10;

fn top_languages(repos: &[GitHubRepoSummary]) -> Vec<LanguageCount> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for language in repos.iter().filter_map(|r| r.language.as_deref()) {
        *counts.entry(language).or_default() += 1;
    }
    let mut languages: Vec<LanguageCount> = counts
        .into_iter()
        .map(|(name, repos)| LanguageCount {
            name: name.to_string(),
            repos,
        })
        .collect();
    languages.sort_by(|a, b| b.repos.cmp(&a.repos).then_with(|| a.name.cmp(&b.name)));
    languages.truncate(TOP_LANGUAGES);
    languages
}

fn recent_activity(events: &[GitHubEventSummary], now: DateTime<Utc>) -> (u32, u32) {
    let since = now - Duration::days(i64::from(RECENT_DAYS));
    events
        .iter()
        .filter(|e| e.created_at > since)
        .fold((0, 0), |(commits, prs), e| match e.event_type.as_str() {
            "PushEvent" => (commits + e.commits, prs),
            "PullRequestEvent" => (commits, prs + 1),
            _ => (commits, prs),
        })
}

pub(super) fn normalize(draft: GitHubDraft, options: &ExtractOptions, now: DateTime<Utc>) -> GitHubRecord {
    let total_stars = draft.repos.iter().map(|r| r.stars).sum();
    let total_forks = draft.repos.iter().map(|r| r.forks).sum();
    let (recent_commits, recent_prs) = recent_activity(&draft.events, now);
    let public_repos = draft.public_repos.unwrap_or(draft.repos.len() as u32);
    let today = now.date_naive();

    let calendar = windowed_calendar(draft.contribution_calendar, now, options.heatmap_window_days);
    let (total_contributions, current, longest, recent_contributions) = if calendar.is_empty() {
        (
            draft.total_contributions.unwrap_or(public_repos * CONTRIBUTIONS_PER_REPO),
            0,
            0,
            recent_commits + recent_prs,
        )
    } else {
        (
            draft.total_contributions.unwrap_or_else(|| total_count(&calendar)),
            current_streak(&calendar, today),
            longest_streak(&calendar),
            recent_total(&calendar, today, RECENT_DAYS),
        )
    };

    let mut pinned = draft.pinned;
    pinned.truncate(PINNED_LIMIT);

    GitHubRecord {
        header: header(&draft.handle, draft.fetched_at, draft.data_source),
        name: draft.name.unwrap_or_default(),
        bio: draft.bio.unwrap_or_default(),
        company: draft.company.unwrap_or_default(),
        location: draft.location.unwrap_or_default(),
        avatar_url: draft.avatar_url.unwrap_or_default(),
        public_repos,
        total_stars,
        total_forks,
        followers: draft.followers.unwrap_or(0),
        following: draft.following.unwrap_or(0),
        recent_commits,
        recent_prs,
        current_streak: current,
        longest_streak: longest,
        total_contributions,
        recent_contributions,
        top_languages: top_languages(&draft.repos),
        contribution_calendar: calendar,
        pinned_repositories: pinned,
    }
}
