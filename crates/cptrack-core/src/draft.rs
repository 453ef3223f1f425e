//! Raw extraction results handed from extractors to the normalizer.
//!
//! Drafts carry what a tier actually saw: scalar fields are `Option` so the
//! normalizer can tell "absent" from "zero", and list fields are empty when the
//! tier could not fetch them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarDay;
use crate::record::{CodolioBadge, LeetCodeBadge, PinnedRepository};
use crate::{DataSource, Source};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeetCodeContestDraft {
    pub title: String,
    /// Unix seconds.
    pub start_time: i64,
    pub attended: bool,
    pub rating: f64,
    pub ranking: u64,
    pub problems_solved: u32,
    pub total_problems: u32,
    pub finish_time_seconds: u64,
    pub trend_direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeetCodeDraft {
    pub handle: String,
    pub fetched_at: DateTime<Utc>,
    pub real_name: Option<String>,
    pub avatar: Option<String>,
    pub profile_ranking: Option<u64>,
    pub all_solved: Option<u32>,
    pub easy_solved: Option<u32>,
    pub medium_solved: Option<u32>,
    pub hard_solved: Option<u32>,
    /// `All` bucket of `totalSubmissionNum`.
    pub total_submissions: Option<u32>,
    /// `All` bucket of `acSubmissionNum.submissions`.
    pub accepted_submissions: Option<u32>,
    pub rating: Option<f64>,
    pub contests_attended: Option<u32>,
    pub global_ranking: Option<u64>,
    pub top_percentage: Option<f64>,
    pub total_participants: Option<u64>,
    pub badge: Option<String>,
    /// Ranking history in API order (oldest first).
    pub contest_history: Vec<LeetCodeContestDraft>,
    pub streak: Option<u32>,
    pub total_active_days: Option<u32>,
    pub submission_calendar: Option<String>,
    pub badges: Vec<LeetCodeBadge>,
    pub active_badge: Option<LeetCodeBadge>,
}

/// One entry of CodeChef's embedded `allrating` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChefRatingPoint {
    pub code: String,
    pub name: String,
    pub rating: f64,
    pub date: Option<NaiveDate>,
    pub rank: Option<u64>,
    pub rating_change: Option<i64>,
}

/// Problems solved in one contest, as listed in the "Problems Solved" section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestSolved {
    pub contest: String,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChefDraft {
    pub handle: String,
    pub fetched_at: DateTime<Utc>,
    pub data_source: DataSource,
    pub name: Option<String>,
    pub institution: Option<String>,
    pub country: Option<String>,
    pub league: Option<String>,
    pub rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub global_rank: Option<u64>,
    pub country_rank: Option<u64>,
    pub stars: Option<u8>,
    pub contests_attended: Option<u32>,
    pub total_solved: Option<u32>,
    pub fully_solved: Option<u32>,
    pub partially_solved: Option<u32>,
    pub allrating: Vec<CodeChefRatingPoint>,
    pub solved_by_contest: Vec<ContestSolved>,
    pub heatmap: Vec<CalendarDay>,
}

impl CodeChefDraft {
    pub fn new(handle: impl Into<String>, fetched_at: DateTime<Utc>, data_source: DataSource) -> Self {
        Self {
            handle: handle.into(),
            fetched_at,
            data_source,
            name: None,
            institution: None,
            country: None,
            league: None,
            rating: None,
            max_rating: None,
            global_rank: None,
            country_rank: None,
            stars: None,
            contests_attended: None,
            total_solved: None,
            fully_solved: None,
            partially_solved: None,
            allrating: Vec::new(),
            solved_by_contest: Vec::new(),
            heatmap: Vec::new(),
        }
    }

    /// At least one of `rating > 0` or `total_solved > 0`, else any non-empty
    /// profile info.
    pub fn is_viable(&self) -> bool {
        let has_numbers =
            self.rating.is_some_and(|r| r > 0.0) || self.total_solved.is_some_and(|t| t > 0);
        let non_blank = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        has_numbers || non_blank(&self.name) || non_blank(&self.country) || non_blank(&self.institution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeforcesRatingChange {
    pub contest_id: u64,
    pub contest_name: String,
    pub rank: u64,
    pub old_rating: i64,
    pub new_rating: i64,
    pub update_time_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeforcesSubmission {
    pub contest_id: Option<u64>,
    pub index: String,
    pub verdict: Option<String>,
    pub creation_time_seconds: i64,
}

impl CodeforcesSubmission {
    pub fn is_accepted(&self) -> bool {
        self.verdict.as_deref() == Some("OK")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeforcesDraft {
    pub handle: String,
    pub fetched_at: DateTime<Utc>,
    pub rating: Option<i64>,
    pub max_rating: Option<i64>,
    pub rank: Option<String>,
    pub max_rank: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub organization: Option<String>,
    pub avatar: Option<String>,
    pub contribution: Option<i64>,
    pub friend_of_count: Option<u32>,
    pub registration_time: Option<i64>,
    pub last_online_time: Option<i64>,
    /// `user.rating` in API order (oldest first).
    pub rating_changes: Vec<CodeforcesRatingChange>,
    /// `user.status` rows, newest first.
    pub submissions: Vec<CodeforcesSubmission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubRepoSummary {
    pub name: String,
    pub stars: u32,
    pub forks: u32,
    pub language: Option<String>,
    pub fork: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubEventSummary {
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    /// Commits carried by a `PushEvent`, 0 for other events.
    pub commits: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubDraft {
    pub handle: String,
    pub fetched_at: DateTime<Utc>,
    pub data_source: DataSource,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub public_repos: Option<u32>,
    pub followers: Option<u32>,
    pub following: Option<u32>,
    pub repos: Vec<GitHubRepoSummary>,
    pub events: Vec<GitHubEventSummary>,
    /// Present only when the token tier ran.
    pub total_contributions: Option<u32>,
    pub contribution_calendar: Vec<CalendarDay>,
    pub pinned: Vec<PinnedRepository>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodolioDraft {
    pub handle: String,
    pub fetched_at: DateTime<Utc>,
    pub total_active_days: Option<u32>,
    pub total_contests: Option<u32>,
    pub total_submissions: Option<u32>,
    pub badges: Vec<CodolioBadge>,
}

impl CodolioDraft {
    pub fn is_viable(&self) -> bool {
        [self.total_active_days, self.total_contests, self.total_submissions]
            .into_iter()
            .any(|v| v.is_some_and(|n| n > 0))
    }
}

/// A successful extraction for any source.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileDraft {
    LeetCode(LeetCodeDraft),
    CodeChef(CodeChefDraft),
    Codeforces(CodeforcesDraft),
    GitHub(GitHubDraft),
    Codolio(CodolioDraft),
}

impl ProfileDraft {
    pub fn source(&self) -> Source {
        match self {
            ProfileDraft::LeetCode(_) => Source::LeetCode,
            ProfileDraft::CodeChef(_) => Source::CodeChef,
            ProfileDraft::Codeforces(_) => Source::Codeforces,
            ProfileDraft::GitHub(_) => Source::GitHub,
            ProfileDraft::Codolio(_) => Source::Codolio,
        }
    }

    pub fn handle(&self) -> &str {
        match self {
            ProfileDraft::LeetCode(d) => &d.handle,
            ProfileDraft::CodeChef(d) => &d.handle,
            ProfileDraft::Codeforces(d) => &d.handle,
            ProfileDraft::GitHub(d) => &d.handle,
            ProfileDraft::Codolio(d) => &d.handle,
        }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        match self {
            ProfileDraft::LeetCode(d) => d.fetched_at,
            ProfileDraft::CodeChef(d) => d.fetched_at,
            ProfileDraft::Codeforces(d) => d.fetched_at,
            ProfileDraft::GitHub(d) => d.fetched_at,
            ProfileDraft::Codolio(d) => d.fetched_at,
        }
    }

    /// Tier tag before normalization (CodeChef date estimation may refine it).
    pub fn data_source(&self) -> DataSource {
        match self {
            ProfileDraft::LeetCode(_) => DataSource::LeetCodeGraphql,
            ProfileDraft::CodeChef(d) => d.data_source,
            ProfileDraft::Codeforces(_) => DataSource::CodeforcesApi,
            ProfileDraft::GitHub(d) => d.data_source,
            ProfileDraft::Codolio(_) => DataSource::CodolioBrowser,
        }
    }
}
