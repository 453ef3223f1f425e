//! Canonical persisted per-source records (`platforms.<tag>`).
//!
//! Every field has a type-correct default so a record never carries `null`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::calendar::{CalendarDay, SubmissionStats};
use crate::{DataSource, Source};

/// Prefix shared by every per-source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub username: String,
    pub last_updated: DateTime<Utc>,
    pub data_source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeetCodeBadge {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeetCodeContest {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub rating: i64,
    pub ranking: u64,
    pub problems_solved: u32,
    pub total_problems: u32,
    pub finish_time_seconds: u64,
    pub trend_direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeetCodeRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub real_name: String,
    pub avatar: String,
    pub profile_ranking: u64,
    pub total_solved: u32,
    pub easy_solved: u32,
    pub medium_solved: u32,
    pub hard_solved: u32,
    pub total_submissions: u32,
    pub accepted_submissions: u32,
    pub acceptance_rate: f64,
    pub rating: i64,
    pub max_rating: i64,
    pub last_week_rating: i64,
    pub contests_attended: u32,
    pub recent_contests: u32,
    pub global_ranking: u64,
    pub top_percentage: f64,
    pub total_participants: u64,
    pub badge: String,
    pub streak: u32,
    pub total_active_days: u32,
    /// Verbatim `submissionCalendar` JSON string; consumers parse it.
    pub submission_calendar: String,
    pub badges: Vec<LeetCodeBadge>,
    pub active_badge: LeetCodeBadge,
    pub contest_history: Vec<LeetCodeContest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChefContest {
    pub code: String,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub date_estimated: bool,
    pub rating: i64,
    pub rank: u64,
    pub rating_change: i64,
    pub problems_solved: Vec<String>,
    pub problems_count: u32,
    pub attended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChefRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub rating: i64,
    pub max_rating: i64,
    pub global_rank: u64,
    pub country_rank: u64,
    pub stars: u8,
    pub division: String,
    pub league: String,
    pub institution: String,
    pub country: String,
    pub total_solved: u32,
    pub fully_solved: u32,
    pub partially_solved: u32,
    pub contests_attended: u32,
    pub contest_history: Vec<CodeChefContest>,
    pub total_submissions: u32,
    pub submission_heatmap: Vec<CalendarDay>,
    pub submission_stats: SubmissionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeforcesContest {
    pub contest_id: u64,
    pub name: String,
    pub date: NaiveDate,
    pub old_rating: i64,
    pub new_rating: i64,
    pub rating_change: i64,
    pub rank: u64,
    pub problems_solved: Vec<String>,
    pub problems_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeforcesRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub rating: i64,
    pub max_rating: i64,
    pub rank: String,
    pub max_rank: String,
    pub total_solved: u32,
    /// Submissions inside the heatmap window.
    pub total_submissions: u32,
    /// Every submission returned by `user.status`.
    pub lifetime_submissions: u32,
    pub accepted_submissions: u32,
    pub contests_attended: u32,
    pub contest_history: Vec<CodeforcesContest>,
    pub submission_heatmap: Vec<CalendarDay>,
    pub submission_stats: SubmissionStats,
    pub country: String,
    pub city: String,
    pub organization: String,
    pub avatar: String,
    pub contribution: i64,
    pub friend_of_count: u32,
    /// Unix seconds, 0 when unknown.
    pub registration_time: i64,
    pub last_online_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCount {
    pub name: String,
    pub repos: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinnedRepository {
    pub name: String,
    pub description: String,
    pub url: String,
    pub stars: u32,
    pub forks: u32,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub bio: String,
    pub company: String,
    pub location: String,
    pub avatar_url: String,
    pub public_repos: u32,
    pub total_stars: u32,
    pub total_forks: u32,
    pub followers: u32,
    pub following: u32,
    pub recent_commits: u32,
    pub recent_prs: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_contributions: u32,
    pub recent_contributions: u32,
    pub top_languages: Vec<LanguageCount>,
    pub contribution_calendar: Vec<CalendarDay>,
    pub pinned_repositories: Vec<PinnedRepository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodolioBadge {
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodolioRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub total_active_days: u32,
    pub total_contests: u32,
    pub total_submissions: u32,
    pub badges: Vec<CodolioBadge>,
}

/// A normalized record for any source.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformRecord {
    LeetCode(LeetCodeRecord),
    CodeChef(CodeChefRecord),
    Codeforces(CodeforcesRecord),
    GitHub(GitHubRecord),
    Codolio(CodolioRecord),
}

impl PlatformRecord {
    pub fn source(&self) -> Source {
        match self {
            PlatformRecord::LeetCode(_) => Source::LeetCode,
            PlatformRecord::CodeChef(_) => Source::CodeChef,
            PlatformRecord::Codeforces(_) => Source::Codeforces,
            PlatformRecord::GitHub(_) => Source::GitHub,
            PlatformRecord::Codolio(_) => Source::Codolio,
        }
    }

    pub fn header(&self) -> &RecordHeader {
        match self {
            PlatformRecord::LeetCode(r) => &r.header,
            PlatformRecord::CodeChef(r) => &r.header,
            PlatformRecord::Codeforces(r) => &r.header,
            PlatformRecord::GitHub(r) => &r.header,
            PlatformRecord::Codolio(r) => &r.header,
        }
    }

    /// `(rating, max_rating)` for sources that carry ratings.
    pub fn ratings(&self) -> Option<(i64, i64)> {
        match self {
            PlatformRecord::LeetCode(r) => Some((r.rating, r.max_rating)),
            PlatformRecord::CodeChef(r) => Some((r.rating, r.max_rating)),
            PlatformRecord::Codeforces(r) => Some((r.rating, r.max_rating)),
            PlatformRecord::GitHub(_) | PlatformRecord::Codolio(_) => None,
        }
    }

    /// The record as a flat field map (top-level keys of `platforms.<tag>`).
    pub fn to_fields(&self) -> Result<Map<String, JsonValue>, serde_json::Error> {
        let value = match self {
            PlatformRecord::LeetCode(r) => serde_json::to_value(r)?,
            PlatformRecord::CodeChef(r) => serde_json::to_value(r)?,
            PlatformRecord::Codeforces(r) => serde_json::to_value(r)?,
            PlatformRecord::GitHub(r) => serde_json::to_value(r)?,
            PlatformRecord::Codolio(r) => serde_json::to_value(r)?,
        };
        match value {
            JsonValue::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "record serialized to a non-object: {other}"
            ))),
        }
    }
}
