//! LeetCode: one GraphQL tier, four queries issued in sequence.

use async_trait::async_trait;
use cptrack_core::draft::{LeetCodeContestDraft, LeetCodeDraft};
use cptrack_core::record::LeetCodeBadge;
use cptrack_core::{ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::graphql::{GraphqlEndpoint, QueryResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{ExtractContext, ExtractOptions, SourceExtractor};

const PROFILE_QUERY: &str = include_str!("queries/profile.graphql");
const CONTEST_QUERY: &str = include_str!("queries/contest.graphql");
const CALENDAR_QUERY: &str = include_str!("queries/calendar.graphql");
const BADGES_QUERY: &str = include_str!("queries/badges.graphql");
const ASSET_BASE: &str = "https://leetcode.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub matched_user: Option<MatchedProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedProfile {
    pub username: String,
    pub profile: Option<ProfileInfo>,
    pub submit_stats: Option<SubmitStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub real_name: Option<String>,
    pub user_avatar: Option<String>,
    pub ranking: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStats {
    #[serde(default)]
    pub ac_submission_num: Vec<DifficultyCount>,
    #[serde(default)]
    pub total_submission_num: Vec<DifficultyCount>,
}

#[derive(Debug, Deserialize)]
pub struct DifficultyCount {
    pub difficulty: String,
    pub count: u32,
    #[serde(default)]
    pub submissions: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestData {
    pub user_contest_ranking: Option<ContestRanking>,
    #[serde(default)]
    pub user_contest_ranking_history: Option<Vec<ContestHistoryEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestRanking {
    pub attended_contests_count: Option<u32>,
    pub rating: Option<f64>,
    pub global_ranking: Option<u64>,
    pub total_participants: Option<u64>,
    pub top_percentage: Option<f64>,
    pub badge: Option<NamedBadge>,
}

#[derive(Debug, Deserialize)]
pub struct NamedBadge {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestHistoryEntry {
    #[serde(default)]
    pub attended: bool,
    pub trend_direction: Option<String>,
    pub problems_solved: Option<u32>,
    pub total_problems: Option<u32>,
    pub finish_time_in_seconds: Option<u64>,
    pub rating: Option<f64>,
    pub ranking: Option<u64>,
    pub contest: ContestRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestRef {
    pub title: String,
    pub start_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarData {
    pub matched_user: Option<CalendarUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarUser {
    pub user_calendar: Option<UserCalendar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCalendar {
    pub streak: Option<u32>,
    pub total_active_days: Option<u32>,
    pub submission_calendar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgesData {
    pub matched_user: Option<BadgeUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeUser {
    #[serde(default)]
    pub badges: Vec<RawBadge>,
    pub active_badge: Option<RawBadge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBadge {
    pub id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub icon: Option<String>,
    pub creation_date: Option<String>,
}

fn absolute_asset(url: &str) -> String {
    if url.starts_with('/') {
        format!("{ASSET_BASE}{url}")
    } else {
        url.to_string()
    }
}

impl From<RawBadge> for LeetCodeBadge {
    fn from(raw: RawBadge) -> Self {
        LeetCodeBadge {
            id: raw.id,
            name: raw.display_name.or(raw.name).unwrap_or_default(),
            icon: raw.icon.as_deref().map(absolute_asset).unwrap_or_default(),
            created: raw.creation_date.unwrap_or_default(),
        }
    }
}

/// `UserNotFound` when the error says so, `SchemaError` otherwise.
pub fn classify_graphql_errors<T>(handle: &str, resp: &QueryResponse<T>) -> ExtractError {
    let summary = resp.error_summary();
    let lower = summary.to_ascii_lowercase();
    if lower.contains("does not exist") || lower.contains("not found") {
        ExtractError::not_found(Source::LeetCode, handle)
    } else {
        ExtractError::schema(format!("leetcode graphql errors: {summary}"))
    }
}

/// Builds the draft from the profile query. `matchedUser` null is the
/// not-found signal.
pub fn draft_from_profile(
    handle: &str,
    fetched_at: chrono::DateTime<chrono::Utc>,
    resp: QueryResponse<ProfileData>,
) -> Result<LeetCodeDraft, ExtractError> {
    if !resp.errors().is_empty() {
        return Err(classify_graphql_errors(handle, &resp));
    }
    let user = resp
        .data
        .and_then(|d| d.matched_user)
        .ok_or_else(|| ExtractError::not_found(Source::LeetCode, handle))?;

    let mut draft = LeetCodeDraft {
        handle: user.username,
        fetched_at,
        real_name: None,
        avatar: None,
        profile_ranking: None,
        all_solved: None,
        easy_solved: None,
        medium_solved: None,
        hard_solved: None,
        total_submissions: None,
        accepted_submissions: None,
        rating: None,
        contests_attended: None,
        global_ranking: None,
        top_percentage: None,
        total_participants: None,
        badge: None,
        contest_history: Vec::new(),
        streak: None,
        total_active_days: None,
        submission_calendar: None,
        badges: Vec::new(),
        active_badge: None,
    };
    if draft.handle.trim().is_empty() {
        draft.handle = handle.to_string();
    }

    if let Some(profile) = user.profile {
        draft.real_name = profile.real_name.filter(|n| !n.trim().is_empty());
        draft.avatar = profile.user_avatar.filter(|a| !a.trim().is_empty());
        draft.profile_ranking = profile.ranking;
    }
    if let Some(stats) = user.submit_stats {
        for bucket in &stats.ac_submission_num {
            match bucket.difficulty.as_str() {
                "All" => {
                    draft.all_solved = Some(bucket.count);
                    draft.accepted_submissions = Some(bucket.submissions);
                }
                "Easy" => draft.easy_solved = Some(bucket.count),
                "Medium" => draft.medium_solved = Some(bucket.count),
                "Hard" => draft.hard_solved = Some(bucket.count),
                _ => {}
            }
        }
        draft.total_submissions = stats
            .total_submission_num
            .iter()
            .find(|b| b.difficulty == "All")
            .map(|b| b.submissions);
    }
    Ok(draft)
}

pub fn apply_contest(draft: &mut LeetCodeDraft, data: ContestData) {
    if let Some(ranking) = data.user_contest_ranking {
        draft.rating = ranking.rating;
        draft.contests_attended = ranking.attended_contests_count;
        draft.global_ranking = ranking.global_ranking;
        draft.top_percentage = ranking.top_percentage;
        draft.total_participants = ranking.total_participants;
        draft.badge = ranking.badge.map(|b| b.name);
    }
    draft.contest_history = data
        .user_contest_ranking_history
        .unwrap_or_default()
        .into_iter()
        .map(|entry| LeetCodeContestDraft {
            title: entry.contest.title,
            start_time: entry.contest.start_time,
            attended: entry.attended,
            rating: entry.rating.unwrap_or(0.0),
            ranking: entry.ranking.unwrap_or(0),
            problems_solved: entry.problems_solved.unwrap_or(0),
            total_problems: entry.total_problems.unwrap_or(0),
            finish_time_seconds: entry.finish_time_in_seconds.unwrap_or(0),
            trend_direction: entry.trend_direction.unwrap_or_default(),
        })
        .collect();
}

pub fn apply_calendar(draft: &mut LeetCodeDraft, data: CalendarData) {
    let Some(calendar) = data.matched_user.and_then(|u| u.user_calendar) else {
        return;
    };
    draft.streak = calendar.streak;
    draft.total_active_days = calendar.total_active_days;
    draft.submission_calendar = calendar.submission_calendar.filter(|c| !c.trim().is_empty());
}

pub fn apply_badges(draft: &mut LeetCodeDraft, data: BadgesData) {
    let Some(user) = data.matched_user else {
        return;
    };
    draft.badges = user.badges.into_iter().map(LeetCodeBadge::from).collect();
    draft.active_badge = user.active_badge.map(LeetCodeBadge::from);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeetCodeExtractor;

impl LeetCodeExtractor {
    /// Secondary queries are best-effort: only cancellation aborts.
    async fn optional_query<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &ExtractContext,
        endpoint: &GraphqlEndpoint,
        handle: &str,
        step: &str,
        query: &str,
    ) -> Result<Option<T>, ExtractError> {
        match ctx.graphql::<T>(endpoint, handle, query, json!({ "username": handle })).await {
            Ok(resp) => {
                if !resp.errors().is_empty() {
                    warn!(source = "leetcode", handle, step, errors = %resp.error_summary(), "partial graphql response");
                }
                Ok(resp.data)
            }
            Err(ExtractError::Cancelled) => Err(ExtractError::Cancelled),
            Err(err) => {
                warn!(source = "leetcode", handle, step, error = %err, "skipping failed query");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SourceExtractor for LeetCodeExtractor {
    fn source(&self) -> Source {
        Source::LeetCode
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let handle = identifier.handle.as_str();
        let endpoint = GraphqlEndpoint::new(Source::LeetCode, ctx.endpoints.leetcode_graphql.clone())
            .header("referer", identifier.canonical_url.clone());

        let profile = ctx
            .graphql::<ProfileData>(&endpoint, handle, PROFILE_QUERY, json!({ "username": handle }))
            .await?;
        let mut draft = draft_from_profile(handle, ctx.now, profile)?;

        if let Some(data) = self
            .optional_query::<ContestData>(ctx, &endpoint, handle, "contest", CONTEST_QUERY)
            .await?
        {
            apply_contest(&mut draft, data);
        }
        if let Some(data) = self
            .optional_query::<CalendarData>(ctx, &endpoint, handle, "calendar", CALENDAR_QUERY)
            .await?
        {
            apply_calendar(&mut draft, data);
        }
        if let Some(data) = self
            .optional_query::<BadgesData>(ctx, &endpoint, handle, "badges", BADGES_QUERY)
            .await?
        {
            apply_badges(&mut draft, data);
        }

        Ok(ProfileDraft::LeetCode(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn response<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> QueryResponse<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn null_user_without_errors_is_not_found() {
        let resp = response::<ProfileData>(json!({"data": {"matchedUser": null}}));
        let err = draft_from_profile("ghost", Utc::now(), resp).unwrap_err();
        assert_eq!(err.kind(), cptrack_core::ErrorKind::UserNotFound);
    }

    #[test]
    fn graphql_errors_split_into_not_found_and_schema() {
        let missing = response::<ProfileData>(json!({
            "data": {"matchedUser": null},
            "errors": [{"message": "That user does not exist."}]
        }));
        assert_eq!(
            draft_from_profile("ghost", Utc::now(), missing).unwrap_err().kind(),
            cptrack_core::ErrorKind::UserNotFound
        );
        let broken = response::<ProfileData>(json!({
            "data": null,
            "errors": [{"message": "Cannot query field \"submitStats\""}]
        }));
        assert_eq!(
            draft_from_profile("x", Utc::now(), broken).unwrap_err().kind(),
            cptrack_core::ErrorKind::SchemaError
        );
    }

    #[test]
    fn badge_icons_become_absolute() {
        let badge = LeetCodeBadge::from(RawBadge {
            id: "7588899".into(),
            name: Some("Annual Badge".into()),
            display_name: Some("365 Days Badge".into()),
            icon: Some("/static/images/badges/365.png".into()),
            creation_date: Some("2024-01-01".into()),
        });
        assert_eq!(badge.name, "365 Days Badge");
        assert_eq!(badge.icon, "https://leetcode.com/static/images/badges/365.png");
    }
}
