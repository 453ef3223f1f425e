//! Codeforces: the official JSON API, single tier.

use async_trait::async_trait;
use cptrack_core::draft::{CodeforcesDraft, CodeforcesRatingChange, CodeforcesSubmission};
use cptrack_core::{ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::{FetchError, FetchRequest};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::{ExtractContext, ExtractOptions, SourceExtractor};

/// One `user.status` page large enough for lifetime totals.
pub const STATUS_COUNT: u32 = 10_000;

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub result: Option<T>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub handle: String,
    pub rating: Option<i64>,
    pub max_rating: Option<i64>,
    pub rank: Option<String>,
    pub max_rank: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub organization: Option<String>,
    pub title_photo: Option<String>,
    pub avatar: Option<String>,
    pub contribution: Option<i64>,
    pub friend_of_count: Option<u32>,
    pub registration_time_seconds: Option<i64>,
    pub last_online_time_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub contest_id: u64,
    pub contest_name: String,
    pub rank: u64,
    pub rating_update_time_seconds: i64,
    pub old_rating: i64,
    pub new_rating: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub contest_id: Option<u64>,
    pub creation_time_seconds: i64,
    pub problem: Problem,
    pub verdict: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub contest_id: Option<u64>,
    pub index: String,
}

fn not_found_comment(comment: &str) -> bool {
    comment.to_ascii_lowercase().contains("not found")
}

/// Unwraps the `{status, result, comment}` envelope.
pub fn unwrap_envelope<T>(handle: &str, method: &str, envelope: Envelope<T>) -> Result<T, ExtractError> {
    let comment = envelope.comment.unwrap_or_default();
    if envelope.status != "OK" {
        if not_found_comment(&comment) {
            return Err(ExtractError::not_found(Source::Codeforces, handle));
        }
        return Err(ExtractError::schema(format!("codeforces {method} failed: {comment}")));
    }
    envelope
        .result
        .ok_or_else(|| ExtractError::schema(format!("codeforces {method} returned no result")))
}

pub fn draft_from_parts(
    handle: &str,
    fetched_at: chrono::DateTime<chrono::Utc>,
    info: UserInfo,
    ratings: Vec<RatingChange>,
    submissions: Vec<Submission>,
) -> CodeforcesDraft {
    CodeforcesDraft {
        handle: if info.handle.is_empty() { handle.to_string() } else { info.handle },
        fetched_at,
        rating: info.rating,
        max_rating: info.max_rating,
        rank: info.rank,
        max_rank: info.max_rank,
        country: info.country,
        city: info.city,
        organization: info.organization,
        avatar: info.title_photo.or(info.avatar),
        contribution: info.contribution,
        friend_of_count: info.friend_of_count,
        registration_time: info.registration_time_seconds,
        last_online_time: info.last_online_time_seconds,
        rating_changes: ratings
            .into_iter()
            .map(|r| CodeforcesRatingChange {
                contest_id: r.contest_id,
                contest_name: r.contest_name,
                rank: r.rank,
                old_rating: r.old_rating,
                new_rating: r.new_rating,
                update_time_seconds: r.rating_update_time_seconds,
            })
            .collect(),
        submissions: submissions
            .into_iter()
            .map(|s| CodeforcesSubmission {
                contest_id: s.problem.contest_id.or(s.contest_id),
                index: s.problem.index,
                verdict: s.verdict,
                creation_time_seconds: s.creation_time_seconds,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeforcesExtractor;

impl CodeforcesExtractor {
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &ExtractContext,
        handle: &str,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExtractError> {
        let url = format!("{}/{}", ctx.endpoints.codeforces_api.trim_end_matches('/'), method);
        let mut request = FetchRequest::get(Source::Codeforces, url);
        for (key, value) in params {
            request = request.query(*key, value);
        }

        let resp = match ctx.fetch_raw(&request, handle).await {
            Ok(resp) => resp,
            // The API answers unknown handles with 400 and a FAILED envelope.
            Err(FetchError::HttpStatus { status: 400, body, .. }) if not_found_comment(&body) => {
                return Err(ExtractError::not_found(Source::Codeforces, handle));
            }
            Err(err) => return Err(err.into_extract_error(Source::Codeforces, handle)),
        };
        let envelope: Envelope<T> = resp
            .json()
            .map_err(|err| err.into_extract_error(Source::Codeforces, handle))?;
        unwrap_envelope(handle, method, envelope)
    }
}

#[async_trait]
impl SourceExtractor for CodeforcesExtractor {
    fn source(&self) -> Source {
        Source::Codeforces
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let handle = identifier.handle.as_str();

        let mut users: Vec<UserInfo> = self
            .call(ctx, handle, "user.info", &[("handles", handle.to_string())])
            .await?;
        if users.is_empty() {
            return Err(ExtractError::not_found(Source::Codeforces, handle));
        }
        let info = users.remove(0);

        let ratings: Vec<RatingChange> = self
            .call(ctx, handle, "user.rating", &[("handle", handle.to_string())])
            .await?;
        let submissions: Vec<Submission> = self
            .call(
                ctx,
                handle,
                "user.status",
                &[
                    ("handle", handle.to_string()),
                    ("from", "1".to_string()),
                    ("count", STATUS_COUNT.to_string()),
                ],
            )
            .await?;
        debug!(handle, contests = ratings.len(), submissions = submissions.len(), "codeforces api fetched");

        Ok(ProfileDraft::Codeforces(draft_from_parts(
            handle,
            ctx.now,
            info,
            ratings,
            submissions,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cptrack_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn failed_envelope_with_not_found_comment_is_user_not_found() {
        let envelope: Envelope<Vec<UserInfo>> = serde_json::from_value(json!({
            "status": "FAILED",
            "comment": "handles: User with handle ghost_user not found"
        }))
        .unwrap();
        let err = unwrap_envelope("ghost_user", "user.info", envelope).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }

    #[test]
    fn other_failures_are_schema_errors() {
        let envelope: Envelope<Vec<UserInfo>> =
            serde_json::from_value(json!({"status": "FAILED", "comment": "Call limit exceeded"})).unwrap();
        assert_eq!(
            unwrap_envelope("x", "user.info", envelope).unwrap_err().kind(),
            ErrorKind::SchemaError
        );
    }

    #[test]
    fn submissions_prefer_problem_contest_id() {
        let info: UserInfo = serde_json::from_value(json!({"handle": "tourist", "rating": 3800})).unwrap();
        let subs: Vec<Submission> = serde_json::from_value(json!([
            {"creationTimeSeconds": 10, "problem": {"contestId": 1, "index": "A"}, "verdict": "OK"},
            {"contestId": 7, "creationTimeSeconds": 5, "problem": {"index": "B"}}
        ]))
        .unwrap();
        let draft = draft_from_parts("tourist", chrono::Utc::now(), info, Vec::new(), subs);
        assert_eq!(draft.submissions[0].contest_id, Some(1));
        assert_eq!(draft.submissions[1].contest_id, Some(7));
        assert!(draft.submissions[0].is_accepted());
        assert!(!draft.submissions[1].is_accepted());
    }
}
