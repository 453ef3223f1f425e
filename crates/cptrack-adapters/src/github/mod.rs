//! GitHub: REST for profile, repos and events; GraphQL for the contribution
//! calendar and pinned repositories when a token is configured.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cptrack_core::calendar::CalendarDay;
use cptrack_core::draft::{GitHubDraft, GitHubEventSummary, GitHubRepoSummary};
use cptrack_core::record::PinnedRepository;
use cptrack_core::{DataSource, ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::graphql::GraphqlEndpoint;
use cptrack_storage::FetchRequest;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{ExtractContext, ExtractOptions, SourceExtractor};

const CONTRIBUTIONS_QUERY: &str = include_str!("queries/contributions.graphql");
const ACCEPT: &str = "application/vnd.github+json";
const PER_PAGE: usize = 100;
pub const MAX_REPO_PAGES: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct RestUser {
    pub login: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub public_repos: u32,
    #[serde(default)]
    pub followers: u32,
    #[serde(default)]
    pub following: u32,
}

#[derive(Debug, Deserialize)]
pub struct RestRepo {
    pub name: String,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub forks_count: u32,
    pub language: Option<String>,
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Deserialize)]
pub struct RestEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: EventPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventPayload {
    pub size: Option<u32>,
    #[serde(default)]
    pub commits: Vec<serde_json::Value>,
}

impl From<RestRepo> for GitHubRepoSummary {
    fn from(repo: RestRepo) -> Self {
        GitHubRepoSummary {
            name: repo.name,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            language: repo.language.filter(|l| !l.is_empty()),
            fork: repo.fork,
        }
    }
}

impl From<RestEvent> for GitHubEventSummary {
    fn from(event: RestEvent) -> Self {
        let commits = if event.event_type == "PushEvent" {
            event.payload.size.unwrap_or(event.payload.commits.len() as u32)
        } else {
            0
        };
        GitHubEventSummary {
            event_type: event.event_type,
            created_at: event.created_at,
            commits,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContributionsData {
    pub user: Option<GraphqlUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlUser {
    pub contributions_collection: ContributionsCollection,
    pub pinned_items: Option<PinnedItems>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionsCollection {
    pub contribution_calendar: ContributionCalendar,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    pub total_contributions: u32,
    #[serde(default)]
    pub weeks: Vec<Week>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Week {
    #[serde(default)]
    pub contribution_days: Vec<ContributionDay>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    pub date: NaiveDate,
    pub contribution_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct PinnedItems {
    #[serde(default)]
    pub nodes: Vec<PinnedNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedNode {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub fork_count: u32,
    pub primary_language: Option<LanguageRef>,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRef {
    pub name: String,
}

/// Folds the GraphQL addendum into a REST draft and promotes its tier.
pub fn apply_contributions(draft: &mut GitHubDraft, user: GraphqlUser) {
    let calendar = user.contributions_collection.contribution_calendar;
    draft.total_contributions = Some(calendar.total_contributions);
    draft.contribution_calendar = calendar
        .weeks
        .into_iter()
        .flat_map(|w| w.contribution_days)
        .map(|d| CalendarDay::new(d.date, d.contribution_count))
        .collect();
    // Inline fragments on non-repository nodes come back as empty objects.
    draft.pinned = user
        .pinned_items
        .map(|p| p.nodes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|node| {
            Some(PinnedRepository {
                name: node.name?,
                description: node.description.unwrap_or_default(),
                url: node.url.unwrap_or_default(),
                stars: node.stargazer_count,
                forks: node.fork_count,
                language: node.primary_language.map(|l| l.name).unwrap_or_default(),
            })
        })
        .take(6)
        .collect();
    draft.data_source = DataSource::GitHubToken;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubExtractor;

impl GitHubExtractor {
    fn rest_request(&self, ctx: &ExtractContext, path: &str) -> FetchRequest {
        let url = format!("{}/{}", ctx.endpoints.github_api.trim_end_matches('/'), path);
        let request = FetchRequest::get(Source::GitHub, url).header("accept", ACCEPT);
        match &ctx.github_token {
            Some(token) => request.header("authorization", format!("token {token}")),
            None => request,
        }
    }

    async fn rest<T: DeserializeOwned>(
        &self,
        ctx: &ExtractContext,
        handle: &str,
        request: FetchRequest,
    ) -> Result<T, ExtractError> {
        ctx.fetch(&request, handle)
            .await?
            .json()
            .map_err(|err| err.into_extract_error(Source::GitHub, handle))
    }

    async fn repos(&self, ctx: &ExtractContext, handle: &str) -> Result<Vec<GitHubRepoSummary>, ExtractError> {
        let mut out = Vec::new();
        for page in 1..=MAX_REPO_PAGES {
            let request = self
                .rest_request(ctx, &format!("users/{handle}/repos"))
                .query("per_page", PER_PAGE)
                .query("page", page);
            let batch: Vec<RestRepo> = self.rest(ctx, handle, request).await?;
            let last = batch.len() < PER_PAGE;
            out.extend(batch.into_iter().map(GitHubRepoSummary::from));
            if last {
                break;
            }
        }
        Ok(out)
    }

    async fn contributions(
        &self,
        ctx: &ExtractContext,
        handle: &str,
        token: &str,
    ) -> Result<GraphqlUser, ExtractError> {
        let endpoint = GraphqlEndpoint::new(Source::GitHub, ctx.endpoints.github_graphql.clone())
            .header("authorization", format!("bearer {token}"));
        let resp = ctx
            .graphql::<ContributionsData>(&endpoint, handle, CONTRIBUTIONS_QUERY, json!({ "login": handle }))
            .await?;
        if !resp.errors().is_empty() {
            return Err(ExtractError::schema(format!(
                "github graphql errors: {}",
                resp.error_summary()
            )));
        }
        resp.data
            .and_then(|d| d.user)
            .ok_or_else(|| ExtractError::schema("github graphql returned no user"))
    }
}

#[async_trait]
impl SourceExtractor for GitHubExtractor {
    fn source(&self) -> Source {
        Source::GitHub
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let handle = identifier.handle.as_str();

        let user: RestUser = self
            .rest(ctx, handle, self.rest_request(ctx, &format!("users/{handle}")))
            .await?;
        let repos = self.repos(ctx, handle).await?;
        let events: Vec<RestEvent> = self
            .rest(
                ctx,
                handle,
                self.rest_request(ctx, &format!("users/{handle}/events/public"))
                    .query("per_page", PER_PAGE),
            )
            .await?;

        let mut draft = GitHubDraft {
            handle: if user.login.is_empty() { handle.to_string() } else { user.login },
            fetched_at: ctx.now,
            data_source: DataSource::GitHubTokenless,
            name: user.name.filter(|s| !s.trim().is_empty()),
            bio: user.bio.filter(|s| !s.trim().is_empty()),
            company: user.company.filter(|s| !s.trim().is_empty()),
            location: user.location.filter(|s| !s.trim().is_empty()),
            avatar_url: user.avatar_url,
            public_repos: Some(user.public_repos),
            followers: Some(user.followers),
            following: Some(user.following),
            repos,
            events: events.into_iter().map(GitHubEventSummary::from).collect(),
            total_contributions: None,
            contribution_calendar: Vec::new(),
            pinned: Vec::new(),
        };

        match &ctx.github_token {
            Some(token) => match self.contributions(ctx, handle, token).await {
                Ok(user) => apply_contributions(&mut draft, user),
                Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
                Err(err) => warn!(
                    source = %Source::GitHub,
                    tier = DataSource::GitHubToken.as_str(),
                    kind = %err.kind(),
                    message = %err,
                    "tier fallback"
                ),
            },
            None => debug!(handle, "no github token; contribution calendar approximated"),
        }

        Ok(ProfileDraft::GitHub(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_events_count_commits_from_size_or_list() {
        let events: Vec<RestEvent> = serde_json::from_value(json!([
            {"type": "PushEvent", "created_at": "2026-01-01T00:00:00Z", "payload": {"size": 3}},
            {"type": "PushEvent", "created_at": "2026-01-01T00:00:00Z", "payload": {"commits": [{}, {}]}},
            {"type": "WatchEvent", "created_at": "2026-01-01T00:00:00Z", "payload": {}}
        ]))
        .unwrap();
        let counts: Vec<u32> = events
            .into_iter()
            .map(GitHubEventSummary::from)
            .map(|e| e.commits)
            .collect();
        assert_eq!(counts, vec![3, 2, 0]);
    }

    #[test]
    fn contributions_promote_tier_and_skip_empty_pinned_nodes() {
        let user: GraphqlUser = serde_json::from_value(json!({
            "contributionsCollection": {"contributionCalendar": {
                "totalContributions": 5,
                "weeks": [{"contributionDays": [
                    {"date": "2026-01-01", "contributionCount": 2},
                    {"date": "2026-01-02", "contributionCount": 3}
                ]}]
            }},
            "pinnedItems": {"nodes": [
                {"name": "cp-notes", "url": "https://github.com/u/cp-notes", "stargazerCount": 4, "forkCount": 1,
                 "primaryLanguage": {"name": "Rust"}},
                {}
            ]}
        }))
        .unwrap();
        let mut draft = GitHubDraft {
            handle: "u".into(),
            fetched_at: Utc::now(),
            data_source: DataSource::GitHubTokenless,
            name: None,
            bio: None,
            company: None,
            location: None,
            avatar_url: None,
            public_repos: Some(1),
            followers: None,
            following: None,
            repos: Vec::new(),
            events: Vec::new(),
            total_contributions: None,
            contribution_calendar: Vec::new(),
            pinned: Vec::new(),
        };
        apply_contributions(&mut draft, user);
        assert_eq!(draft.data_source, DataSource::GitHubToken);
        assert_eq!(draft.total_contributions, Some(5));
        assert_eq!(draft.contribution_calendar.len(), 2);
        assert_eq!(draft.pinned.len(), 1);
        assert_eq!(draft.pinned[0].language, "Rust");
    }
}
