use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cptrack_adapters::{ExtractContext, ExtractOptions, SourceExtractor};
use cptrack_core::calendar::CalendarDay;
use cptrack_core::draft::{CodeChefDraft, GitHubDraft};
use cptrack_core::{DataSource, ErrorKind, ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::{HttpClientConfig, HttpFetcher, MemoryStudentStore, StudentStore};
use cptrack_sync::{resolve_settings, RefreshOutcome, Refresher, Scheduler, SourceRegistry, TickMode};
use serde_json::{json, Value as JsonValue};

type Script = dyn Fn(usize, &ProfileIdentifier, DateTime<Utc>) -> Result<ProfileDraft, ExtractError> + Send + Sync;

/// Extractor whose result is computed from the call number.
struct ScriptedExtractor {
    source: Source,
    calls: AtomicUsize,
    script: Box<Script>,
}

impl ScriptedExtractor {
    fn new(
        source: Source,
        script: impl Fn(usize, &ProfileIdentifier, DateTime<Utc>) -> Result<ProfileDraft, ExtractError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceExtractor for ScriptedExtractor {
    fn source(&self) -> Source {
        self.source
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(call, identifier, ctx.now)
    }
}

fn refresher(store: Arc<MemoryStudentStore>, extractor: Arc<ScriptedExtractor>) -> Arc<Refresher> {
    let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
    let store: Arc<dyn StudentStore> = store;
    Arc::new(
        Refresher::new(store, ExtractContext::new(Arc::new(http)), ExtractOptions::default())
            .with_extractor(extractor),
    )
}

async fn store_with(docs: Vec<JsonValue>) -> Arc<MemoryStudentStore> {
    let store = Arc::new(MemoryStudentStore::new());
    for doc in docs {
        store.insert_document(doc).await.expect("insert");
    }
    store
}

async fn doc(store: &MemoryStudentStore, roll: &str) -> JsonValue {
    store.document(roll).await.expect("student exists")
}

fn codechef_draft(handle: &str, now: DateTime<Utc>, data_source: DataSource) -> CodeChefDraft {
    let mut draft = CodeChefDraft::new(handle, now, data_source);
    draft.rating = Some(1264.0);
    draft.max_rating = Some(1264.0);
    draft.global_rank = Some(68253);
    draft.contests_attended = Some(96);
    draft.total_solved = Some(500);
    draft
}

/// 365 days ending today totalling 1842 submissions.
fn full_year(now: DateTime<Utc>) -> Vec<CalendarDay> {
    (0..365)
        .map(|d| {
            let count = if d < 17 { 6 } else { 5 };
            CalendarDay::new(now.date_naive() - chrono::Duration::days(d), count)
        })
        .collect()
}

fn github_draft(handle: &str, now: DateTime<Utc>) -> GitHubDraft {
    GitHubDraft {
        handle: handle.to_string(),
        fetched_at: now,
        data_source: DataSource::GitHubTokenless,
        name: Some("The Octocat".into()),
        bio: None,
        company: None,
        location: None,
        avatar_url: None,
        public_repos: Some(8),
        followers: Some(21000),
        following: Some(9),
        repos: Vec::new(),
        events: Vec::new(),
        total_contributions: None,
        contribution_calendar: Vec::new(),
        pinned: Vec::new(),
    }
}

#[tokio::test]
async fn codechef_static_record_is_upgraded_by_the_browser_tier() {
    let store = store_with(vec![json!({
        "roll_number": "21CS001",
        "platform_links": {"codechef": "https://www.codechef.com/users/kit27csbs23"},
        "platform_usernames": {"codechef": ""}
    })])
    .await;
    let extractor = ScriptedExtractor::new(Source::CodeChef, |call, id, now| {
        let draft = match call {
            0 => codechef_draft(&id.handle, now, DataSource::CodeChefStatic),
            1 => {
                let mut draft = codechef_draft(&id.handle, now, DataSource::CodeChefBrowser);
                draft.heatmap = full_year(now);
                draft
            }
            _ => {
                let mut draft = codechef_draft(&id.handle, now, DataSource::CodeChefStatic);
                draft.rating = Some(1301.0);
                draft
            }
        };
        Ok(ProfileDraft::CodeChef(draft))
    });
    let refresher = refresher(Arc::clone(&store), extractor);

    let outcome = refresher.refresh("21CS001", Source::CodeChef).await.unwrap();
    assert!(matches!(
        outcome,
        RefreshOutcome::Updated { data_source: DataSource::CodeChefStatic, .. }
    ));
    let first = doc(&store, "21CS001").await;
    let record = &first["platforms"]["codechef"];
    assert_eq!(record["data_source"], "codechef_bs4");
    assert_eq!(record["rating"], 1264);
    assert_eq!(record["max_rating"], 1264);
    assert_eq!(record["contests"], 96);
    assert_eq!(record["submission_heatmap"], json!([]));
    assert_eq!(first["platform_usernames"]["codechef"], "kit27csbs23");
    assert!(first["last_scraped_at"].is_string());

    refresher.refresh("21CS001", Source::CodeChef).await.unwrap();
    let second = doc(&store, "21CS001").await;
    let record = &second["platforms"]["codechef"];
    assert_eq!(record["data_source"], "codechef_selenium");
    assert_eq!(record["submission_heatmap"].as_array().map(Vec::len), Some(365));
    assert_eq!(record["total_submissions"], 1842);
    let stats = &record["submission_stats"];
    let product = stats["avg_daily"].as_f64().unwrap() * stats["days_with_submissions"].as_f64().unwrap();
    assert!((product.round() - 1842.0).abs() <= 1.0);

    // A later static-only refresh updates scalars but keeps the browser data.
    refresher.refresh("21CS001", Source::CodeChef).await.unwrap();
    let third = doc(&store, "21CS001").await;
    let record = &third["platforms"]["codechef"];
    assert_eq!(record["rating"], 1301);
    assert_eq!(record["data_source"], "codechef_selenium");
    assert_eq!(record["submission_heatmap"].as_array().map(Vec::len), Some(365));
    assert_eq!(record["total_submissions"], 1842);
}

#[tokio::test]
async fn github_token_refresh_replaces_tokenless_estimates() {
    let store = store_with(vec![json!({
        "roll_number": "21CS002",
        "platform_usernames": {"github": "octocat"}
    })])
    .await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |call, id, now| {
        let mut draft = github_draft(&id.handle, now);
        if call > 0 {
            draft.data_source = DataSource::GitHubToken;
            draft.total_contributions = Some(12);
            draft.contribution_calendar = vec![
                CalendarDay::new(now.date_naive() - chrono::Duration::days(1), 5),
                CalendarDay::new(now.date_naive(), 7),
            ];
        }
        Ok(ProfileDraft::GitHub(draft))
    });
    let refresher = refresher(Arc::clone(&store), extractor);

    refresher.refresh("21CS002", Source::GitHub).await.unwrap();
    let record = doc(&store, "21CS002").await["platforms"]["github"].clone();
    assert_eq!(record["data_source"], "github_api_v3_tokenless");
    assert_eq!(record["public_repos"], 8);
    assert_eq!(record["total_contributions"], 80);
    assert_eq!((record["current_streak"].clone(), record["longest_streak"].clone()), (json!(0), json!(0)));

    refresher.refresh("21CS002", Source::GitHub).await.unwrap();
    let record = doc(&store, "21CS002").await["platforms"]["github"].clone();
    assert_eq!(record["data_source"], "github_api_v4");
    assert_eq!(record["total_contributions"], 12);
    assert_eq!(record["current_streak"], 2);
    assert_eq!(record["longest_streak"], 2);
    assert_eq!(record["contribution_calendar"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn missing_profile_is_recorded_without_touching_the_record() {
    let store = store_with(vec![json!({
        "roll_number": "21CS003",
        "platform_usernames": {"codolio": "nonexistent"}
    })])
    .await;
    let extractor = ScriptedExtractor::new(Source::Codolio, |_, id, _| {
        Err(ExtractError::not_found(Source::Codolio, id.handle.clone()))
    });
    let refresher = refresher(Arc::clone(&store), extractor);

    let err = refresher.refresh("21CS003", Source::Codolio).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::UserNotFound));

    let student = doc(&store, "21CS003").await;
    assert!(student.get("platforms").map_or(true, |p| p.get("codolio").is_none()));
    let errors = student["scraping_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["source"], "codolio");
    assert_eq!(errors[0]["kind"], "user_not_found");
}

#[tokio::test]
async fn scraping_errors_keep_the_ten_most_recent() {
    let store = store_with(vec![json!({
        "roll_number": "21CS004",
        "platform_usernames": {"leetcode": "flaky"}
    })])
    .await;
    let extractor = ScriptedExtractor::new(Source::LeetCode, |call, _, _| {
        Err(ExtractError::TransientNetwork(format!("attempt {call}")))
    });
    let refresher = refresher(Arc::clone(&store), extractor);

    for _ in 0..12 {
        assert!(refresher.refresh("21CS004", Source::LeetCode).await.is_err());
    }
    let student = doc(&store, "21CS004").await;
    let errors = student["scraping_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 10);
    assert_eq!(errors[0]["message"], "network error: attempt 2");
    assert_eq!(errors[9]["message"], "network error: attempt 11");
    assert_eq!(errors[9]["kind"], "transient_network");
}

#[tokio::test]
async fn unresolvable_identifier_fails_before_extraction() {
    let store = store_with(vec![json!({"roll_number": "21CS005"})]).await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| Ok(ProfileDraft::GitHub(github_draft(&id.handle, now))));
    let refresher = refresher(Arc::clone(&store), Arc::clone(&extractor));

    let err = refresher.refresh("21CS005", Source::GitHub).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidIdentifier));
    assert_eq!(extractor.calls(), 0);
    assert_eq!(doc(&store, "21CS005").await["scraping_errors"][0]["kind"], "invalid_identifier");
}

#[tokio::test]
async fn newer_stored_record_is_left_alone() {
    let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let store = store_with(vec![json!({
        "roll_number": "21CS006",
        "platform_usernames": {"github": "octocat"},
        "platforms": {"github": {"last_updated": future, "public_repos": 3}}
    })])
    .await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| Ok(ProfileDraft::GitHub(github_draft(&id.handle, now))));
    let refresher = refresher(Arc::clone(&store), extractor);

    let outcome = refresher.refresh("21CS006", Source::GitHub).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Stale);
    assert_eq!(doc(&store, "21CS006").await["platforms"]["github"]["public_repos"], 3);
}

#[tokio::test]
async fn unknown_student_is_an_error() {
    let store = store_with(Vec::new()).await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| Ok(ProfileDraft::GitHub(github_draft(&id.handle, now))));
    let refresher = refresher(store, extractor);
    let err = refresher.refresh("nobody", Source::GitHub).await.unwrap_err();
    assert!(err.to_string().contains("nobody"));
}

fn github_only_settings() -> std::collections::BTreeMap<Source, cptrack_sync::SourceSettings> {
    let mut settings = resolve_settings(&SourceRegistry::default());
    for (source, s) in settings.iter_mut() {
        s.enabled = *source == Source::GitHub;
        s.delay = Duration::ZERO;
    }
    settings
}

#[tokio::test]
async fn ticks_honor_cadence_requests_and_full_mode() {
    let fresh = Utc::now().to_rfc3339();
    let store = store_with(vec![
        json!({
            "roll_number": "A",
            "platform_usernames": {"github": "fresh-user"},
            "platforms": {"github": {"last_updated": fresh, "data_source": "github_api_v3_tokenless"}}
        }),
        json!({"roll_number": "B", "platform_links": {"github": "https://github.com/never-synced"}}),
        json!({"roll_number": "C", "is_active": false, "platform_usernames": {"github": "inactive"}}),
        json!({"roll_number": "D", "platform_usernames": {"leetcode": "no-github"}}),
    ])
    .await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| Ok(ProfileDraft::GitHub(github_draft(&id.handle, now))));
    let scheduler = Scheduler::new(refresher(Arc::clone(&store), Arc::clone(&extractor)), github_only_settings())
        .with_full_refresh_gap(Duration::ZERO);

    let summary = scheduler.tick(Source::GitHub, TickMode::Cadence).await.unwrap();
    assert_eq!((summary.considered, summary.eligible, summary.refreshed), (3, 1, 1));
    assert_eq!(doc(&store, "B").await["platform_usernames"]["github"], "never-synced");

    let summary = scheduler.tick(Source::GitHub, TickMode::Cadence).await.unwrap();
    assert_eq!(summary.eligible, 0);

    scheduler.request_refresh("A", Source::GitHub).await;
    let summary = scheduler.tick(Source::GitHub, TickMode::Cadence).await.unwrap();
    assert_eq!((summary.eligible, summary.refreshed), (1, 1));
    assert_eq!(doc(&store, "A").await["platforms"]["github"]["username"], "fresh-user");

    let summaries = scheduler.full_refresh().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].mode, TickMode::Full);
    assert_eq!((summaries[0].eligible, summaries[0].refreshed), (2, 2));
    assert_eq!(extractor.calls(), 4);
    assert!(doc(&store, "C").await.get("platforms").is_none());
}

#[tokio::test]
async fn failures_are_counted_and_the_tick_continues() {
    let store = store_with(vec![
        json!({"roll_number": "E", "platform_usernames": {"github": "ghost"}}),
        json!({"roll_number": "F", "platform_usernames": {"github": "octocat"}}),
    ])
    .await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| {
        if id.handle == "ghost" {
            Err(ExtractError::not_found(Source::GitHub, "ghost"))
        } else {
            Ok(ProfileDraft::GitHub(github_draft(&id.handle, now)))
        }
    });
    let scheduler = Scheduler::new(refresher(Arc::clone(&store), extractor), github_only_settings());

    let summary = scheduler.tick(Source::GitHub, TickMode::Full).await.unwrap();
    assert_eq!((summary.refreshed, summary.failed), (1, 1));
    assert_eq!(doc(&store, "E").await["scraping_errors"][0]["kind"], "user_not_found");
    assert_eq!(doc(&store, "F").await["platforms"]["github"]["followers"], 21000);
}

#[tokio::test]
async fn malformed_student_does_not_abort_the_tick() {
    let store = store_with(vec![
        json!({"roll_number": "G", "platform_usernames": {"github": "octocat"}}),
        json!({"roll_number": "H", "name": null, "platform_usernames": {"github": "hubot"}}),
        json!({"roll_number": "I", "platforms": [], "platform_usernames": {"github": "broken"}}),
    ])
    .await;
    let extractor = ScriptedExtractor::new(Source::GitHub, |_, id, now| Ok(ProfileDraft::GitHub(github_draft(&id.handle, now))));
    let scheduler = Scheduler::new(refresher(Arc::clone(&store), Arc::clone(&extractor)), github_only_settings());

    let summary = scheduler.tick(Source::GitHub, TickMode::Full).await.unwrap();
    assert_eq!((summary.considered, summary.refreshed, summary.failed), (2, 2, 0));
    assert_eq!(doc(&store, "G").await["platforms"]["github"]["followers"], 21000);
    assert_eq!(doc(&store, "H").await["platforms"]["github"]["username"], "hubot");
    assert_eq!(doc(&store, "I").await["platforms"], json!([]));
}

/// GitHub extractor that holds its first call open much longer than the rest
/// and tracks how many calls overlap.
struct SlowFirstCall {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: std::sync::Mutex<Vec<DateTime<Utc>>>,
}

impl SlowFirstCall {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn latest_start(&self) -> Option<DateTime<Utc>> {
        self.started.lock().unwrap().iter().max().copied()
    }
}

#[async_trait]
impl SourceExtractor for SlowFirstCall {
    fn source(&self) -> Source {
        Source::GitHub
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(ctx.now);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let pause = if call == 0 { 400 } else { 10 };
        tokio::time::sleep(Duration::from_millis(pause)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ProfileDraft::GitHub(github_draft(&identifier.handle, ctx.now)))
    }
}

fn stored_last_updated(doc: &JsonValue) -> DateTime<Utc> {
    let raw = doc["platforms"]["github"]["last_updated"].as_str().expect("last_updated");
    DateTime::parse_from_rfc3339(raw).expect("rfc3339").with_timezone(&Utc)
}

#[tokio::test]
async fn overlapping_ticks_for_one_source_run_one_at_a_time() {
    let store = store_with(vec![json!({"roll_number": "J", "platform_usernames": {"github": "octocat"}})]).await;
    let extractor = SlowFirstCall::new();
    let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
    let refresher = Refresher::new(
        Arc::clone(&store) as Arc<dyn StudentStore>,
        ExtractContext::new(Arc::new(http)),
        ExtractOptions::default(),
    )
    .with_extractor(Arc::clone(&extractor) as Arc<dyn SourceExtractor>);
    let scheduler = Scheduler::new(Arc::new(refresher), github_only_settings()).with_full_refresh_gap(Duration::ZERO);

    let (tick, full) = tokio::join!(scheduler.tick(Source::GitHub, TickMode::Cadence), scheduler.full_refresh());
    assert_eq!(tick.unwrap().refreshed, 1);
    assert_eq!(full[0].refreshed, 1);

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(extractor.max_in_flight.load(Ordering::SeqCst), 1);
    let stored = stored_last_updated(&doc(&store, "J").await);
    assert_eq!(Some(stored), extractor.latest_start());
}

#[tokio::test]
async fn slower_earlier_refresh_does_not_overwrite_a_newer_one() {
    let store = store_with(vec![json!({"roll_number": "K", "platform_usernames": {"github": "octocat"}})]).await;
    let extractor = SlowFirstCall::new();
    let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
    let refresher = Refresher::new(
        Arc::clone(&store) as Arc<dyn StudentStore>,
        ExtractContext::new(Arc::new(http)),
        ExtractOptions::default(),
    )
    .with_extractor(Arc::clone(&extractor) as Arc<dyn SourceExtractor>);

    let later = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.refresh("K", Source::GitHub).await
    };
    let (first, second) = tokio::join!(refresher.refresh("K", Source::GitHub), later);
    assert_eq!(first.unwrap(), RefreshOutcome::Stale);
    assert!(matches!(second.unwrap(), RefreshOutcome::Updated { .. }));

    let stored = stored_last_updated(&doc(&store, "K").await);
    assert_eq!(Some(stored), extractor.latest_start());
}
