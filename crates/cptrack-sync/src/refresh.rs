//! `refresh(roll_number, source)`: resolve, extract, normalize, merge, write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use cptrack_adapters::{extractor_for_source, ExtractContext, ExtractOptions, SourceExtractor};
use cptrack_core::{
    DataSource, ErrorKind, ExtractError, ScrapingErrorEntry, Source, StudentRecord, SCRAPING_ERRORS_CAP,
};
use cptrack_storage::{CaptureStore, HttpFetcher, Jitter, StoreError, StudentStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SourceSettings, SyncConfig};
use crate::merge::{merge, MergeOutcome};
use crate::normalize::normalize;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("student {roll_number} not found")]
    StudentNotFound { roll_number: String },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no extractor registered for {platform}")]
    NoExtractor { platform: Source },
    #[error("serializing {platform} record: {message}")]
    Serialize { platform: Source, message: String },
}

impl RefreshError {
    /// Extraction kind, when the failure came from the source side.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RefreshError::Extract(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == Some(ErrorKind::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated { fields: usize, data_source: DataSource },
    /// The stored record was newer than the one just extracted.
    Stale,
}

pub struct Refresher {
    store: Arc<dyn StudentStore>,
    extractors: HashMap<Source, Arc<dyn SourceExtractor>>,
    base: ExtractContext,
    options: ExtractOptions,
    jitters: HashMap<Source, Jitter>,
}

impl Refresher {
    pub fn new(store: Arc<dyn StudentStore>, base: ExtractContext, options: ExtractOptions) -> Self {
        let extractors: HashMap<Source, Arc<dyn SourceExtractor>> = Source::ALL
            .into_iter()
            .map(|source| (source, Arc::from(extractor_for_source(source))))
            .collect();
        Self {
            store,
            extractors,
            base,
            options,
            jitters: HashMap::new(),
        }
    }

    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn StudentStore>,
        settings: &BTreeMap<Source, SourceSettings>,
    ) -> anyhow::Result<Self> {
        let mut http_config = config.http_config();
        http_config.per_source_concurrency = settings.values().map(|s| s.concurrency).max().unwrap_or(1);
        let http = HttpFetcher::new(http_config).context("building http client")?;
        let mut base = ExtractContext::new(Arc::new(http));
        base.browser = config.browser_config();
        base.github_token = config.github_token.clone();
        base.capture = config.capture_dir.clone().map(CaptureStore::new);

        let mut refresher = Self::new(store, base, config.extract_options());
        for (source, settings) in settings {
            refresher = refresher.with_jitter(*source, settings.jitter);
        }
        Ok(refresher)
    }

    /// Replaces the extractor registered for its source.
    pub fn with_extractor(mut self, extractor: Arc<dyn SourceExtractor>) -> Self {
        self.extractors.insert(extractor.source(), extractor);
        self
    }

    pub fn with_jitter(mut self, source: Source, jitter: Jitter) -> Self {
        self.jitters.insert(source, jitter);
        self
    }

    pub fn store(&self) -> &Arc<dyn StudentStore> {
        &self.store
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.base.cancel.clone()
    }

    fn context_for(&self, source: Source, run_id: Uuid) -> ExtractContext {
        let mut ctx = self.base.clone();
        ctx.run_id = run_id;
        ctx.now = Utc::now();
        if let Some(jitter) = self.jitters.get(&source) {
            ctx.jitter = *jitter;
        }
        ctx
    }

    pub async fn refresh(&self, roll_number: &str, source: Source) -> Result<RefreshOutcome, RefreshError> {
        let student = self
            .store
            .find_student(roll_number)
            .await?
            .ok_or_else(|| RefreshError::StudentNotFound {
                roll_number: roll_number.to_string(),
            })?;
        self.refresh_student(&student, source).await
    }

    /// Refreshes a student already loaded by the caller (a tick's roster).
    pub async fn refresh_student(
        &self,
        student: &StudentRecord,
        source: Source,
    ) -> Result<RefreshOutcome, RefreshError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "refresh",
            run_id = %run_id,
            source = %source,
            roll_number = %student.roll_number
        );
        self.run(student, source, run_id).instrument(span).await
    }

    async fn run(&self, student: &StudentRecord, source: Source, run_id: Uuid) -> Result<RefreshOutcome, RefreshError> {
        let roll_number = student.roll_number.as_str();
        let extractor = self
            .extractors
            .get(&source)
            .ok_or(RefreshError::NoExtractor { platform: source })?;

        let identifier = match student.resolve_identifier(source) {
            Ok(identifier) => identifier,
            Err(err) => {
                let err = ExtractError::from(err);
                self.record_failure(roll_number, source, &err).await;
                return Err(err.into());
            }
        };

        let ctx = self.context_for(source, run_id);
        let draft = match extractor.extract(&ctx, &identifier, &self.options).await {
            Ok(draft) => draft,
            Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled.into()),
            Err(err) => {
                self.record_failure(roll_number, source, &err).await;
                return Err(err.into());
            }
        };

        let record = normalize(draft, &self.options, ctx.now);
        let data_source = record.header().data_source;
        // Merge against the document as it is now, not as it was when the
        // extraction started.
        let current = self
            .store
            .find_student(roll_number)
            .await?
            .ok_or_else(|| RefreshError::StudentNotFound {
                roll_number: roll_number.to_string(),
            })?;
        let outcome = merge(&record, current.platform_record(source)).map_err(|err| RefreshError::Serialize {
            platform: source,
            message: err.to_string(),
        })?;

        let mut updates = match outcome {
            MergeOutcome::Stale { stored, incoming } => {
                warn!(%stored, %incoming, "stored record is newer; skipping update");
                return Ok(RefreshOutcome::Stale);
            }
            MergeOutcome::Apply(updates) => updates,
        };
        updates.set(format!("platform_usernames.{}", source.tag()), identifier.handle.clone());
        updates.set("last_scraped_at", ctx.now.to_rfc3339());

        self.store.set_fields(roll_number, &updates).await?;
        info!(
            handle = %identifier.handle,
            data_source = data_source.as_str(),
            fields = updates.len(),
            "profile refreshed"
        );
        Ok(RefreshOutcome::Updated {
            fields: updates.len(),
            data_source,
        })
    }

    /// Appends to the student's capped `scraping_errors`; a failed write is
    /// logged and dropped.
    async fn record_failure(&self, roll_number: &str, source: Source, err: &ExtractError) {
        let kind = err.kind();
        warn!(kind = kind.as_str(), error = %err, "refresh failed");

        let entry = ScrapingErrorEntry {
            source,
            kind,
            message: err.to_string(),
            ts: Utc::now(),
        };
        let value = match serde_json::to_value(&entry) {
            Ok(value) => value,
            Err(ser_err) => {
                warn!(error = %ser_err, "could not serialize scraping error");
                return;
            }
        };
        if let Err(store_err) = self
            .store
            .push_capped(roll_number, "scraping_errors", value, SCRAPING_ERRORS_CAP)
            .await
        {
            warn!(error = %store_err, "could not record scraping error");
        }
    }
}
