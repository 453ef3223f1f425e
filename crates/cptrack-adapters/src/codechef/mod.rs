//! CodeChef: rendered-browser tier first, static HTML tier as fallback.

mod history;
mod page;

use std::time::Duration;

use async_trait::async_trait;
use cptrack_core::draft::CodeChefDraft;
use cptrack_core::{DataSource, ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::{with_browser, BrowserConfig, BrowserError, FetchRequest};
use tracing::{debug, warn};

use crate::tiers::TierLog;
use crate::{ExtractContext, ExtractOptions, SourceExtractor};

pub use history::parse_problems_solved;
pub use page::{heatmap_from_pairs, parse_allrating, parse_heatmap, parse_profile_page};

const RATING_WAIT: Duration = Duration::from_secs(20);
const SETTLE: Duration = Duration::from_secs(3);
const SECTION_SETTLE: Duration = Duration::from_secs(2);

const HEATMAP_SCRIPT: &str = "return Array.from(document.querySelectorAll('rect.day[data-count]'))\
.map(function (r) { return [r.getAttribute('data-date') || '', r.getAttribute('data-count') || '']; });";

struct Rendered {
    page: String,
    heatmap: Vec<(String, String)>,
    solved_section: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeChefExtractor;

impl CodeChefExtractor {
    async fn browser_tier(
        &self,
        ctx: &ExtractContext,
        browser: &BrowserConfig,
        url: &str,
        handle: &str,
        options: &ExtractOptions,
    ) -> Result<CodeChefDraft, ExtractError> {
        ctx.pace().await?;
        let url = url.to_string();
        let include_history = options.include_history;

        let rendered = with_browser(browser, &ctx.cancel, |b| async move {
            b.goto(&url).await?;
            b.wait_for_css(".rating-number", RATING_WAIT).await?;
            b.pause(SETTLE).await?;
            let page = b.page_source().await?;
            let heatmap: Vec<(String, String)> = b.execute(HEATMAP_SCRIPT, Vec::new()).await?;

            let solved_section = if include_history {
                match solved_section(&b).await {
                    Ok(section) => section,
                    Err(BrowserError::Cancelled) => return Err(BrowserError::Cancelled),
                    Err(err) => {
                        warn!(source = "codechef", error = %err, "problems-solved section unavailable");
                        None
                    }
                }
            } else {
                None
            };
            Ok::<_, BrowserError>(Rendered {
                page,
                heatmap,
                solved_section,
            })
        })
        .await?;

        ctx.capture_body(Source::CodeChef, handle, "html", &rendered.page).await;
        let mut draft = parse_profile_page(&rendered.page, handle, ctx.now, DataSource::CodeChefBrowser)?;
        let heatmap = heatmap_from_pairs(&rendered.heatmap);
        if !heatmap.is_empty() {
            draft.heatmap = heatmap;
        }
        if let Some(section) = rendered.solved_section {
            draft.solved_by_contest = parse_problems_solved(&section);
            debug!(handle, contests = draft.solved_by_contest.len(), "parsed problems-solved section");
        }
        Ok(draft)
    }

    async fn static_tier(&self, ctx: &ExtractContext, url: &str, handle: &str) -> Result<CodeChefDraft, ExtractError> {
        let resp = ctx.fetch(&FetchRequest::get(Source::CodeChef, url), handle).await?;
        // Unknown handles redirect to the landing page with a 200.
        if !resp.final_url.contains("/users/") {
            return Err(ExtractError::not_found(Source::CodeChef, handle));
        }
        parse_profile_page(&resp.body, handle, ctx.now, DataSource::CodeChefStatic)
    }
}

async fn solved_section(b: &cptrack_storage::BrowserHandle) -> Result<Option<String>, BrowserError> {
    let first: Option<String> = b.execute(history::SECTION_SCRIPT, Vec::new()).await?;
    if first.is_none() {
        return Ok(None);
    }
    b.pause(SECTION_SETTLE).await?;
    b.execute(history::SECTION_SCRIPT, Vec::new()).await
}

#[async_trait]
impl SourceExtractor for CodeChefExtractor {
    fn source(&self) -> Source {
        Source::CodeChef
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let handle = identifier.handle.as_str();
        let url = format!("{}/users/{}", ctx.endpoints.codechef_base.trim_end_matches('/'), handle);
        let mut tiers = TierLog::new(Source::CodeChef);

        if let Some(browser) = &ctx.browser {
            let tier = DataSource::CodeChefBrowser.as_str();
            match self.browser_tier(ctx, browser, &url, handle, options).await {
                Ok(draft) if draft.is_viable() => return Ok(ProfileDraft::CodeChef(draft)),
                Ok(_) => tiers.fallback(tier, &ExtractError::schema("rendered profile has no viable data")),
                Err(err) if err.kind().is_terminal() => return Err(err),
                Err(err) => tiers.fallback(tier, &err),
            }
        }

        let tier = DataSource::CodeChefStatic.as_str();
        match self.static_tier(ctx, &url, handle).await {
            Ok(draft) if draft.is_viable() => Ok(ProfileDraft::CodeChef(draft)),
            Ok(_) => {
                tiers.fallback(tier, &ExtractError::schema("static profile has no viable data"));
                Err(tiers.exhausted())
            }
            Err(err) if err.kind().is_terminal() => Err(err),
            Err(err) => {
                tiers.fallback(tier, &err);
                Err(tiers.exhausted())
            }
        }
    }
}
