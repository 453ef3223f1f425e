//! Codolio: rendered page only. Stats come from labelled text lines,
//! cross-checked against the large-font numeric spans.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cptrack_core::draft::CodolioDraft;
use cptrack_core::record::CodolioBadge;
use cptrack_core::{ExtractError, ProfileDraft, ProfileIdentifier, Source};
use cptrack_storage::{with_browser, BrowserError};
use scraper::{ElementRef, Html};

use crate::html::{element_text, first_u32, parse_selector};
use crate::{ExtractContext, ExtractOptions, SourceExtractor};

const RENDER_WAIT: Duration = Duration::from_secs(6);
const PLACEHOLDERS: [u32; 5] = [2024, 2025, 2026, 404, 500];
const MAX_DAYS: u32 = 2000;
const MAX_CONTESTS: u32 = 1000;
const MAX_SUBMISSIONS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stat {
    ActiveDays,
    Contests,
    Submissions,
}

impl Stat {
    fn classify(text: &str) -> Option<Stat> {
        let lower = text.to_ascii_lowercase();
        if lower.contains("active days") {
            Some(Stat::ActiveDays)
        } else if lower.contains("total contests") || lower.contains("contests") {
            Some(Stat::Contests)
        } else if lower.contains("total questions") || lower.contains("total submissions") || lower.contains("questions")
        {
            Some(Stat::Submissions)
        } else {
            None
        }
    }

    fn ceiling(self) -> u32 {
        match self {
            Stat::ActiveDays => MAX_DAYS,
            Stat::Contests => MAX_CONTESTS,
            Stat::Submissions => MAX_SUBMISSIONS,
        }
    }

    fn plausible(self, value: u32) -> Option<u32> {
        (value <= self.ceiling() && !PLACEHOLDERS.contains(&value)).then_some(value)
    }
}

#[derive(Debug, Default)]
struct Stats {
    active_days: Option<u32>,
    contests: Option<u32>,
    submissions: Option<u32>,
}

impl Stats {
    fn slot(&mut self, stat: Stat) -> &mut Option<u32> {
        match stat {
            Stat::ActiveDays => &mut self.active_days,
            Stat::Contests => &mut self.contests,
            Stat::Submissions => &mut self.submissions,
        }
    }

    fn offer(&mut self, stat: Stat, value: Option<u32>) {
        let slot = self.slot(stat);
        if slot.is_none() {
            *slot = value.and_then(|v| stat.plausible(v));
        }
    }
}

fn labelled_line_stat(line: &str) -> Option<Stat> {
    let lower = line.to_ascii_lowercase();
    if lower.contains("total active days") {
        Some(Stat::ActiveDays)
    } else if lower.contains("total contests") {
        Some(Stat::Contests)
    } else if lower.contains("total questions") || lower.contains("total submissions") {
        Some(Stat::Submissions)
    } else {
        None
    }
}

/// Labelled body-text lines; a label with no number takes the next line's.
fn scan_lines(body_text: &str, stats: &mut Stats) {
    let lines: Vec<&str> = body_text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    for (i, line) in lines.iter().enumerate() {
        let Some(stat) = labelled_line_stat(line) else {
            continue;
        };
        let value = first_u32(line).or_else(|| lines.get(i + 1).and_then(|next| first_u32(next)));
        stats.offer(stat, value);
    }
}

fn parent_text(element: ElementRef<'_>) -> Option<String> {
    element.parent().and_then(ElementRef::wrap).and_then(element_text)
}

fn scan_spans(document: &Html, stats: &mut Stats) -> Result<(), ExtractError> {
    let big = parse_selector(".text-4xl, .text-5xl, .text-6xl")?;
    for span in document.select(&big) {
        let Some(value) = element_text(span).and_then(|t| first_u32(&t)) else {
            continue;
        };
        let Some(stat) = parent_text(span).and_then(|t| Stat::classify(&t)) else {
            continue;
        };
        stats.offer(stat, Some(value));
    }
    Ok(())
}

fn badges(document: &Html) -> Result<Vec<CodolioBadge>, ExtractError> {
    let images = parse_selector("img[src]")?;
    let mut out: Vec<CodolioBadge> = Vec::new();
    for img in document.select(&images) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if !src.to_ascii_lowercase().contains("badge") || out.iter().any(|b| b.icon == src) {
            continue;
        }
        let name = img
            .value()
            .attr("alt")
            .or(img.value().attr("title"))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("badge");
        out.push(CodolioBadge {
            name: name.to_string(),
            icon: src.to_string(),
        });
    }
    Ok(out)
}

/// Parses the rendered page. `body_text` is the visible text, `page_html`
/// the rendered DOM.
pub fn parse_profile(
    handle: &str,
    fetched_at: DateTime<Utc>,
    body_text: &str,
    page_html: &str,
) -> Result<CodolioDraft, ExtractError> {
    let mut stats = Stats::default();
    scan_lines(body_text, &mut stats);
    let document = Html::parse_document(page_html);
    scan_spans(&document, &mut stats)?;

    Ok(CodolioDraft {
        handle: handle.to_string(),
        fetched_at,
        total_active_days: stats.active_days,
        total_contests: stats.contests,
        total_submissions: stats.submissions,
        badges: badges(&document)?,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodolioExtractor;

#[async_trait]
impl SourceExtractor for CodolioExtractor {
    fn source(&self) -> Source {
        Source::Codolio
    }

    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        _options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let handle = identifier.handle.as_str();
        let Some(browser) = &ctx.browser else {
            return Err(ExtractError::Renderer("headless browser is not configured".to_string()));
        };
        ctx.pace().await?;

        let url = format!("{}/profile/{}", ctx.endpoints.codolio_base.trim_end_matches('/'), handle);
        let (body_text, page_html) = with_browser(browser, &ctx.cancel, |b| async move {
            b.goto(&url).await?;
            b.pause(RENDER_WAIT).await?;
            let text = b.body_text().await?;
            let html = b.page_source().await?;
            Ok::<_, BrowserError>((text, html))
        })
        .await?;
        ctx.capture_body(Source::Codolio, handle, "html", &page_html).await;

        let draft = parse_profile(handle, ctx.now, &body_text, &page_html)?;
        if !draft.is_viable() {
            return Err(ExtractError::not_found(Source::Codolio, handle));
        }
        Ok(ProfileDraft::Codolio(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_lines_and_spans_fill_stats() {
        let text = "Total Active Days\n412\nTotal Contests 57\nsomething else";
        let html = r#"<div><p>Total Questions</p><span class="text-5xl">1,230</span></div>
            <img src="https://cdn.codolio.com/badges/streak.png" alt="Streak 100">
            <img src="/logo.png">"#;
        let draft = parse_profile("u", Utc::now(), text, html).unwrap();
        assert_eq!(draft.total_active_days, Some(412));
        assert_eq!(draft.total_contests, Some(57));
        assert_eq!(draft.total_submissions, Some(1230));
        assert_eq!(draft.badges.len(), 1);
        assert_eq!(draft.badges[0].name, "Streak 100");
    }

    #[test]
    fn placeholders_and_out_of_range_values_are_rejected() {
        let text = "Total Active Days 2025\nTotal Contests 5000\nTotal Questions 404";
        let draft = parse_profile("u", Utc::now(), text, "<html></html>").unwrap();
        assert_eq!(draft.total_active_days, None);
        assert_eq!(draft.total_contests, None);
        assert_eq!(draft.total_submissions, None);
        assert!(!draft.is_viable());
    }
}
