//! CodeChef profile page parsing, shared by the static and rendered tiers.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use cptrack_core::calendar::CalendarDay;
use cptrack_core::draft::{CodeChefDraft, CodeChefRatingPoint};
use cptrack_core::{DataSource, ExtractError};
use regex::Regex;
use scraper::Html;
use serde_json::Value as JsonValue;

use crate::html::{
    count_matches, document_lines, first_number, first_u32, first_u64, parse_selector, select_all_texts,
    select_first_text,
};

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("codechef pattern {pattern}: {e}"))
}

static ALL_RATING: LazyLock<Regex> = LazyLock::new(|| regex(r"(?s)\ball_?rating\s*=\s*(\[.*?\])\s*;"));
static CONTESTS_HEADER: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)Contests?\s*\(\s*(\d+)\s*\)"));
static CONTESTS_PARTICIPATED: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)No\.?\s*of\s*Contests\s*Participated\s*:?\s*(\d+)"));
static TOTAL_SOLVED: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)Total\s+Problems\s+Solved\s*:?\s*\(?\s*(\d+)"));
static FULLY_SOLVED: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)Fully\s+Solved\s*\(\s*(\d+)\s*\)"));
static PARTIALLY_SOLVED: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)Partially\s+Solved\s*\(\s*(\d+)\s*\)"));
static HIGHEST_RATING: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)Highest\s+Rating\s*:?\s*(\d+)"));
static LEAGUE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"\b(Bronze|Silver|Gold|Platinum|Diamond|Master)\s+League\b"));

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn json_text(entry: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match entry.get(*k)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_number(entry: &JsonValue, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match entry.get(*k)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn entry_date(entry: &JsonValue) -> Option<NaiveDate> {
    if let Some(text) = json_text(entry, &["end_date", "getdate", "date"]) {
        let day: String = text.chars().take(10).collect();
        if let Ok(date) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") {
            return Some(date);
        }
    }
    let year = json_number(entry, &["getyear"])? as i32;
    let month = json_number(entry, &["getmonth"])? as u32;
    let day = json_number(entry, &["getday"])? as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The embedded `all_rating` / `allrating` JS array, in page order.
pub fn parse_allrating(html: &str) -> Vec<CodeChefRatingPoint> {
    let Some(raw) = ALL_RATING.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str()) else {
        return Vec::new();
    };
    let entries: Vec<JsonValue> = serde_json::from_str(raw)
        .or_else(|_| serde_json::from_str(&raw.replace('\'', "\"")))
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| {
            let code = json_text(entry, &["code", "contest_code"])?;
            let rating = json_number(entry, &["rating"])?;
            Some(CodeChefRatingPoint {
                name: json_text(entry, &["name", "contest_name"]).unwrap_or_else(|| code.clone()),
                code,
                rating,
                date: entry_date(entry),
                rank: json_number(entry, &["rank"]).filter(|r| *r >= 0.0).map(|r| r as u64),
                rating_change: json_number(entry, &["rating_change", "ratingChange"]).map(|c| c.round() as i64),
            })
        })
        .collect()
}

/// `rect.day` cells with a non-empty `data-count`.
pub fn parse_heatmap(document: &Html) -> Result<Vec<CalendarDay>, ExtractError> {
    let sel = parse_selector("rect.day[data-date]")?;
    Ok(document
        .select(&sel)
        .filter_map(|rect| {
            let date = rect.value().attr("data-date")?;
            let count = rect.value().attr("data-count")?.trim().parse::<u32>().ok()?;
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
            Some(CalendarDay::new(date, count))
        })
        .collect())
}

/// `[date, count]` pairs returned by the in-page heatmap script.
pub fn heatmap_from_pairs(pairs: &[(String, String)]) -> Vec<CalendarDay> {
    pairs
        .iter()
        .filter_map(|(date, count)| {
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
            let count = count.trim().parse::<u32>().ok()?;
            Some(CalendarDay::new(date, count))
        })
        .collect()
}

fn detail_value(document: &Html, label: &str) -> Result<Option<String>, ExtractError> {
    let items = parse_selector(".user-details li")?;
    let label_sel = parse_selector("label")?;
    let value_sel = parse_selector("span")?;
    for item in document.select(&items) {
        let Some(found) = item.select(&label_sel).find_map(crate::html::element_text) else {
            continue;
        };
        if found.trim_end_matches(':').trim().eq_ignore_ascii_case(label) {
            return Ok(item.select(&value_sel).find_map(crate::html::element_text));
        }
    }
    Ok(None)
}

fn parse_stars(document: &Html) -> Result<Option<u8>, ExtractError> {
    let star_nodes = count_matches(document, ".rating .star")?;
    if star_nodes > 0 {
        return Ok(Some(star_nodes.min(7) as u8));
    }
    let Some(text) = select_first_text(document, ".rating")? else {
        return Ok(None);
    };
    if !text.contains('★') {
        return Ok(None);
    }
    let stars = first_u32(&text).unwrap_or_else(|| text.chars().filter(|c| *c == '★').count() as u32);
    Ok(Some(stars.min(7) as u8))
}

fn parse_name(document: &Html) -> Result<Option<String>, ExtractError> {
    for selector in [".user-details-container header h1", "h1.h2-style", ".user-details-container h1"] {
        if let Some(name) = select_first_text(document, selector)? {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

fn contests_cascade(document: &Html, page_text: &str) -> Result<Option<u32>, ExtractError> {
    for header in select_all_texts(document, "h3")? {
        if let Some(n) = capture_u32(&CONTESTS_HEADER, &header) {
            return Ok(Some(n));
        }
    }
    if let Some(n) = capture_u32(&CONTESTS_PARTICIPATED, page_text) {
        return Ok(Some(n));
    }
    Ok(capture_u32(&CONTESTS_HEADER, page_text))
}

fn solved_cascade(document: &Html, page_text: &str) -> Result<Option<u32>, ExtractError> {
    for selector in ["h3", "h4", "h5"] {
        for heading in select_all_texts(document, selector)? {
            if heading.to_ascii_lowercase().contains("total problems solved") {
                if let Some(n) = capture_u32(&TOTAL_SOLVED, &heading).or_else(|| first_u32(&heading)) {
                    return Ok(Some(n));
                }
            }
        }
    }
    Ok(capture_u32(&TOTAL_SOLVED, page_text))
}

/// Parses a profile page (static HTML or rendered DOM) into a draft.
pub fn parse_profile_page(
    html: &str,
    handle: &str,
    fetched_at: DateTime<Utc>,
    data_source: DataSource,
) -> Result<CodeChefDraft, ExtractError> {
    let document = Html::parse_document(html);
    let page_text = document_lines(&document).join("\n");
    let mut draft = CodeChefDraft::new(handle, fetched_at, data_source);

    draft.rating = select_first_text(&document, ".rating-number")?.and_then(|t| first_number(&t));
    draft.allrating = parse_allrating(html);
    draft.max_rating = draft
        .allrating
        .iter()
        .map(|p| p.rating)
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r))));
    if draft.max_rating.is_none() {
        let header = select_first_text(&document, ".rating-header")?.unwrap_or_default();
        draft.max_rating = capture_u32(&HIGHEST_RATING, &header).map(f64::from);
    }

    let ranks = select_all_texts(&document, ".rating-ranks a")?;
    draft.global_rank = ranks.first().and_then(|t| first_u64(t));
    draft.country_rank = ranks.get(1).and_then(|t| first_u64(t));
    draft.stars = parse_stars(&document)?;

    draft.name = parse_name(&document)?;
    draft.country = detail_value(&document, "Country")?
        .or(select_first_text(&document, ".user-country-name")?);
    draft.institution = detail_value(&document, "Institution")?;
    draft.league = LEAGUE.find(&page_text).map(|m| m.as_str().to_string());

    let unique_codes = {
        let mut codes: Vec<&str> = draft.allrating.iter().map(|p| p.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        codes.len() as u32
    };
    draft.contests_attended = match contests_cascade(&document, &page_text)? {
        Some(n) => Some(n.max(unique_codes)),
        None if unique_codes > 0 => Some(unique_codes),
        None => None,
    };

    let section = select_all_texts(&document, "section.problems-solved h3, section.problems-solved h5")?.join("\n");
    draft.fully_solved = capture_u32(&FULLY_SOLVED, &section);
    draft.partially_solved = capture_u32(&PARTIALLY_SOLVED, &section);
    draft.total_solved = solved_cascade(&document, &page_text)?.or(match (draft.fully_solved, draft.partially_solved) {
        (None, None) => None,
        (f, p) => Some(f.unwrap_or(0) + p.unwrap_or(0)),
    });

    draft.heatmap = parse_heatmap(&document)?;
    Ok(draft)
}
