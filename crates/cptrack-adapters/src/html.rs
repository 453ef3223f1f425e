//! Selector helpers over parsed `scraper` documents. Callers parse and query
//! inside synchronous functions; `Html` never crosses an `.await`.

use cptrack_core::ExtractError;
use scraper::{ElementRef, Html, Selector};

pub fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::schema(format!("bad selector {selector}: {e}")))
}

pub fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(element.text().collect::<Vec<_>>().join(" "))
}

pub fn select_first_text(document: &Html, selector: &str) -> Result<Option<String>, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(document.select(&sel).find_map(element_text))
}

pub fn select_all_texts(document: &Html, selector: &str) -> Result<Vec<String>, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(document.select(&sel).filter_map(element_text).collect())
}

pub fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Result<Option<String>, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| n.value().attr(attr))
        .find_map(|s| text_or_none(s.to_string())))
}

pub fn count_matches(document: &Html, selector: &str) -> Result<usize, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(document.select(&sel).count())
}

/// All text of the document, one text node per line.
pub fn document_lines(document: &Html) -> Vec<String> {
    document
        .root_element()
        .text()
        .filter_map(|t| text_or_none(t.to_string()))
        .collect()
}

/// Decimal numbers in reading order; thousands separators are skipped.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut seen_dot = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        let next_is_digit = chars.peek().is_some_and(|c| c.is_ascii_digit());
        if ch == ',' && !current.is_empty() && !seen_dot && next_is_digit {
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() && next_is_digit {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        if !current.is_empty() {
            if let Ok(v) = current.parse::<f64>() {
                out.push(v);
            }
            current.clear();
            seen_dot = false;
        }
    }
    if let Ok(v) = current.parse::<f64>() {
        out.push(v);
    }
    out
}

pub fn first_number(text: &str) -> Option<f64> {
    extract_numbers(text).first().copied()
}

pub fn first_u32(text: &str) -> Option<u32> {
    first_number(text).filter(|n| *n >= 0.0).map(|n| n as u32)
}

pub fn first_u64(text: &str) -> Option<u64> {
    first_number(text).filter(|n| *n >= 0.0).map(|n| n as u64)
}
