//! The lazily rendered "problems solved" section: one `div.content` per
//! contest, an `h5` title followed by `p` rows of problem links.

use cptrack_core::draft::ContestSolved;
use scraper::{ElementRef, Html};

use crate::html::{element_text, parse_selector};

/// Scrolls the section into view and returns its markup, or `null` when the
/// page has no such section.
pub const SECTION_SCRIPT: &str = "var s = document.querySelector('section.problems-solved'); \
if (!s) { return null; } s.scrollIntoView(); return s.outerHTML;";

fn problems_in(row: ElementRef<'_>) -> Vec<String> {
    let Ok(links) = parse_selector("a") else {
        return Vec::new();
    };
    let linked: Vec<String> = row.select(&links).filter_map(element_text).collect();
    if !linked.is_empty() {
        return linked;
    }
    element_text(row)
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_problems_solved(section_html: &str) -> Vec<ContestSolved> {
    let fragment = Html::parse_fragment(section_html);
    let Ok(contents) = parse_selector("div.content") else {
        return Vec::new();
    };

    let mut out: Vec<ContestSolved> = Vec::new();
    for block in fragment.select(&contents) {
        let mut current: Option<ContestSolved> = None;
        for child in block.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "h5" => {
                    if let Some(done) = current.take() {
                        out.push(done);
                    }
                    current = element_text(child).map(|title| ContestSolved {
                        contest: title.trim_end_matches(':').trim().to_string(),
                        problems: Vec::new(),
                    });
                }
                "p" => {
                    if let Some(entry) = current.as_mut() {
                        entry.problems.extend(problems_in(child));
                    }
                }
                _ => {}
            }
        }
        if let Some(done) = current {
            out.push(done);
        }
    }
    out.retain(|c| !c.problems.is_empty());
    out
}
