//! Profile identifier normalization: free-form URL or bare handle in,
//! `(canonical_url, handle)` out. Pure, no I/O.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Source;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileIdentifier {
    pub canonical_url: String,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("empty {platform} identifier")]
    Empty { platform: Source },
    #[error("invalid {platform} identifier: {input}")]
    InvalidIdentifier { platform: Source, input: String },
}

struct SourcePatterns {
    patterns: Vec<Regex>,
    reserved: &'static [&'static str],
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("identifier pattern {p}: {e}")))
        .collect()
}

static LEETCODE: LazyLock<SourcePatterns> = LazyLock::new(|| SourcePatterns {
    patterns: compile(&[
        r"(?i)^https?://(?:www\.)?leetcode\.com/u/([^/?#\s]+)",
        r"(?i)^https?://(?:www\.)?leetcode\.com/profile/([^/?#\s]+)",
        r"(?i)^https?://(?:www\.)?leetcode\.com/([^/?#\s]+)",
    ]),
    reserved: &[
        "u", "profile", "problems", "problemset", "contest", "discuss", "explore", "studyplan",
        "accounts", "submissions",
    ],
});

static CODECHEF: LazyLock<SourcePatterns> = LazyLock::new(|| SourcePatterns {
    patterns: compile(&[r"(?i)^https?://(?:www\.)?codechef\.com/users/([^/?#\s]+)"]),
    reserved: &[],
});

static CODEFORCES: LazyLock<SourcePatterns> = LazyLock::new(|| SourcePatterns {
    patterns: compile(&[r"(?i)^https?://(?:www\.|m\d?\.)?codeforces\.com/profile/([^/?#\s]+)"]),
    reserved: &[],
});

static GITHUB: LazyLock<SourcePatterns> = LazyLock::new(|| SourcePatterns {
    patterns: compile(&[r"(?i)^https?://(?:www\.)?github\.com/([^/?#\s]+)"]),
    reserved: &["orgs", "settings", "topics", "explore", "marketplace", "sponsors", "login"],
});

static CODOLIO: LazyLock<SourcePatterns> = LazyLock::new(|| SourcePatterns {
    patterns: compile(&[r"(?i)^https?://(?:www\.)?codolio\.com/profile/([^/?#\s]+)"]),
    reserved: &[],
});

fn patterns_for(source: Source) -> &'static SourcePatterns {
    match source {
        Source::LeetCode => &LEETCODE,
        Source::CodeChef => &CODECHEF,
        Source::Codeforces => &CODEFORCES,
        Source::GitHub => &GITHUB,
        Source::Codolio => &CODOLIO,
    }
}

/// Preferred profile URL for a handle.
pub fn canonical_url(source: Source, handle: &str) -> String {
    match source {
        Source::LeetCode => format!("https://leetcode.com/u/{handle}/"),
        Source::CodeChef => format!("https://www.codechef.com/users/{handle}"),
        Source::Codeforces => format!("https://codeforces.com/profile/{handle}"),
        Source::GitHub => format!("https://github.com/{handle}"),
        Source::Codolio => format!("https://codolio.com/profile/{handle}"),
    }
}

fn looks_like_url(source: Source, input: &str) -> Option<String> {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http") {
        return Some(input.to_string());
    }
    // host without scheme, e.g. "www.codechef.com/users/x"
    let host = source.host();
    let host_prefixed = lower.starts_with(host) || lower.starts_with(&format!("www.{host}"));
    if host_prefixed {
        return Some(format!("https://{input}"));
    }
    None
}

/// Normalizes a profile URL or bare handle for `source`.
///
/// A string that is a URL must match one of the source's patterns; a bare
/// string is always accepted as a handle.
pub fn normalize_identifier(source: Source, input: &str) -> Result<ProfileIdentifier, IdentifierError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IdentifierError::Empty { platform: source });
    }

    let Some(url) = looks_like_url(source, trimmed) else {
        let handle = trimmed.trim_start_matches('@').trim_end_matches('/').to_string();
        if handle.is_empty() {
            return Err(IdentifierError::Empty { platform: source });
        }
        return Ok(ProfileIdentifier {
            canonical_url: canonical_url(source, &handle),
            handle,
        });
    };

    let table = patterns_for(source);
    for pattern in &table.patterns {
        let Some(caps) = pattern.captures(&url) else {
            continue;
        };
        let Some(handle) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if handle.is_empty() || table.reserved.iter().any(|r| r.eq_ignore_ascii_case(handle)) {
            continue;
        }
        return Ok(ProfileIdentifier {
            canonical_url: canonical_url(source, handle),
            handle: handle.to_string(),
        });
    }

    Err(IdentifierError::InvalidIdentifier {
        platform: source,
        input: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(source: Source, input: &str) -> ProfileIdentifier {
        normalize_identifier(source, input).unwrap()
    }

    #[test]
    fn leetcode_url_shapes_resolve_to_the_same_handle() {
        for input in [
            "https://leetcode.com/u/tourist/",
            "https://leetcode.com/profile/tourist",
            "https://www.leetcode.com/tourist/",
            "  https://leetcode.com/u/tourist  ",
            "leetcode.com/u/tourist",
        ] {
            let got = id(Source::LeetCode, input);
            assert_eq!(got.handle, "tourist", "input {input}");
            assert_eq!(got.canonical_url, "https://leetcode.com/u/tourist/");
        }
    }

    #[test]
    fn per_source_patterns_extract_handles() {
        assert_eq!(id(Source::CodeChef, "https://www.codechef.com/users/kit27csbs23").handle, "kit27csbs23");
        assert_eq!(id(Source::Codeforces, "https://codeforces.com/profile/tourist?locale=en").handle, "tourist");
        assert_eq!(id(Source::GitHub, "https://github.com/octocat?tab=repositories").handle, "octocat");
        assert_eq!(id(Source::Codolio, "https://codolio.com/profile/someone/card").handle, "someone");
    }

    #[test]
    fn non_matching_urls_are_invalid() {
        let err = normalize_identifier(Source::CodeChef, "https://www.codechef.com/problems/ABC").unwrap_err();
        assert!(matches!(err, IdentifierError::InvalidIdentifier { platform: Source::CodeChef, .. }));
        assert!(normalize_identifier(Source::LeetCode, "https://leetcode.com/problems/two-sum/").is_err());
        assert!(normalize_identifier(Source::Codeforces, "https://example.com/profile/x").is_err());
    }

    #[test]
    fn bare_strings_are_always_accepted_as_handles() {
        let got = id(Source::Codeforces, "tourist");
        assert_eq!(got.canonical_url, "https://codeforces.com/profile/tourist");
        assert_eq!(id(Source::GitHub, "@octocat").handle, "octocat");
        assert!(matches!(
            normalize_identifier(Source::GitHub, "   "),
            Err(IdentifierError::Empty { .. })
        ));
    }

    #[test]
    fn normalization_is_idempotent() {
        for source in Source::ALL {
            let first = id(source, "some_handle");
            assert_eq!(id(source, &first.canonical_url), first, "{source} canonical url");
            assert_eq!(id(source, &first.handle), first, "{source} handle");
        }
    }
}
