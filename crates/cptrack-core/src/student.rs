use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::{normalize_identifier, ErrorKind, IdentifierError, ProfileIdentifier, Source};

/// Most recent per-source failures kept on a student document.
pub const SCRAPING_ERRORS_CAP: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingErrorEntry {
    pub source: Source,
    pub kind: ErrorKind,
    pub message: String,
    pub ts: DateTime<Utc>,
}

/// The subset of a student document the tracker reads. Nulls read as the
/// field's default and unreadable `scraping_errors` entries are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub roll_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform_links: BTreeMap<String, Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform_usernames: BTreeMap<String, Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub platforms: BTreeMap<String, JsonValue>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "readable_errors")]
    pub scraping_errors: Vec<ScrapingErrorEntry>,
    #[serde(default = "active_by_default", deserialize_with = "active_unless_false")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn active_unless_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(JsonValue::deserialize(deserializer)?.as_bool() != Some(false))
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(JsonValue::deserialize(deserializer)?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc)))
}

fn readable_errors<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ScrapingErrorEntry>, D::Error> {
    let entries = match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(entries) => entries,
        _ => return Ok(Vec::new()),
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

fn non_blank(map: &BTreeMap<String, Option<String>>, source: Source) -> Option<&str> {
    map.get(source.tag())
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl StudentRecord {
    pub fn new(roll_number: impl Into<String>) -> Self {
        Self {
            roll_number: roll_number.into(),
            name: String::new(),
            platform_links: BTreeMap::new(),
            platform_usernames: BTreeMap::new(),
            platforms: BTreeMap::new(),
            last_scraped_at: None,
            scraping_errors: Vec::new(),
            is_active: true,
        }
    }

    pub fn link(&self, source: Source) -> Option<&str> {
        non_blank(&self.platform_links, source)
    }

    pub fn username(&self, source: Source) -> Option<&str> {
        non_blank(&self.platform_usernames, source)
    }

    /// Resolves the stored username, falling back to the profile link.
    pub fn resolve_identifier(&self, source: Source) -> Result<ProfileIdentifier, IdentifierError> {
        let mut last_err = IdentifierError::Empty { platform: source };
        for candidate in [self.username(source), self.link(source)].into_iter().flatten() {
            match normalize_identifier(source, candidate) {
                Ok(id) => return Ok(id),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    pub fn platform_record(&self, source: Source) -> Option<&JsonValue> {
        self.platforms.get(source.tag()).filter(|v| v.is_object())
    }

    pub fn last_updated(&self, source: Source) -> Option<DateTime<Utc>> {
        self.platform_record(source)?
            .get("last_updated")?
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn data_source_tag(&self, source: Source) -> Option<&str> {
        self.platform_record(source)?.get("data_source")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn documents_with_nulls_and_missing_fields_deserialize() {
        let student: StudentRecord = serde_json::from_value(json!({
            "roll_number": "21CS001",
            "platform_links": {"codechef": null, "leetcode": "https://leetcode.com/u/tourist/"},
            "platforms": {"leetcode": {"last_updated": "2026-02-01T10:00:00Z", "data_source": "leetcode_graphql"}}
        }))
        .unwrap();
        assert!(student.is_active);
        assert_eq!(student.link(Source::CodeChef), None);
        assert_eq!(student.data_source_tag(Source::LeetCode), Some("leetcode_graphql"));
        assert_eq!(
            student.last_updated(Source::LeetCode).map(|t| t.to_rfc3339()),
            Some("2026-02-01T10:00:00+00:00".to_string())
        );
        assert_eq!(student.last_updated(Source::GitHub), None);
    }

    #[test]
    fn null_fields_and_unknown_error_kinds_do_not_reject_the_document() {
        let student: StudentRecord = serde_json::from_value(json!({
            "roll_number": "21CS009",
            "name": null,
            "platform_usernames": null,
            "platforms": null,
            "last_scraped_at": "yesterday",
            "is_active": null,
            "scraping_errors": [
                {"source": "github", "kind": "exploded", "message": "?", "ts": "2026-02-01T10:00:00Z"},
                {"source": "github", "kind": "rate_limited", "message": "429", "ts": "2026-02-01T10:00:00Z"}
            ]
        }))
        .unwrap();
        assert_eq!(student.name, "");
        assert!(student.platforms.is_empty());
        assert_eq!(student.last_scraped_at, None);
        assert!(student.is_active);
        assert_eq!(student.scraping_errors.len(), 1);
        assert_eq!(student.scraping_errors[0].kind, ErrorKind::RateLimited);
    }

    #[test]
    fn identifier_falls_back_to_the_link() {
        let mut student = StudentRecord::new("21CS002");
        student.platform_usernames.insert("codechef".into(), Some(" ".into()));
        student
            .platform_links
            .insert("codechef".into(), Some("https://www.codechef.com/users/kit27csbs23".into()));
        let id = student.resolve_identifier(Source::CodeChef).unwrap();
        assert_eq!(id.handle, "kit27csbs23");

        assert!(matches!(
            student.resolve_identifier(Source::GitHub),
            Err(IdentifierError::Empty { platform: Source::GitHub })
        ));

        student
            .platform_links
            .insert("github".into(), Some("https://gitlab.com/someone".into()));
        assert!(matches!(
            student.resolve_identifier(Source::GitHub),
            Err(IdentifierError::InvalidIdentifier { .. })
        ));
    }
}
