//! Merges a freshly normalized record into the stored one and emits the
//! dot-path update set for `platforms.<tag>`.

use chrono::{DateTime, Utc};
use cptrack_core::{DataSource, FieldUpdates, PlatformRecord, Source};
use serde_json::{Map, Value as JsonValue};

/// Fields that never decrease across refreshes.
const MONOTONIC_FIELDS: [&str; 3] = ["max_rating", "longest_streak", "total_active_days"];

/// Arrays a tier replaces wholesale; empty means the tier had no history.
const REPLACED_ARRAYS: [&str; 5] = [
    "contest_history",
    "submission_heatmap",
    "pinned_repositories",
    "contribution_calendar",
    "badges",
];

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The stored record is newer; nothing is written.
    Stale {
        stored: DateTime<Utc>,
        incoming: DateTime<Utc>,
    },
    Apply(FieldUpdates),
}

/// Scalars derived from an array; they stay with the array when it is kept.
fn companions(source: Source, array: &str) -> &'static [&'static str] {
    match (source, array) {
        (Source::CodeChef, "submission_heatmap") => &["total_submissions", "submission_stats"],
        (Source::Codeforces, "submission_heatmap") => &["total_submissions", "submission_stats"],
        (Source::GitHub, "contribution_calendar") => &[
            "total_contributions",
            "current_streak",
            "longest_streak",
            "recent_contributions",
        ],
        _ => &[],
    }
}

fn stored_timestamp(old: &Map<String, JsonValue>) -> Option<DateTime<Utc>> {
    old.get("last_updated")?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn non_empty_array(value: Option<&JsonValue>) -> bool {
    value.and_then(JsonValue::as_array).is_some_and(|a| !a.is_empty())
}

fn larger(new: JsonValue, old: Option<&JsonValue>) -> JsonValue {
    match (new.as_f64(), old.and_then(JsonValue::as_f64)) {
        (Some(n), Some(o)) if o > n => old.cloned().unwrap_or(new),
        _ => new,
    }
}

pub fn merge(new: &PlatformRecord, old: Option<&JsonValue>) -> Result<MergeOutcome, serde_json::Error> {
    let source = new.source();
    let header = new.header();
    let old = old.and_then(JsonValue::as_object);

    if let Some(stored) = old.and_then(stored_timestamp) {
        if stored > header.last_updated {
            return Ok(MergeOutcome::Stale {
                stored,
                incoming: header.last_updated,
            });
        }
    }

    let old_strength =
        DataSource::strength_of_tag(old.and_then(|m| m.get("data_source")).and_then(JsonValue::as_str));
    let new_strength = header.data_source.strength();
    let weaker = old.is_some() && new_strength < old_strength;
    let dominates = new_strength > old_strength;

    let mut fields = new.to_fields()?;
    let old_value = |key: &str| old.and_then(|m| m.get(key));

    for key in MONOTONIC_FIELDS {
        if let Some(value) = fields.remove(key) {
            fields.insert(key.to_string(), larger(value, old_value(key)));
        }
    }

    for key in REPLACED_ARRAYS {
        let Some(value) = fields.get(key) else {
            continue;
        };
        if !non_empty_array(old_value(key)) {
            continue;
        }
        let incoming_empty = value.as_array().is_some_and(Vec::is_empty);
        if weaker || (incoming_empty && !dominates) {
            fields.remove(key);
            for companion in companions(source, key) {
                fields.remove(*companion);
            }
        }
    }

    if weaker {
        fields.remove("data_source");
    }

    let contests = fields
        .get("contests_attended")
        .or_else(|| fields.get("total_contests"))
        .cloned();
    if let Some(contests) = contests {
        fields.insert("contests".to_string(), contests);
    }

    let prefix = source.record_path();
    let mut updates = FieldUpdates::new();
    for (key, value) in fields {
        updates.set(format!("{prefix}.{key}"), value);
    }
    Ok(MergeOutcome::Apply(updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use chrono::Duration;
    use cptrack_adapters::ExtractOptions;
    use cptrack_core::calendar::CalendarDay;
    use cptrack_core::draft::{CodeChefDraft, CodolioDraft};
    use cptrack_core::ProfileDraft;
    use serde_json::json;

    fn codechef(now: DateTime<Utc>, data_source: DataSource, heatmap_days: u32) -> PlatformRecord {
        let mut draft = CodeChefDraft::new("kit27csbs23", now, data_source);
        draft.rating = Some(1264.0);
        draft.max_rating = Some(1264.0);
        draft.contests_attended = Some(96);
        draft.heatmap = (0..heatmap_days)
            .map(|d| CalendarDay::new(now.date_naive() - Duration::days(i64::from(d)), 2))
            .collect();
        normalize(ProfileDraft::CodeChef(draft), &ExtractOptions::default(), now)
    }

    fn applied(outcome: MergeOutcome) -> FieldUpdates {
        match outcome {
            MergeOutcome::Apply(updates) => updates,
            other => panic!("expected updates, got {other:?}"),
        }
    }

    #[test]
    fn first_record_writes_every_field_with_alias() {
        let now = Utc::now();
        let updates = applied(merge(&codechef(now, DataSource::CodeChefStatic, 0), None).unwrap());
        assert_eq!(updates.get("platforms.codechef.data_source"), Some(&json!("codechef_bs4")));
        assert_eq!(updates.get("platforms.codechef.contests"), Some(&json!(96)));
        assert_eq!(updates.get("platforms.codechef.submission_heatmap"), Some(&json!([])));
        assert!(updates.iter().all(|(path, _)| path.starts_with("platforms.codechef.")));
    }

    #[test]
    fn older_records_are_rejected() {
        let now = Utc::now();
        let old = json!({"last_updated": (now + Duration::minutes(5)).to_rfc3339()});
        let outcome = merge(&codechef(now, DataSource::CodeChefStatic, 0), Some(&old)).unwrap();
        assert!(matches!(outcome, MergeOutcome::Stale { .. }));
    }

    #[test]
    fn monotonic_fields_keep_the_stored_maximum() {
        let now = Utc::now();
        let old = json!({"last_updated": (now - Duration::hours(1)).to_rfc3339(), "max_rating": 1400});
        let updates = applied(merge(&codechef(now, DataSource::CodeChefStatic, 0), Some(&old)).unwrap());
        assert_eq!(updates.get("platforms.codechef.max_rating"), Some(&json!(1400)));
        assert_eq!(updates.get("platforms.codechef.rating"), Some(&json!(1264)));
    }

    #[test]
    fn empty_arrays_from_an_equal_tier_keep_stored_history() {
        let now = Utc::now();
        let old = json!({
            "data_source": "codechef_bs4",
            "submission_heatmap": [{"date": "2026-01-01", "count": 3, "level": 4}],
            "total_submissions": 3
        });
        let updates = applied(merge(&codechef(now, DataSource::CodeChefStatic, 0), Some(&old)).unwrap());
        assert!(!updates.contains("platforms.codechef.submission_heatmap"));
        assert!(!updates.contains("platforms.codechef.total_submissions"));
        assert!(updates.contains("platforms.codechef.rating"));
    }

    #[test]
    fn weaker_tiers_cannot_replace_strong_arrays_or_demote_the_tag() {
        let now = Utc::now();
        let old = json!({
            "data_source": "codechef_selenium",
            "submission_heatmap": [{"date": "2026-01-01", "count": 3, "level": 4}],
        });
        let updates = applied(merge(&codechef(now, DataSource::CodeChefStatic, 4), Some(&old)).unwrap());
        assert!(!updates.contains("platforms.codechef.submission_heatmap"));
        assert!(!updates.contains("platforms.codechef.submission_stats"));
        assert!(!updates.contains("platforms.codechef.data_source"));
        assert_eq!(updates.get("platforms.codechef.global_rank"), Some(&json!(0)));
    }

    #[test]
    fn dominating_tiers_promote_and_may_clear_arrays() {
        let now = Utc::now();
        let old = json!({
            "data_source": "codechef_bs4",
            "submission_heatmap": [{"date": "2026-01-01", "count": 3, "level": 4}],
        });
        let updates = applied(merge(&codechef(now, DataSource::CodeChefBrowser, 0), Some(&old)).unwrap());
        assert_eq!(updates.get("platforms.codechef.submission_heatmap"), Some(&json!([])));
        assert_eq!(updates.get("platforms.codechef.data_source"), Some(&json!("codechef_selenium")));
    }

    #[test]
    fn codolio_aliases_total_contests() {
        let now = Utc::now();
        let draft = CodolioDraft {
            handle: "someone".into(),
            fetched_at: now,
            total_active_days: Some(100),
            total_contests: Some(14),
            total_submissions: Some(900),
            badges: Vec::new(),
        };
        let record = normalize(ProfileDraft::Codolio(draft), &ExtractOptions::default(), now);
        let old = json!({"data_source": "codolio_selenium", "total_active_days": 120, "badges": [{"name": "50 Days", "icon": ""}]});
        let updates = applied(merge(&record, Some(&old)).unwrap());
        assert_eq!(updates.get("platforms.codolio.contests"), Some(&json!(14)));
        assert_eq!(updates.get("platforms.codolio.total_active_days"), Some(&json!(120)));
        assert!(!updates.contains("platforms.codolio.badges"));
    }
}
