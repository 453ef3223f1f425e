use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Source;

/// Which tier produced a record. Persisted as a string tag and compared by
/// [`DataSource::strength`] when the merger decides whether a refresh may
/// replace strong-tier fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    LeetCodeGraphql,
    CodeChefStatic,
    CodeChefStaticEstimated,
    CodeChefBrowser,
    CodeChefBrowserEstimated,
    CodeforcesApi,
    GitHubTokenless,
    GitHubToken,
    CodolioBrowser,
}

impl DataSource {
    pub const ALL: [DataSource; 9] = [
        DataSource::LeetCodeGraphql,
        DataSource::CodeChefStatic,
        DataSource::CodeChefStaticEstimated,
        DataSource::CodeChefBrowser,
        DataSource::CodeChefBrowserEstimated,
        DataSource::CodeforcesApi,
        DataSource::GitHubTokenless,
        DataSource::GitHubToken,
        DataSource::CodolioBrowser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::LeetCodeGraphql => "leetcode_graphql",
            DataSource::CodeChefStatic => "codechef_bs4",
            DataSource::CodeChefStaticEstimated => "codechef_bs4_estimated_dates",
            DataSource::CodeChefBrowser => "codechef_selenium",
            DataSource::CodeChefBrowserEstimated => "codechef_selenium_estimated_dates",
            DataSource::CodeforcesApi => "codeforces_api",
            DataSource::GitHubTokenless => "github_api_v3_tokenless",
            DataSource::GitHubToken => "github_api_v4",
            DataSource::CodolioBrowser => "codolio_selenium",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        DataSource::ALL.into_iter().find(|d| d.as_str() == tag)
    }

    pub fn source(self) -> Source {
        match self {
            DataSource::LeetCodeGraphql => Source::LeetCode,
            DataSource::CodeChefStatic
            | DataSource::CodeChefStaticEstimated
            | DataSource::CodeChefBrowser
            | DataSource::CodeChefBrowserEstimated => Source::CodeChef,
            DataSource::CodeforcesApi => Source::Codeforces,
            DataSource::GitHubTokenless | DataSource::GitHubToken => Source::GitHub,
            DataSource::CodolioBrowser => Source::Codolio,
        }
    }

    /// Tier strength within a source; unknown tags rank 0.
    pub fn strength(self) -> u8 {
        match self {
            DataSource::CodeChefBrowser
            | DataSource::CodeChefBrowserEstimated
            | DataSource::GitHubToken => 2,
            _ => 1,
        }
    }

    /// Strength of a persisted tag, 0 when the tag is unknown or absent.
    pub fn strength_of_tag(tag: Option<&str>) -> u8 {
        tag.and_then(DataSource::from_tag).map(DataSource::strength).unwrap_or(0)
    }

    /// Marks a CodeChef tag as carrying estimated contest dates.
    pub fn with_estimated_dates(self) -> Self {
        match self {
            DataSource::CodeChefStatic => DataSource::CodeChefStaticEstimated,
            DataSource::CodeChefBrowser => DataSource::CodeChefBrowserEstimated,
            other => other,
        }
    }

    pub fn has_estimated_dates(self) -> bool {
        matches!(
            self,
            DataSource::CodeChefStaticEstimated | DataSource::CodeChefBrowserEstimated
        )
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DataSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        DataSource::from_tag(&tag)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown data_source tag: {tag}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stronger_tiers_outrank_weaker_ones() {
        assert!(DataSource::CodeChefBrowser.strength() > DataSource::CodeChefStatic.strength());
        assert!(DataSource::GitHubToken.strength() > DataSource::GitHubTokenless.strength());
        assert_eq!(
            DataSource::CodeChefBrowserEstimated.strength(),
            DataSource::CodeChefBrowser.strength()
        );
        assert_eq!(DataSource::strength_of_tag(Some("legacy_scraper")), 0);
        assert_eq!(DataSource::strength_of_tag(None), 0);
    }

    #[test]
    fn tags_round_trip() {
        for ds in DataSource::ALL {
            assert_eq!(DataSource::from_tag(ds.as_str()), Some(ds));
            let json = serde_json::to_value(ds).unwrap();
            assert_eq!(serde_json::from_value::<DataSource>(json).unwrap(), ds);
        }
        assert_eq!(DataSource::CodeChefStatic.as_str(), "codechef_bs4");
        assert_eq!(DataSource::GitHubTokenless.as_str(), "github_api_v3_tokenless");
    }

    #[test]
    fn estimation_flag_only_applies_to_codechef() {
        assert!(DataSource::CodeChefBrowser.with_estimated_dates().has_estimated_dates());
        assert_eq!(DataSource::CodeforcesApi.with_estimated_dates(), DataSource::CodeforcesApi);
    }
}
