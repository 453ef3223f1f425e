use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The five external profile sources the tracker refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    LeetCode,
    CodeChef,
    Codeforces,
    GitHub,
    Codolio,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::LeetCode,
        Source::CodeChef,
        Source::Codeforces,
        Source::GitHub,
        Source::Codolio,
    ];

    /// Tag used in persisted documents (`platforms.<tag>`, `platform_links.<tag>`).
    pub fn tag(self) -> &'static str {
        match self {
            Source::LeetCode => "leetcode",
            Source::CodeChef => "codechef",
            Source::Codeforces => "codeforces",
            Source::GitHub => "github",
            Source::Codolio => "codolio",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Source::LeetCode => "LeetCode",
            Source::CodeChef => "CodeChef",
            Source::Codeforces => "Codeforces",
            Source::GitHub => "GitHub",
            Source::Codolio => "Codolio",
        }
    }

    pub fn host(self) -> &'static str {
        match self {
            Source::LeetCode => "leetcode.com",
            Source::CodeChef => "codechef.com",
            Source::Codeforces => "codeforces.com",
            Source::GitHub => "github.com",
            Source::Codolio => "codolio.com",
        }
    }

    /// Dot-path prefix of this source's normalized record.
    pub fn record_path(self) -> String {
        format!("platforms.{}", self.tag())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source tag: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Source::ALL
            .into_iter()
            .find(|source| source.tag() == lower)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}
