//! Source extractor contracts and the five platform extractors.

mod codechef;
mod codeforces;
mod codolio;
mod context;
mod github;
pub mod html;
mod leetcode;
pub mod tiers;

use async_trait::async_trait;
use cptrack_core::{normalize_identifier, ExtractError, ProfileDraft, ProfileIdentifier, Source};

pub use codechef::{
    heatmap_from_pairs, parse_allrating, parse_heatmap, parse_problems_solved, parse_profile_page,
    CodeChefExtractor,
};
pub use codeforces::{draft_from_parts, unwrap_envelope, CodeforcesExtractor, STATUS_COUNT};
pub use codolio::{parse_profile as parse_codolio_profile, CodolioExtractor};
pub use context::{Endpoints, ExtractContext, ExtractOptions};
pub use github::{apply_contributions, GitHubExtractor, MAX_REPO_PAGES};
pub use leetcode::{draft_from_profile, LeetCodeExtractor};

pub const CRATE_NAME: &str = "cptrack-adapters";

/// Tiered extraction of one source's profile data.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// Runs the tier pipeline for an already-normalized identifier.
    async fn extract(
        &self,
        ctx: &ExtractContext,
        identifier: &ProfileIdentifier,
        options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError>;

    /// Normalizes a raw username or URL, then extracts. Invalid input fails
    /// before any network activity.
    async fn extract_input(
        &self,
        ctx: &ExtractContext,
        input: &str,
        options: &ExtractOptions,
    ) -> Result<ProfileDraft, ExtractError> {
        let identifier = normalize_identifier(self.source(), input)?;
        self.extract(ctx, &identifier, options).await
    }
}

pub fn extractor_for_source(source: Source) -> Box<dyn SourceExtractor> {
    match source {
        Source::LeetCode => Box::new(LeetCodeExtractor),
        Source::CodeChef => Box::new(CodeChefExtractor),
        Source::Codeforces => Box::new(CodeforcesExtractor),
        Source::GitHub => Box::new(GitHubExtractor),
        Source::Codolio => Box::new(CodolioExtractor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_has_an_extractor() {
        for source in Source::ALL {
            assert_eq!(extractor_for_source(source).source(), source);
        }
    }
}
