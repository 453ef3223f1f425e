use cptrack_core::{ExtractError, Source, TierAttempt};
use tracing::warn;

/// Bookkeeping for a multi-tier pipeline: records each failed tier and emits
/// the `tier fallback` event.
#[derive(Debug)]
pub struct TierLog {
    source: Source,
    attempts: Vec<TierAttempt>,
}

impl TierLog {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            attempts: Vec::new(),
        }
    }

    pub fn fallback(&mut self, tier: &str, err: &ExtractError) {
        let kind = err.kind();
        let message = err.to_string();
        warn!(source = %self.source, tier, kind = %kind, message = %message, "tier fallback");
        self.attempts.push(TierAttempt {
            tier: tier.to_string(),
            kind,
            message,
        });
    }

    pub fn attempts(&self) -> &[TierAttempt] {
        &self.attempts
    }

    pub fn exhausted(self) -> ExtractError {
        ExtractError::TiersExhausted {
            platform: self.source,
            attempts: self.attempts,
        }
    }
}
