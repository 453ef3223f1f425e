//! Refresh orchestration: configuration, the normalizer, the merger, the
//! `refresh(roll_number, source)` entry point and the scheduler.

pub mod config;
pub mod merge;
pub mod normalize;
pub mod refresh;
pub mod scheduler;

pub use config::{load_source_settings, parse_hh_mm, resolve_settings, SourceEntry, SourceRegistry, SourceSettings, SyncConfig};
pub use merge::{merge, MergeOutcome};
pub use normalize::{normalize, repair_max_rating};
pub use refresh::{RefreshError, RefreshOutcome, Refresher};
pub use scheduler::{is_due, Scheduler, TickMode, TickSummary, FULL_REFRESH_GAP};

pub const CRATE_NAME: &str = "cptrack-sync";
