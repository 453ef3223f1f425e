//! Core domain model for the competitive-programming profile tracker:
//! sources, identifiers, extraction drafts, canonical records and the error
//! taxonomy. No I/O.

pub mod calendar;
mod data_source;
pub mod draft;
mod error;
pub mod fields;
mod identifier;
pub mod record;
mod source;
mod student;

pub use data_source::DataSource;
pub use draft::ProfileDraft;
pub use error::{ErrorKind, ExtractError, TierAttempt};
pub use fields::FieldUpdates;
pub use identifier::{canonical_url, normalize_identifier, IdentifierError, ProfileIdentifier};
pub use record::{PlatformRecord, RecordHeader};
pub use source::{Source, UnknownSource};
pub use student::{ScrapingErrorEntry, StudentRecord, SCRAPING_ERRORS_CAP};

pub const CRATE_NAME: &str = "cptrack-core";
