//! I/O plumbing shared by every tier: the HTTP fetcher, GraphQL wrapper,
//! WebDriver sessions, pacing, raw-response capture and the student store.

pub mod browser;
pub mod capture;
pub mod graphql;
pub mod http;
pub mod pace;
pub mod students;

pub use browser::{with_browser, BrowserConfig, BrowserError, BrowserHandle, BrowserSession};
pub use capture::{CaptureStore, CapturedBody};
pub use http::{BackoffPolicy, FetchError, FetchRequest, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use pace::{sleep_or_cancel, Cancelled, Jitter};
pub use students::{MemoryStudentStore, PgStudentStore, StoreError, StudentStore};

pub const CRATE_NAME: &str = "cptrack-storage";
