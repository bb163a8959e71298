//! Loyalty source API client
//!
//! - `auth`: access token exchange
//! - `endpoints`: URL and header conventions
//! - `transport`: raw HTTP exchange behind [`PageTransport`]
//! - `classify`: pure response classification and parse diagnostics
//! - `fetcher`: paced, retried page fetch behind [`PageSource`]

pub mod auth;
pub mod classify;
pub mod endpoints;
pub mod fetcher;
pub mod transport;

pub use auth::acquire_token;
pub use endpoints::CustomersEndpoint;
pub use fetcher::{FetchOutcome, PageFetcher, PageSource, RetryPolicy};
pub use transport::{HttpTransport, PageTransport, RawResponse, TransportError};
