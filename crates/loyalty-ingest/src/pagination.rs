//! Cursor-following pagination state machine

use crate::source::{FetchOutcome, PageSource};
use loyalty_common::{Page, Record};
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Fetching,
    /// The source is exhausted
    Done,
    /// Pagination stopped early; the data may be incomplete
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Nothing was fetched; `fatal` means the request could not even be built
    FirstPageFailed { reason: String, fatal: bool },
    /// The consecutive-failure ceiling was reached on a later page
    ConsecutiveFailures { failures: u32, reason: String },
    /// A later page failed in a way retrying cannot fix
    Fatal { reason: String },
}

impl AbortReason {
    /// Whether the whole run must fail rather than report partial results
    pub fn fails_run(&self) -> bool {
        matches!(self, AbortReason::FirstPageFailed { fatal: true, .. })
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FirstPageFailed { reason, .. } => {
                write!(f, "first page could not be fetched: {}", reason)
            },
            AbortReason::ConsecutiveFailures { failures, reason } => {
                write!(f, "{} consecutive page failures, last: {}", failures, reason)
            },
            AbortReason::Fatal { reason } => write!(f, "unrecoverable page failure: {}", reason),
        }
    }
}

pub struct PaginationDriver<S> {
    source: S,
    state: DriverState,
    cursor: Option<String>,
    pages_fetched: u64,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    abort_reason: Option<AbortReason>,
}

impl<S: PageSource> PaginationDriver<S> {
    pub fn new(source: S, max_consecutive_failures: u32) -> Self {
        Self {
            source,
            state: DriverState::Fetching,
            cursor: None,
            pages_fetched: 0,
            consecutive_failures: 0,
            max_consecutive_failures: max_consecutive_failures.max(1),
            abort_reason: None,
        }
    }

    /// Fetch until the next non-empty page or a terminal state.
    ///
    /// Returns `None` once the driver is `Done` or `Aborted`.
    pub async fn next_page(&mut self) -> Option<Vec<Record>> {
        while self.state == DriverState::Fetching {
            match self.source.fetch(self.cursor.as_deref()).await {
                FetchOutcome::Success(page) => return self.on_page(page),
                FetchOutcome::RetryableFailure(reason) => self.on_retryable(reason),
                FetchOutcome::FatalFailure(reason) => self.on_fatal(reason),
            }
        }
        None
    }

    fn on_page(&mut self, page: Page) -> Option<Vec<Record>> {
        self.consecutive_failures = 0;

        if page.is_empty() {
            info!(pages = self.pages_fetched, "Empty page, pagination complete");
            self.state = DriverState::Done;
            return None;
        }

        self.pages_fetched += 1;
        let Page {
            records,
            next_cursor,
        } = page;
        debug!(
            page = self.pages_fetched,
            records = records.len(),
            has_next = next_cursor.is_some(),
            "Page fetched"
        );

        match next_cursor {
            Some(cursor) => self.cursor = Some(cursor),
            None => {
                info!(pages = self.pages_fetched, "Last page reached");
                self.state = DriverState::Done;
            },
        }
        Some(records)
    }

    fn on_retryable(&mut self, reason: String) {
        self.consecutive_failures += 1;

        if self.pages_fetched == 0 {
            error!(%reason, "Failed to fetch first page");
            self.abort(AbortReason::FirstPageFailed {
                reason,
                fatal: false,
            });
        } else if self.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                failures = self.consecutive_failures,
                pages = self.pages_fetched,
                cursor = ?self.cursor,
                "Too many consecutive page failures, stopping pagination; data may be incomplete"
            );
            self.abort(AbortReason::ConsecutiveFailures {
                failures: self.consecutive_failures,
                reason,
            });
        } else {
            warn!(
                failures = self.consecutive_failures,
                max = self.max_consecutive_failures,
                %reason,
                "Page failed, retrying same cursor"
            );
        }
    }

    fn on_fatal(&mut self, reason: String) {
        self.consecutive_failures += 1;
        error!(%reason, pages = self.pages_fetched, "Unrecoverable page failure");

        let abort = if self.pages_fetched == 0 {
            AbortReason::FirstPageFailed {
                reason,
                fatal: true,
            }
        } else {
            AbortReason::Fatal { reason }
        };
        self.abort(abort);
    }

    fn abort(&mut self, reason: AbortReason) {
        self.state = DriverState::Aborted;
        self.abort_reason = Some(reason);
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// Cursor of the page that would have been fetched next
    pub fn last_cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}
