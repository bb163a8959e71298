//! Scripted collaborators shared by the unit tests

use crate::sink::{Sink, SinkError};
use crate::source::{FetchOutcome, PageSource, PageTransport, RawResponse, TransportError};
use async_trait::async_trait;
use loyalty_common::{Record, UploadTask};
use reqwest::Url;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records with a sequential `id` field starting at `start`
pub fn records(start: u64, count: u64) -> Vec<Record> {
    (start..start + count)
        .map(|id| {
            let mut record = Record::new();
            record.insert("id".into(), id.into());
            record
        })
        .collect()
}

/// Replays canned responses in order; runs dry with a 500
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageTransport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(RawResponse::new(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                "script exhausted",
            ))
        })
    }
}

/// Replays fetch outcomes in order and records the cursors asked for
pub struct ScriptedSource {
    outcomes: Mutex<VecDeque<FetchOutcome>>,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new(outcomes: Vec<FetchOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome {
        self.cursors.lock().unwrap().push(cursor.map(str::to_string));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FetchOutcome::FatalFailure("script exhausted".into()))
    }
}

/// Sink that remembers what it received and tracks concurrent calls
#[derive(Default)]
pub struct RecordingSink {
    delay: Duration,
    failing: HashSet<u64>,
    received: Mutex<Vec<UploadTask>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful uploads take this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Uploads of this sequence fail immediately
    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.failing.insert(sequence);
        self
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.received.lock().unwrap().iter().map(|t| t.sequence).collect()
    }

    pub fn received(&self) -> Vec<UploadTask> {
        self.received.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn upload(&self, task: &UploadTask) -> Result<(), SinkError> {
        self.received.lock().unwrap().push(task.clone());
        if self.failing.contains(&task.sequence) {
            return Err(SinkError::Rejected {
                status: 500,
                body: "rejected".into(),
            });
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
