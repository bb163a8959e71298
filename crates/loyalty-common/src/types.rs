//! Data model shared between the source, buffer, dispatcher and sinks

use serde::{Deserialize, Serialize};

/// One source entity, kept as the raw JSON object the API returned
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Result of one successful page fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records in source order
    pub records: Vec<Record>,

    /// Continuation cursor; `None` means the source is exhausted
    pub next_cursor: Option<String>,
}

impl Page {
    /// Build a page, treating a blank cursor as absent
    pub fn new(records: Vec<Record>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor: next_cursor.filter(|c| !c.trim().is_empty()),
        }
    }

    /// The terminal page returned for "no results" responses
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Whether a batch was cut at the size limit or flushed at stream end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Full,
    Final,
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchKind::Full => write!(f, "full"),
            BatchKind::Final => write!(f, "final"),
        }
    }
}

/// An ordered group of records delivered to the sink in one call.
///
/// Batches are immutable once cut: the record vector is only reachable
/// through shared references or by consuming the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
    kind: BatchKind,
}

impl Batch {
    pub fn new(records: Vec<Record>, kind: BatchKind) -> Self {
        Self { records, kind }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A batch tagged with its submission sequence number (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub sequence: u64,
    pub batch: Batch,
}

impl UploadTask {
    pub fn new(sequence: u64, batch: Batch) -> Self {
        Self { sequence, batch }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}
