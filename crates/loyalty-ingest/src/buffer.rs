//! Record accumulation and batch cutting

use loyalty_common::{Batch, BatchKind, Record, UploadTask};
use std::mem;
use tracing::debug;

/// Append-only buffer that cuts fixed-size batches in arrival order
#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    pending: Vec<Record>,
    next_sequence: u64,
    records_appended: u64,
}

impl BatchBuffer {
    /// `batch_size` of zero is treated as one
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            next_sequence: 1,
            records_appended: 0,
        }
    }

    /// Append records and return every full batch that became available
    pub fn push(&mut self, records: Vec<Record>) -> Vec<UploadTask> {
        self.records_appended += records.len() as u64;
        self.pending.extend(records);

        let mut ready = Vec::new();
        while self.pending.len() >= self.batch_size {
            let rest = self.pending.split_off(self.batch_size);
            let full = mem::replace(&mut self.pending, rest);
            ready.push(self.cut(full, BatchKind::Full));
        }
        ready
    }

    /// Flush the remainder as the final batch, if any
    pub fn finish(mut self) -> Option<UploadTask> {
        if self.pending.is_empty() {
            return None;
        }
        let remainder = mem::take(&mut self.pending);
        Some(self.cut(remainder, BatchKind::Final))
    }

    fn cut(&mut self, records: Vec<Record>, kind: BatchKind) -> UploadTask {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(sequence, records = records.len(), %kind, "Batch ready");
        UploadTask::new(sequence, Batch::new(records, kind))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn records_appended(&self) -> u64 {
        self.records_appended
    }
}
