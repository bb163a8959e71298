//! Local JSON-lines sink for dry runs

use super::{wrap_records, Sink, SinkError};
use async_trait::async_trait;
use chrono::Utc;
use loyalty_common::UploadTask;
use std::path::PathBuf;
use tracing::info;

/// Writes each batch to `<dir>/batch-<sequence>.jsonl`, one wrapped record per line
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
    name: String,
}

impl JsonLinesSink {
    /// Creates `dir` if it does not exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let name = format!("jsonl:{}", dir.display());
        Ok(Self { dir, name })
    }

    pub fn batch_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("batch-{:05}.jsonl", sequence))
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, task: &UploadTask) -> Result<(), SinkError> {
        let rows = wrap_records(task.batch.records(), Utc::now())?;
        let path = self.batch_path(task.sequence);
        let count = rows.len();

        let written = path.clone();
        tokio::task::spawn_blocking(move || serde_jsonlines::write_json_lines(&written, &rows))
            .await
            .map_err(|e| SinkError::Other(format!("writer task failed: {}", e)))??;

        info!(sequence = task.sequence, records = count, path = %path.display(), "Batch written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::SinkRecord;
    use crate::test_support::records;
    use loyalty_common::{Batch, BatchKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_one_file_per_batch() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out")).unwrap();

        let task = UploadTask::new(7, Batch::new(records(0, 3), BatchKind::Final));
        sink.upload(&task).await.unwrap();

        let path = sink.batch_path(7);
        assert!(path.ends_with("batch-00007.jsonl"));

        let rows: Vec<SinkRecord> = serde_jsonlines::json_lines(&path)
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].json_response, r#"{"id":2}"#);
    }
}
