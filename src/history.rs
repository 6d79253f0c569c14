//! Submission history for signed-in users.
//!
//! Every completed marking request from an authenticated identity is saved
//! as a [`SubmissionRecord`]. Anonymous runs are never stored.

use crate::error::ExaminerError;
use crate::parser::ParseResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// One stored marking result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: String,
    pub uid: String,
    pub timestamp: DateTime<Utc>,
    pub student_file_name: String,
    pub scheme_file_name: String,
    pub result: ParseResult,
}

impl SubmissionRecord {
    /// New record with a fresh UUID and the current time.
    pub fn new(
        uid: impl Into<String>,
        student_file_name: impl Into<String>,
        scheme_file_name: impl Into<String>,
        result: ParseResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            uid: uid.into(),
            timestamp: Utc::now(),
            student_file_name: student_file_name.into(),
            scheme_file_name: scheme_file_name.into(),
            result,
        }
    }
}

/// Storage for past submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn save(&self, record: &SubmissionRecord) -> Result<(), ExaminerError>;

    /// All records for `uid`, newest first.
    async fn list_for(&self, uid: &str) -> Result<Vec<SubmissionRecord>, ExaminerError>;

    /// One record, only if it belongs to `uid`.
    async fn get(&self, uid: &str, id: &str) -> Result<Option<SubmissionRecord>, ExaminerError> {
        Ok(self.list_for(uid).await?.into_iter().find(|r| r.id == id))
    }
}

fn newest_first(mut records: Vec<SubmissionRecord>) -> Vec<SubmissionRecord> {
    // Stable sort keeps insertion order for equal timestamps; reverse after.
    records.sort_by_key(|r| r.timestamp);
    records.reverse();
    records
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn save(&self, record: &SubmissionRecord) -> Result<(), ExaminerError> {
        self.records
            .lock()
            .map_err(|e| ExaminerError::Storage(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn list_for(&self, uid: &str) -> Result<Vec<SubmissionRecord>, ExaminerError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| ExaminerError::Storage(e.to_string()))?;
        Ok(newest_first(
            guard.iter().filter(|r| r.uid == uid).cloned().collect(),
        ))
    }
}

// ── JSON Lines store ─────────────────────────────────────────────────────────

/// Append-only JSON Lines file, one record per line.
///
/// Lines that fail to parse are skipped with a warning so one torn write
/// cannot hide the rest of a user's history.
#[derive(Debug)]
pub struct JsonlSubmissionStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSubmissionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<SubmissionRecord>, ExaminerError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ExaminerError::Storage(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SubmissionRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!("{}:{}: skipping bad record: {}", self.path.display(), i + 1, e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl SubmissionStore for JsonlSubmissionStore {
    async fn save(&self, record: &SubmissionRecord) -> Result<(), ExaminerError> {
        let storage_err =
            |e: std::io::Error| ExaminerError::Storage(format!("{}: {}", self.path.display(), e));

        let mut line =
            serde_json::to_vec(record).map_err(|e| ExaminerError::Storage(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(storage_err)?;

        // Start on a fresh line if an earlier write was cut short.
        let len = file.metadata().await.map_err(storage_err)?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1)).await.map_err(storage_err)?;
            file.read_exact(&mut last).await.map_err(storage_err)?;
            if last[0] != b'\n' {
                line.insert(0, b'\n');
            }
        }
        file.write_all(&line).await.map_err(storage_err)?;
        file.flush().await.map_err(storage_err)?;

        debug!("Saved submission {} for {}", record.id, record.uid);
        Ok(())
    }

    async fn list_for(&self, uid: &str) -> Result<Vec<SubmissionRecord>, ExaminerError> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        Ok(newest_first(
            records.into_iter().filter(|r| r.uid == uid).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_transcript;
    use chrono::Duration;

    fn record(uid: &str, minutes_ago: i64) -> SubmissionRecord {
        let mut r = SubmissionRecord::new(
            uid,
            "student.pdf",
            "scheme.pdf",
            parse_transcript("Question Number: 1\n---\nTotal Marks: 1/1"),
        );
        r.timestamp = Utc::now() - Duration::minutes(minutes_ago);
        r
    }

    #[test]
    fn record_serialises_camel_case() {
        let json = serde_json::to_value(record("alice", 0)).unwrap();
        assert_eq!(json["studentFileName"], "student.pdf");
        assert_eq!(json["schemeFileName"], "scheme.pdf");
        assert_eq!(json["result"]["total"], "1/1");
        assert_eq!(json["result"]["questions"][0]["questionNumber"], "1");
    }

    #[tokio::test]
    async fn in_memory_lists_newest_first_per_user() {
        let store = InMemorySubmissionStore::new();
        let old = record("alice", 30);
        let new = record("alice", 1);
        store.save(&old).await.unwrap();
        store.save(&record("bob", 5)).await.unwrap();
        store.save(&new).await.unwrap();

        let list = store.list_for("alice").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, new.id);
        assert_eq!(list[1].id, old.id);

        assert_eq!(store.get("alice", &old.id).await.unwrap(), Some(old.clone()));
        assert_eq!(store.get("bob", &old.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn jsonl_round_trip_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history/submissions.jsonl");
        let store = JsonlSubmissionStore::new(&path);

        assert!(store.list_for("alice").await.unwrap().is_empty());

        let a = record("alice", 10);
        let b = record("alice", 2);
        store.save(&a).await.unwrap();
        store.save(&record("bob", 1)).await.unwrap();

        // A write cut off before its newline.
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"id\": \"broken");
        std::fs::write(&path, text).unwrap();
        store.save(&b).await.unwrap();

        let list = JsonlSubmissionStore::new(&path).list_for("alice").await.unwrap();
        assert_eq!(list.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec![b.id.as_str(), a.id.as_str()]);
    }

    #[tokio::test]
    async fn jsonl_save_after_torn_tail_keeps_the_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submissions.jsonl");
        std::fs::write(&path, "{\"id\": \"broken").unwrap();

        let store = JsonlSubmissionStore::new(&path);
        let fresh = record("carol", 1);
        store.save(&fresh).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        let list = store.list_for("carol").await.unwrap();
        assert_eq!(list, vec![fresh]);
    }
}
