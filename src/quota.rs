//! Usage quota: how many marking requests an identity may run per month.
//!
//! The orchestrator calls [`QuotaStore::check_and_increment`] before any
//! rendering or model call. Implementations must make that call atomic per
//! identity: two concurrent requests from the same identity must never both
//! take the last free slot.
//!
//! Counters are bucketed by UTC calendar month (`YYYY-MM`); a new month
//! starts every identity from zero.

use crate::error::ExaminerError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Who a request is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Identity {
    /// A caller with a verified token.
    User { uid: String },
    /// A caller without credentials, keyed by network address or host label.
    Anonymous { client: String },
}

impl Identity {
    pub fn user(uid: impl Into<String>) -> Self {
        Identity::User { uid: uid.into() }
    }

    pub fn anonymous(client: impl Into<String>) -> Self {
        Identity::Anonymous {
            client: client.into(),
        }
    }

    /// Storage key: `user:<uid>` or `anon:<client>`.
    pub fn key(&self) -> String {
        match self {
            Identity::User { uid } => format!("user:{uid}"),
            Identity::Anonymous { client } => format!("anon:{client}"),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            Identity::User { uid } => Some(uid),
            Identity::Anonymous { .. } => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User { .. })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Result of a check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Count after the call (unchanged when not allowed).
    pub used: u32,
    pub limit: u32,
}

/// Usage counter as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub identity: String,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Month the counter applies to, `YYYY-MM`.
    pub period: String,
}

impl UsageSnapshot {
    pub fn new(identity: &Identity, used: u32, limit: u32, period: impl Into<String>) -> Self {
        Self {
            identity: identity.key(),
            used,
            limit,
            remaining: limit.saturating_sub(used),
            period: period.into(),
        }
    }
}

/// Current quota period (UTC month).
pub fn current_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Per-identity usage counters.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically take one slot if `used < limit`.
    async fn check_and_increment(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<QuotaDecision, ExaminerError>;

    /// Slots used in the current period.
    async fn usage(&self, identity: &Identity) -> Result<u32, ExaminerError>;
}

fn decide(counter: &mut u32, limit: u32) -> QuotaDecision {
    if *counter >= limit {
        return QuotaDecision {
            allowed: false,
            used: *counter,
            limit,
        };
    }
    *counter += 1;
    QuotaDecision {
        allowed: true,
        used: *counter,
        limit,
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Process-local counters. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    counters: Mutex<HashMap<(String, String), u32>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-increment against an explicit period.
    pub fn check_and_increment_in(
        &self,
        period: &str,
        identity: &Identity,
        limit: u32,
    ) -> Result<QuotaDecision, ExaminerError> {
        let mut guard = self
            .counters
            .lock()
            .map_err(|e| ExaminerError::Storage(e.to_string()))?;
        let counter = guard
            .entry((period.to_string(), identity.key()))
            .or_insert(0);
        Ok(decide(counter, limit))
    }

    pub fn usage_in(&self, period: &str, identity: &Identity) -> Result<u32, ExaminerError> {
        let guard = self
            .counters
            .lock()
            .map_err(|e| ExaminerError::Storage(e.to_string()))?;
        Ok(guard
            .get(&(period.to_string(), identity.key()))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn check_and_increment(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<QuotaDecision, ExaminerError> {
        self.check_and_increment_in(&current_period(), identity, limit)
    }

    async fn usage(&self, identity: &Identity) -> Result<u32, ExaminerError> {
        self.usage_in(&current_period(), identity)
    }
}

// ── File-backed store ────────────────────────────────────────────────────────

type CounterFile = BTreeMap<String, BTreeMap<String, u32>>;

/// Counters persisted as JSON: `{ "YYYY-MM": { "<identity key>": used } }`.
///
/// Each update holds an async lock across read-modify-write and replaces the
/// file atomically (temp file + rename). The lock is per process; two
/// processes sharing one file are not serialised against each other.
#[derive(Debug)]
pub struct FileQuotaStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check-and-increment against an explicit period.
    ///
    /// Older periods are dropped from the file on every successful write.
    pub async fn check_and_increment_in(
        &self,
        period: &str,
        identity: &Identity,
        limit: u32,
    ) -> Result<QuotaDecision, ExaminerError> {
        let _guard = self.lock.lock().await;
        let mut counters = self.load().await?;

        let decision = {
            let counter = counters
                .entry(period.to_string())
                .or_default()
                .entry(identity.key())
                .or_insert(0);
            decide(counter, limit)
        };

        if decision.allowed {
            counters.retain(|p, _| p.as_str() >= period);
            self.store(&counters).await?;
        }
        debug!(
            "quota {} {}: {}/{} allowed={}",
            period, identity, decision.used, limit, decision.allowed
        );
        Ok(decision)
    }

    pub async fn usage_in(&self, period: &str, identity: &Identity) -> Result<u32, ExaminerError> {
        let _guard = self.lock.lock().await;
        let counters = self.load().await?;
        Ok(counters
            .get(period)
            .and_then(|m| m.get(&identity.key()))
            .copied()
            .unwrap_or(0))
    }

    async fn load(&self) -> Result<CounterFile, ExaminerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(CounterFile::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ExaminerError::Storage(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CounterFile::new()),
            Err(e) => Err(ExaminerError::Storage(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn store(&self, counters: &CounterFile) -> Result<(), ExaminerError> {
        let json = serde_json::to_vec_pretty(counters)
            .map_err(|e| ExaminerError::Storage(e.to_string()))?;
        write_atomic(&self.path, &json).await
    }
}

#[async_trait]
impl QuotaStore for FileQuotaStore {
    async fn check_and_increment(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<QuotaDecision, ExaminerError> {
        self.check_and_increment_in(&current_period(), identity, limit)
            .await
    }

    async fn usage(&self, identity: &Identity) -> Result<u32, ExaminerError> {
        self.usage_in(&current_period(), identity).await
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExaminerError> {
    let storage_err = |e: std::io::Error| ExaminerError::Storage(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(storage_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!("rename {} failed: {}", tmp_path.display(), e);
        return Err(storage_err(e));
    }
    Ok(())
}
