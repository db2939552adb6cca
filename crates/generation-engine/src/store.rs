//! Generation record storage
//!
//! Holds one `GenerationRecord` per execution attempt, keyed by generation
//! id, plus an index from output node to its most recently *created* record.
//! The store is an explicit handle: hosts and tests construct their own and
//! share it with `Arc`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::types::NodeId;

/// Lifecycle of one attempt: idle -> running -> succeeded | failed | canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl GenerationStatus {
    fn can_become(&self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Idle, Running) | (Idle, Failed) | (Idle, Canceled) | (Running, Succeeded) | (Running, Failed) | (Running, Canceled)
        )
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// One execution attempt for an output node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub workflow_id: String,
    pub output_node_id: NodeId,
    /// Snapshot of the compiled request
    pub request: Value,
    pub response: Option<Value>,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Creation order within the store
    #[serde(skip)]
    seq: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, GenerationRecord>,
    latest_by_output: HashMap<NodeId, String>,
    next_seq: u64,
}

/// Thread-safe in-memory store of generation records
#[derive(Debug, Default)]
pub struct GenerationStore {
    inner: RwLock<StoreInner>,
}

impl GenerationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle record and make it the latest for its output node
    pub fn create(
        &self,
        workflow_id: impl Into<String>,
        output_node_id: impl Into<String>,
        request: Value,
    ) -> GenerationRecord {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let record = GenerationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            output_node_id: output_node_id.into(),
            request,
            response: None,
            status: GenerationStatus::Idle,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            seq,
        };
        inner
            .latest_by_output
            .insert(record.output_node_id.clone(), record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());
        record
    }

    /// idle -> running
    pub fn mark_running(&self, id: &str) -> Result<GenerationRecord, StoreError> {
        self.transition(id, GenerationStatus::Running, |record| {
            record.started_at = Some(Utc::now());
        })
    }

    /// running -> succeeded, attaching the raw response
    pub fn mark_succeeded(&self, id: &str, response: Value) -> Result<GenerationRecord, StoreError> {
        self.transition(id, GenerationStatus::Succeeded, move |record| {
            record.response = Some(response);
            record.ended_at = Some(Utc::now());
        })
    }

    /// idle | running -> failed
    pub fn mark_failed(&self, id: &str, error: impl Into<String>) -> Result<GenerationRecord, StoreError> {
        let error = error.into();
        self.transition(id, GenerationStatus::Failed, move |record| {
            record.error = Some(error);
            record.ended_at = Some(Utc::now());
        })
    }

    /// idle | running -> canceled
    ///
    /// Only bookkeeping: nothing in flight is aborted.
    pub fn mark_canceled(&self, id: &str) -> Result<GenerationRecord, StoreError> {
        self.transition(id, GenerationStatus::Canceled, |record| {
            record.ended_at = Some(Utc::now());
        })
    }

    fn transition<F>(&self, id: &str, next: GenerationStatus, apply: F) -> Result<GenerationRecord, StoreError>
    where
        F: FnOnce(&mut GenerationRecord),
    {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !record.status.can_become(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }
        record.status = next;
        apply(record);
        Ok(record.clone())
    }

    /// Record by generation id
    pub fn get(&self, id: &str) -> Option<GenerationRecord> {
        self.inner.read().records.get(id).cloned()
    }

    /// Most recently created record for an output node
    pub fn latest_for_output(&self, output_node_id: &str) -> Option<GenerationRecord> {
        let inner = self.inner.read();
        inner
            .latest_by_output
            .get(output_node_id)
            .and_then(|id| inner.records.get(id))
            .cloned()
    }

    /// All records of a workflow in creation order
    pub fn records_for_workflow(&self, workflow_id: &str) -> Vec<GenerationRecord> {
        let inner = self.inner.read();
        let mut records: Vec<GenerationRecord> = inner
            .records
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Remove every record of a workflow and rebuild the latest index.
    ///
    /// Returns the number of removed records.
    pub fn clear_workflow(&self, workflow_id: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.records.len();
        inner.records.retain(|_, r| r.workflow_id != workflow_id);
        let removed = before - inner.records.len();

        let mut latest: HashMap<NodeId, (u64, String)> = HashMap::new();
        for record in inner.records.values() {
            let entry = latest
                .entry(record.output_node_id.clone())
                .or_insert((record.seq, record.id.clone()));
            if record.seq > entry.0 {
                *entry = (record.seq, record.id.clone());
            }
        }
        inner.latest_by_output = latest.into_iter().map(|(node, (_, id))| (node, id)).collect();

        log::debug!("Cleared {} records of workflow '{}'", removed, workflow_id);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
