//! Mock sync target for integration testing.
//!
//! Provides a deterministic `SyncTarget` implementation that records
//! every call and fails on demand, all in-memory with no external
//! dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use hindsight::outbox::SyncTarget;

/// A mock sync target for deterministic testing.
///
/// Calls are recorded as `(namespace, document_id)` pairs. Individual
/// documents can be set to fail permanently, or the whole target can be
/// forced into an error state.
pub struct MockSyncTarget {
    calls: Mutex<Vec<(String, String)>>,
    failing_docs: Mutex<HashSet<String>>,
    force_error: Mutex<Option<String>>,
}

impl MockSyncTarget {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing_docs: Mutex::new(HashSet::new()),
            force_error: Mutex::new(None),
        }
    }

    /// Make every upsert of this document id fail.
    pub fn fail_document(&self, document_id: &str) {
        self.failing_docs.lock().unwrap().insert(document_id.to_string());
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// All `(namespace, document_id)` pairs attempted so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of attempts made for one document id.
    pub fn attempts_for(&self, document_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, id)| id == document_id)
            .count()
    }
}

#[async_trait]
impl SyncTarget for MockSyncTarget {
    async fn upsert_document(
        &self,
        namespace: &str,
        id: &str,
        _text: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((namespace.to_string(), id.to_string()));

        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        if self.failing_docs.lock().unwrap().contains(id) {
            return Err(anyhow!("document '{id}' rejected"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let target = MockSyncTarget::new();
        target
            .upsert_document("insights", "doc-1", "text", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(target.calls(), vec![("insights".to_string(), "doc-1".to_string())]);
        assert_eq!(target.attempts_for("doc-1"), 1);
    }

    #[tokio::test]
    async fn test_mock_failing_document() {
        let target = MockSyncTarget::new();
        target.fail_document("doc-bad");

        assert!(target
            .upsert_document("insights", "doc-bad", "text", &HashMap::new())
            .await
            .is_err());
        assert!(target
            .upsert_document("insights", "doc-ok", "text", &HashMap::new())
            .await
            .is_ok());
        // Failed attempts are still recorded.
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let target = MockSyncTarget::new();
        target.set_error("simulated endpoint outage");
        assert!(target
            .upsert_document("insights", "doc-1", "text", &HashMap::new())
            .await
            .is_err());

        target.clear_error();
        assert!(target
            .upsert_document("insights", "doc-1", "text", &HashMap::new())
            .await
            .is_ok());
    }
}
