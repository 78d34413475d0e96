//! Dead-letter sink for background work that exhausted its retry budget.
//!
//! A bounded in-process ring buffer; the oldest entry is dropped when full.
//! Read by operators through the API surface, never by the hot path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

const MAX_ERROR_LEN: usize = 2_000;

/// One failed background job.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub task: String,
    /// Snapshot of the job's arguments at failure time.
    pub args: Value,
    /// Truncated error chain.
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Bounded ring buffer of dead letters.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, task: &str, args: Value, error: &str) {
        let mut truncated = error.to_string();
        truncated.truncate(MAX_ERROR_LEN);
        warn!(task = task, error = %truncated, "dead-lettering background job");

        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(DeadLetter {
            task: task.to_string(),
            args,
            error: truncated,
            occurred_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest-first snapshot for operator inspection.
    pub fn list(&self) -> Vec<DeadLetter> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_buffer_drops_oldest() {
        let dlq = DeadLetterQueue::new(3);
        for i in 0..5 {
            dlq.record("poll_whale", json!({ "i": i }), "boom");
        }
        assert_eq!(dlq.len(), 3);
        let entries = dlq.list();
        // Newest first; the two oldest (0, 1) were evicted.
        assert_eq!(entries[0].args, json!({ "i": 4 }));
        assert_eq!(entries[2].args, json!({ "i": 2 }));
    }

    #[test]
    fn long_errors_are_truncated() {
        let dlq = DeadLetterQueue::new(2);
        let huge = "x".repeat(10_000);
        dlq.record("reconcile", json!({}), &huge);
        assert_eq!(dlq.list()[0].error.len(), MAX_ERROR_LEN);
    }
}
