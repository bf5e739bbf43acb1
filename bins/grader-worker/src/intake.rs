//! Intake of submission ids pushed by the creation flow.
//!
//! Shutdown is only observed between iterations: an id that left the queue
//! is always handed to the pool before the loop stops.

use async_trait::async_trait;
use grader_common::keys::QUEUE_KEY;
use grader_common::{GradeError, Result, SubmissionId};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::orchestrator::EvaluationPool;

/// Seconds a single BLPOP may block, so shutdown is noticed promptly
const POP_TIMEOUT_SECS: u64 = 5;

#[async_trait]
pub trait IntakeQueue: Send {
    /// Next raw entry, or `None` when nothing arrived before the pop timeout
    async fn pop(&mut self) -> Result<Option<String>>;
}

pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IntakeQueue for RedisQueue {
    async fn pop(&mut self) -> Result<Option<String>> {
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(QUEUE_KEY)
            .arg(POP_TIMEOUT_SECS)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| GradeError::Persistence(e.to_string()))?;
        Ok(popped.map(|(_, payload)| payload))
    }
}

/// Pop ids and schedule them until `shutdown` turns true
pub async fn run_intake<Q: IntakeQueue>(
    queue: &mut Q,
    pool: &EvaluationPool,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        let payload = match queue.pop().await {
            Ok(Some(payload)) => payload,
            // Timeout - loop to re-check shutdown
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Queue error while popping submissions");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let id: SubmissionId = match payload.trim().parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(payload = %payload, "Ignoring malformed queue entry");
                continue;
            }
        };

        if let Err(e) = pool.schedule(id).await {
            warn!(submission_id = id, error = %e, kind = e.kind(), "Submission not scheduled");
        }
    }
    info!("Intake stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::PoolConfig;
    use crate::test_support::{assignment, prints, MemoryStore, ScriptedEngine};
    use grader_common::{Submission, SubmissionStatus, TestCase};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Hands out fixed entries and raises shutdown once the last one is popped
    struct ScriptedQueue {
        entries: VecDeque<String>,
        popped: usize,
        shutdown: watch::Sender<bool>,
    }

    #[async_trait]
    impl IntakeQueue for ScriptedQueue {
        async fn pop(&mut self) -> Result<Option<String>> {
            let next = self.entries.pop_front();
            if next.is_some() {
                self.popped += 1;
            }
            if self.entries.is_empty() {
                let _ = self.shutdown.send(true);
            }
            Ok(next)
        }
    }

    fn one_case() -> Vec<TestCase> {
        vec![TestCase {
            id: 1,
            input: String::new(),
            expected_output: "Hello".to_string(),
            points: 10,
        }]
    }

    #[tokio::test]
    async fn test_popped_ids_are_scheduled_even_when_shutdown_arrives() {
        let store = Arc::new(MemoryStore::default());
        store.insert_assignment(assignment("python", &one_case())).await;
        for id in 1..=3 {
            store.insert_submission(Submission::new(id, 1, "student", "code")).await;
        }
        let engine = Arc::new(
            ScriptedEngine::new(vec![prints("Hello"), prints("Hello"), prints("Hello")])
                .with_delay(Duration::from_millis(50)),
        );
        // one slot and one busy worker, so the last schedule waits on a full queue
        let config = PoolConfig {
            worker_count: 1,
            queue_capacity: 1,
            execution_timeout_ms: 1000,
        };
        let pool = EvaluationPool::start(config, store.clone(), engine);
        let (tx, rx) = watch::channel(false);
        let mut queue = ScriptedQueue {
            entries: ["1", "2", "3"].iter().map(|s| s.to_string()).collect(),
            popped: 0,
            shutdown: tx,
        };

        run_intake(&mut queue, &pool, rx).await;
        pool.shutdown().await;

        assert_eq!(queue.popped, 3);
        for id in 1..=3 {
            let submission = store.submission(id).await.unwrap();
            assert_eq!(submission.status, SubmissionStatus::Completed, "submission {}", id);
        }
    }

    #[tokio::test]
    async fn test_nothing_is_popped_after_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let pool = EvaluationPool::start(
            PoolConfig {
                worker_count: 1,
                queue_capacity: 1,
                execution_timeout_ms: 1000,
            },
            store,
            Arc::new(ScriptedEngine::new(vec![])),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut queue = ScriptedQueue {
            entries: ["1".to_string()].into_iter().collect(),
            popped: 0,
            shutdown: tx,
        };

        run_intake(&mut queue, &pool, rx).await;
        pool.shutdown().await;

        assert_eq!(queue.popped, 0);
        assert_eq!(queue.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = Arc::new(MemoryStore::default());
        store.insert_assignment(assignment("python", &one_case())).await;
        store.insert_submission(Submission::new(7, 1, "student", "code")).await;
        let pool = EvaluationPool::start(
            PoolConfig {
                worker_count: 1,
                queue_capacity: 4,
                execution_timeout_ms: 1000,
            },
            store.clone(),
            Arc::new(ScriptedEngine::new(vec![prints("Hello")])),
        );
        let (tx, rx) = watch::channel(false);
        let mut queue = ScriptedQueue {
            entries: ["not-an-id", " 7\n"].iter().map(|s| s.to_string()).collect(),
            popped: 0,
            shutdown: tx,
        };

        run_intake(&mut queue, &pool, rx).await;
        pool.shutdown().await;

        assert_eq!(store.submission(7).await.unwrap().score, 10);
    }
}
