/// Evaluation Orchestrator - Submission Lifecycle
///
/// **Responsibility:**
/// Own the `Pending → Running → {Completed, Error}` transitions and run
/// evaluations in the background of whoever scheduled them.
///
/// **Architecture:**
/// 1. `schedule` validates and claims a submission, then pushes it on a bounded queue
/// 2. A fixed set of workers drains the queue
/// 3. Each evaluation runs in its own task so a panic becomes an `Error` status
/// 4. Every finished evaluation is published as an `EvaluationEvent`
///
/// **Guarantees:**
/// - At most one evaluation per submission id (claim set)
/// - No failure escapes a worker; the submission never stays `Running`
/// - `shutdown` drains every accepted submission before returning

use grader_common::{Config, GradeError, Result, Submission, SubmissionId, SubmissionStatus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::SandboxEngine;
use crate::evaluator;
use crate::metrics;
use crate::store::SubmissionStore;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub execution_timeout_ms: u64,
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            execution_timeout_ms: config.execution_timeout_ms,
        }
    }
}

/// Published once per finished evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationEvent {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    pub score: u32,
    /// Set when the evaluation ended in an error
    pub error: Option<String>,
}

impl EvaluationEvent {
    fn from_submission(submission: &Submission) -> Self {
        let error = (submission.status == SubmissionStatus::Error).then(|| submission.feedback.clone());
        Self {
            submission_id: submission.id,
            status: submission.status,
            score: submission.score,
            error,
        }
    }

    fn failed(submission_id: SubmissionId, message: String) -> Self {
        Self {
            submission_id,
            status: SubmissionStatus::Error,
            score: 0,
            error: Some(message),
        }
    }
}

struct Shared {
    store: Arc<dyn SubmissionStore>,
    engine: Arc<dyn SandboxEngine>,
    timeout_ms: u64,
    claimed: Mutex<HashSet<SubmissionId>>,
    events: broadcast::Sender<EvaluationEvent>,
}

impl Shared {
    fn claim(&self, id: SubmissionId) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(|p| p.into_inner());
        let inserted = claimed.insert(id);
        metrics::set_in_flight(claimed.len());
        inserted
    }

    fn release(&self, id: SubmissionId) {
        let mut claimed = self.claimed.lock().unwrap_or_else(|p| p.into_inner());
        claimed.remove(&id);
        metrics::set_in_flight(claimed.len());
    }

    fn in_flight(&self) -> usize {
        self.claimed.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Load, evaluate and persist one submission
    async fn run_evaluation(&self, id: SubmissionId) -> Result<Submission> {
        let mut submission = self.store.get_submission(id).await?;
        submission.begin_evaluation()?;
        self.store.update_submission(&submission).await?;

        let outcome = match self.store.get_assignment(submission.assignment_id).await {
            Ok(assignment) => {
                evaluator::evaluate(&submission, &assignment, self.engine.as_ref(), self.timeout_ms).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => submission.complete(outcome)?,
            Err(e) => {
                warn!(submission_id = id, error = %e, kind = e.kind(), "Evaluation failed");
                submission.fail(e.to_string())?;
            }
        }

        // deleted or moved on by someone else while the sandbox ran
        let current = self.store.get_submission(id).await?;
        if current.status != SubmissionStatus::Running {
            return Err(GradeError::InvalidTransition {
                id,
                from: current.status,
                to: submission.status,
            });
        }
        self.store.update_submission(&submission).await?;
        Ok(submission)
    }

    /// Move a submission left in `Running` to `Error`
    async fn record_failure(&self, id: SubmissionId, message: String) -> EvaluationEvent {
        let mut submission = match self.store.get_submission(id).await {
            Ok(submission) => submission,
            Err(e) => {
                error!(submission_id = id, error = %e, "Cannot record evaluation failure");
                return EvaluationEvent::failed(id, message);
            }
        };

        if submission.status != SubmissionStatus::Running {
            // never reached Running, or someone else already finished it
            return EvaluationEvent::failed(id, message);
        }

        if submission.fail(message.clone()).is_ok() {
            if let Err(e) = self.store.update_submission(&submission).await {
                error!(submission_id = id, error = %e, "Failed to persist error status");
            }
        }
        EvaluationEvent::from_submission(&submission)
    }

    /// `None` when the submission was not ours to finish
    async fn process(self: &Arc<Self>, id: SubmissionId) -> Option<EvaluationEvent> {
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move { shared.run_evaluation(id).await });

        match task.await {
            Ok(Ok(submission)) => Some(EvaluationEvent::from_submission(&submission)),
            Ok(Err(e @ GradeError::InvalidTransition { .. })) => {
                warn!(submission_id = id, error = %e, "Submission changed elsewhere; result dropped");
                None
            }
            Ok(Err(e)) => {
                error!(submission_id = id, error = %e, kind = e.kind(), "Evaluation aborted");
                let event = match e {
                    GradeError::Persistence(_) => self.record_failure(id, e.to_string()).await,
                    _ => EvaluationEvent::failed(id, e.to_string()),
                };
                Some(event)
            }
            Err(join_error) => {
                error!(submission_id = id, error = %join_error, "Evaluation task panicked");
                let message = "Internal error while evaluating submission".to_string();
                Some(self.record_failure(id, message).await)
            }
        }
    }
}

/// Fixed pool of evaluation workers behind a bounded queue
pub struct EvaluationPool {
    sender: mpsc::Sender<SubmissionId>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl EvaluationPool {
    pub fn start(
        config: PoolConfig,
        store: Arc<dyn SubmissionStore>,
        engine: Arc<dyn SandboxEngine>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            store,
            engine,
            timeout_ms: config.execution_timeout_ms,
            claimed: Mutex::new(HashSet::new()),
            events,
        });

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(worker_id, Arc::clone(&receiver), Arc::clone(&shared)))
            })
            .collect();

        info!(
            workers = config.worker_count.max(1),
            queue_capacity = config.queue_capacity,
            "Evaluation pool started"
        );

        Self {
            sender,
            shared,
            workers,
        }
    }

    /// Queue a pending submission for evaluation without waiting for it.
    /// Waits only while the queue is full.
    pub async fn schedule(&self, id: SubmissionId) -> Result<()> {
        let submission = self.shared.store.get_submission(id).await?;
        if submission.status != SubmissionStatus::Pending {
            return Err(GradeError::AlreadyScheduled(id));
        }
        if !self.shared.claim(id) {
            return Err(GradeError::AlreadyScheduled(id));
        }

        if self.sender.send(id).await.is_err() {
            self.shared.release(id);
            return Err(GradeError::PoolClosed);
        }

        info!(submission_id = id, "Submission scheduled");
        Ok(())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn subscribe(&self) -> broadcast::Receiver<EvaluationEvent> {
        self.shared.events.subscribe()
    }

    /// Submissions scheduled but not yet finished
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Stop accepting work, finish everything already queued, join the workers
    pub async fn shutdown(self) {
        let EvaluationPool {
            sender, workers, ..
        } = self;
        drop(sender);

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Evaluation worker terminated abnormally");
            }
        }
        info!("Evaluation pool drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<SubmissionId>>>,
    shared: Arc<Shared>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(id) = next else {
            break;
        };

        info!(worker_id, submission_id = id, "Evaluation started");
        let processed = shared.process(id).await;
        shared.release(id);

        let Some(event) = processed else {
            metrics::record_evaluation("skipped");
            continue;
        };
        metrics::record_evaluation(&event.status.to_string());
        info!(
            worker_id,
            submission_id = id,
            status = %event.status,
            score = event.score,
            "Evaluation finished"
        );
        // nobody listening is fine
        let _ = shared.events.send(event);
    }
}
