//! Submission/assignment store boundary.
//!
//! The engine only needs three calls; schema, transactions and concurrency
//! control belong to whoever owns the store.

use async_trait::async_trait;
use grader_common::keys;
use grader_common::{Assignment, AssignmentId, GradeError, Result, Submission, SubmissionId};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission>;

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment>;

    /// Overwrite an existing submission; never creates one.
    /// Fails with `SubmissionNotFound` when the record is gone.
    async fn update_submission(&self, submission: &Submission) -> Result<()>;
}

/// JSON documents in Redis, keyed by `grader_common::keys`
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(persistence)?;
        raw.map(|json| serde_json::from_str(&json).map_err(persistence))
            .transpose()
    }
}

fn persistence(e: impl std::fmt::Display) -> GradeError {
    GradeError::Persistence(e.to_string())
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission> {
        self.load(&keys::submission_key(id))
            .await?
            .ok_or(GradeError::SubmissionNotFound(id))
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment> {
        self.load(&keys::assignment_key(id))
            .await?
            .ok_or(GradeError::AssignmentNotFound(id))
    }

    async fn update_submission(&self, submission: &Submission) -> Result<()> {
        let json = serde_json::to_string(submission).map_err(persistence)?;
        let mut conn = self.conn.clone();
        // XX: only set when the key already exists, nil otherwise
        let written: Option<String> = redis::cmd("SET")
            .arg(keys::submission_key(submission.id))
            .arg(json)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(persistence)?;
        written
            .map(|_| ())
            .ok_or(GradeError::SubmissionNotFound(submission.id))
    }
}
