//! Persistent job queue.
//!
//! Claims are atomic `UPDATE ... WHERE state = 'queued'` transactions so a
//! restarted process and a live scheduler can share the table safely.

use anyhow::Result;
use chrono::Utc;
use quarry_db::QuarryDb;
use quarry_protocol::types::{
    JobId, JobProgress, JobRun, JobSpec, JobState, Priority, TargetProgress,
};
use sqlx::Row;
use tracing::info;

pub struct JobQueue {
    db: QuarryDb,
}

/// Everything the API needs for one job row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub run: JobRun,
    pub deleted: bool,
}

impl JobQueue {
    pub fn new(db: QuarryDb) -> Self {
        Self { db }
    }

    /// Insert a new job in `queued` state and stamp its id into the spec.
    pub async fn insert(&self, mut spec: JobSpec) -> Result<JobId> {
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_name, spec, state, priority, progress, targets, created_at)
            VALUES (?, '{}', 'queued', ?, '{}', '[]', ?)
            "#,
        )
        .bind(&spec.job_name)
        .bind(spec.priority.rank())
        .bind(spec.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let job_id = JobId::new(result.last_insert_rowid() as u64);
        spec.job_id = job_id;
        sqlx::query("UPDATE jobs SET spec = ? WHERE id = ?")
            .bind(serde_json::to_string(&spec)?)
            .bind(job_id.to_i64()?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(%job_id, name = %spec.job_name, "job created");
        Ok(job_id)
    }

    pub async fn load(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT spec, state, progress, targets, started_at, finished_at, last_error, deleted
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(job_id.to_i64()?)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_record(job_id, &row)?))
    }

    fn row_to_record(job_id: JobId, row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
        let spec_raw: String = row.get("spec");
        let spec: JobSpec = serde_json::from_str(&spec_raw)?;
        let state: JobState = row
            .get::<String, _>("state")
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let progress: JobProgress =
            serde_json::from_str(&row.get::<String, _>("progress")).unwrap_or_default();
        let targets: Vec<TargetProgress> =
            serde_json::from_str(&row.get::<String, _>("targets")).unwrap_or_default();
        let parse_ts = |raw: Option<String>| {
            raw.and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        Ok(JobRecord {
            run: JobRun {
                job_id,
                state,
                progress,
                targets,
                started_at: parse_ts(row.get("started_at")),
                finished_at: parse_ts(row.get("finished_at")),
                last_error: row.get("last_error"),
            },
            spec,
            deleted: row.get::<i64, _>("deleted") != 0,
        })
    }

    /// Compare-and-set the job state. Returns false when the stored state
    /// no longer matches `expected` (a concurrent transition won).
    pub async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        next: JobState,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let started_at = if next == JobState::Running {
            Some(now.clone())
        } else {
            None
        };
        let finished_at = if next.is_terminal() {
            Some(now.clone())
        } else {
            None
        };

        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?,
                started_at = COALESCE(started_at, ?),
                finished_at = COALESCE(?, finished_at)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(next.as_str())
        .bind(started_at)
        .bind(finished_at)
        .bind(job_id.to_i64()?)
        .bind(expected.as_str())
        .execute(self.db.pool())
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn record_error(&self, job_id: JobId, error: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(job_id.to_i64()?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Persist counters and the per-target frontier (the resume point).
    pub async fn save_progress(
        &self,
        job_id: JobId,
        progress: &JobProgress,
        targets: &[TargetProgress],
    ) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, targets = ? WHERE id = ?")
            .bind(serde_json::to_string(progress)?)
            .bind(serde_json::to_string(targets)?)
            .bind(job_id.to_i64()?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Soft delete; only terminal or paused jobs qualify.
    pub async fn soft_delete(&self, job_id: JobId) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE jobs SET deleted = 1
            WHERE id = ? AND state IN ('completed', 'failed', 'cancelled', 'paused')
            "#,
        )
        .bind(job_id.to_i64()?)
        .execute(self.db.pool())
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn list(
        &self,
        state: Option<JobState>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<JobRecord>, u64)> {
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    r#"
                    SELECT id, spec, state, progress, targets, started_at, finished_at,
                           last_error, deleted
                    FROM jobs WHERE deleted = 0 AND state = ?
                    ORDER BY id DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(state.as_str())
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, spec, state, progress, targets, started_at, finished_at,
                           last_error, deleted
                    FROM jobs WHERE deleted = 0
                    ORDER BY id DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let total: i64 = match state {
            Some(state) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE deleted = 0 AND state = ?")
                    .bind(state.as_str())
                    .fetch_one(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE deleted = 0")
                    .fetch_one(self.db.pool())
                    .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let job_id = JobId::try_from(row.get::<i64, _>("id"))?;
            records.push(Self::row_to_record(job_id, row)?);
        }
        Ok((records, total as u64))
    }

    /// Queued / active / paused counts for the queue-status endpoint.
    pub async fn status_counts(&self) -> Result<(u64, u64, u64)> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS n FROM jobs WHERE deleted = 0 GROUP BY state",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut queued = 0u64;
        let mut active = 0u64;
        let mut paused = 0u64;
        for row in rows {
            let n = row.get::<i64, _>("n") as u64;
            match row.get::<String, _>("state").as_str() {
                "queued" => queued += n,
                "running" | "completing" => active += n,
                "paused" => paused += n,
                _ => {}
            }
        }
        Ok((queued, active, paused))
    }

    /// Jobs left `running`/`completing` by a previous process; a restart
    /// parks them back to `paused` so their frontier survives.
    pub async fn park_orphans(&self) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE jobs SET state = 'paused' WHERE state IN ('running', 'completing')",
        )
        .execute(self.db.pool())
        .await?
        .rows_affected();
        if affected > 0 {
            info!(count = affected, "parked orphaned running jobs");
        }
        Ok(affected)
    }

    /// Highest-priority queued job, FIFO within the priority class.
    pub async fn next_queued(&self) -> Result<Option<JobId>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE deleted = 0 AND state = 'queued'
            ORDER BY priority DESC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.db.pool())
        .await?;
        row.map(|r| JobId::try_from(r.get::<i64, _>("id")).map_err(Into::into))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::types::{RetryPolicy, SourceId};

    fn spec(name: &str, priority: Priority) -> JobSpec {
        JobSpec {
            job_id: JobId::default(),
            job_name: name.to_string(),
            sources: vec![SourceId::new("quizpages")],
            max_questions_per_source: 10,
            target_categories: vec![],
            priority,
            retry: RetryPolicy::default(),
            created_at: Utc::now(),
            created_by: None,
        }
    }

    async fn queue() -> JobQueue {
        JobQueue::new(QuarryDb::connect_memory().await.unwrap())
    }

    #[tokio::test]
    async fn insert_assigns_and_stamps_id() {
        let queue = queue().await;
        let id = queue.insert(spec("s1", Priority::Medium)).await.unwrap();
        let record = queue.load(id).await.unwrap().unwrap();
        assert_eq!(record.spec.job_id, id);
        assert_eq!(record.run.state, JobState::Queued);
        assert!(!record.deleted);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let queue = queue().await;
        let id = queue.insert(spec("s1", Priority::Medium)).await.unwrap();

        assert!(queue
            .transition(id, JobState::Queued, JobState::Running)
            .await
            .unwrap());
        // Second writer with a stale expectation loses.
        assert!(!queue
            .transition(id, JobState::Queued, JobState::Running)
            .await
            .unwrap());

        let record = queue.load(id).await.unwrap().unwrap();
        assert_eq!(record.run.state, JobState::Running);
        assert!(record.run.started_at.is_some());
    }

    #[tokio::test]
    async fn priority_orders_the_queue_fifo_within_class() {
        let queue = queue().await;
        let low = queue.insert(spec("low", Priority::Low)).await.unwrap();
        let urgent1 = queue.insert(spec("u1", Priority::Urgent)).await.unwrap();
        let urgent2 = queue.insert(spec("u2", Priority::Urgent)).await.unwrap();

        assert_eq!(queue.next_queued().await.unwrap().unwrap(), urgent1);
        queue
            .transition(urgent1, JobState::Queued, JobState::Running)
            .await
            .unwrap();
        assert_eq!(queue.next_queued().await.unwrap().unwrap(), urgent2);
        queue
            .transition(urgent2, JobState::Queued, JobState::Running)
            .await
            .unwrap();
        assert_eq!(queue.next_queued().await.unwrap().unwrap(), low);
    }

    #[tokio::test]
    async fn soft_delete_requires_terminal_or_paused() {
        let queue = queue().await;
        let id = queue.insert(spec("s1", Priority::Medium)).await.unwrap();
        assert!(!queue.soft_delete(id).await.unwrap());

        queue
            .transition(id, JobState::Queued, JobState::Cancelled)
            .await
            .unwrap();
        assert!(queue.soft_delete(id).await.unwrap());

        let (records, total) = queue.list(None, 0, 10).await.unwrap();
        assert_eq!(total, 0);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn orphaned_running_jobs_are_parked() {
        let queue = queue().await;
        let id = queue.insert(spec("s1", Priority::Medium)).await.unwrap();
        queue
            .transition(id, JobState::Queued, JobState::Running)
            .await
            .unwrap();

        assert_eq!(queue.park_orphans().await.unwrap(), 1);
        let record = queue.load(id).await.unwrap().unwrap();
        assert_eq!(record.run.state, JobState::Paused);
    }
}
