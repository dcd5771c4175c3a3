//! SQLite-backed document store.
//!
//! The store capability the pipeline depends on: upsert, find-by-id,
//! range-scan, counted-aggregate. Documents ride as JSON in a `doc` column
//! with the queryable fields broken out; the job queue's own SQL lives
//! with the engine.

pub mod error;

use chrono::{DateTime, Utc};
use quarry_protocol::events::Event;
use quarry_protocol::types::{
    DuplicateCluster, ProcessedQuestion, SourceConfig, SourceId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

pub use error::DbError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    spec TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    priority INTEGER NOT NULL DEFAULT 1,
    progress TEXT NOT NULL DEFAULT '{}',
    targets TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    last_error TEXT,
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    extract_key TEXT NOT NULL,
    verdict TEXT NOT NULL,
    category TEXT NOT NULL,
    fused_score REAL NOT NULL,
    cluster_id TEXT,
    duplicate INTEGER NOT NULL DEFAULT 0,
    extracted_at TEXT NOT NULL,
    doc TEXT NOT NULL,
    UNIQUE(source_id, target_id, extract_key)
);
CREATE INDEX IF NOT EXISTS idx_questions_verdict ON questions(verdict);
CREATE INDEX IF NOT EXISTS idx_questions_extracted_at ON questions(extracted_at);

CREATE TABLE IF NOT EXISTS clusters (
    id TEXT PRIMARY KEY,
    cross_source INTEGER NOT NULL,
    size INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    sequence INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL,
    kind TEXT NOT NULL,
    job_id INTEGER,
    source_id TEXT,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    state TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sources (
    source_id TEXT PRIMARY KEY,
    reliability REAL NOT NULL,
    version INTEGER NOT NULL,
    doc TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct QuarryDb {
    pool: SqlitePool,
}

impl QuarryDb {
    /// Open (creating if missing) and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DbError::Connect(format!("{url}: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connect(format!("{url}: {e}")))?;

        let db = Self { pool };
        db.init_schema().await?;
        info!(url, "database ready");
        Ok(db)
    }

    /// Private in-memory database for tests.
    pub async fn connect_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::Connect(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    /// Insert a processed question. Returns false when the extract key was
    /// already present for this (source, target), the idempotent-replay
    /// path.
    pub async fn upsert_question(&self, question: &ProcessedQuestion) -> Result<bool, DbError> {
        let doc = serde_json::to_string(question)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO questions
                (id, source_id, target_id, extract_key, verdict, category,
                 fused_score, cluster_id, extracted_at, doc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, target_id, extract_key) DO NOTHING
            "#,
        )
        .bind(question.id.to_string())
        .bind(question.source_id.as_str())
        .bind(&question.target_id)
        .bind(&question.extract_key)
        .bind(question.verdict.as_str())
        .bind(&question.category)
        .bind(question.fused_score)
        .bind(question.cluster_id.as_deref())
        .bind(question.extracted_at.to_rfc3339())
        .bind(doc)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Flag a stored record as a duplicate member of `cluster_id`.
    pub async fn mark_question_duplicate(
        &self,
        id: Uuid,
        cluster_id: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE questions
            SET cluster_id = ?,
                duplicate = 1,
                doc = json_set(doc, '$.cluster_id', ?)
            WHERE id = ?
            "#,
        )
        .bind(cluster_id)
        .bind(cluster_id)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_duplicates_for_source(&self, source_id: &SourceId) -> Result<u64, DbError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM questions WHERE source_id = ? AND duplicate = 1",
        )
        .bind(source_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    pub async fn find_question(&self, id: Uuid) -> Result<Option<ProcessedQuestion>, DbError> {
        let row = sqlx::query("SELECT doc FROM questions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let doc: String = row.get("doc");
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    /// Whether an extract key already produced a stored record.
    pub async fn extract_key_seen(
        &self,
        source_id: &SourceId,
        target_id: &str,
        extract_key: &str,
    ) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM questions WHERE source_id = ? AND target_id = ? AND extract_key = ?",
        )
        .bind(source_id.as_str())
        .bind(target_id)
        .bind(extract_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Range scan by extraction time, oldest first. Rejected records are
    /// retained in storage but excluded from public queries.
    pub async fn scan_questions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
        include_rejected: bool,
    ) -> Result<Vec<ProcessedQuestion>, DbError> {
        let sql = if include_rejected {
            r#"
            SELECT doc FROM questions
            WHERE extracted_at >= ?
            ORDER BY extracted_at ASC LIMIT ?
            "#
        } else {
            r#"
            SELECT doc FROM questions
            WHERE extracted_at >= ? AND verdict != 'auto_reject'
            ORDER BY extracted_at ASC LIMIT ?
            "#
        };
        let rows = sqlx::query(sql)
            .bind(since.to_rfc3339())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).map_err(DbError::from)
            })
            .collect()
    }

    /// Counted aggregate by verdict.
    pub async fn count_by_verdict(&self) -> Result<Vec<(String, u64)>, DbError> {
        let rows = sqlx::query("SELECT verdict, COUNT(*) AS n FROM questions GROUP BY verdict")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("verdict"), row.get::<i64, _>("n") as u64))
            .collect())
    }

    /// Counted aggregate by category, approved records only.
    pub async fn count_by_category(&self) -> Result<Vec<(String, u64)>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS n FROM questions
            WHERE verdict = 'auto_approve'
            GROUP BY category ORDER BY n DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("category"), row.get::<i64, _>("n") as u64))
            .collect())
    }

    pub async fn average_fused_score(&self) -> Result<f64, DbError> {
        let avg: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(fused_score) FROM questions WHERE verdict != 'auto_reject'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(avg.unwrap_or(0.0))
    }

    pub async fn count_by_verdict_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<(String, u64)>, DbError> {
        let rows = sqlx::query(
            "SELECT verdict, COUNT(*) AS n FROM questions WHERE source_id = ? GROUP BY verdict",
        )
        .bind(source_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("verdict"), row.get::<i64, _>("n") as u64))
            .collect())
    }

    // ------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------

    pub async fn upsert_cluster(&self, cluster: &DuplicateCluster) -> Result<(), DbError> {
        let doc = serde_json::to_string(cluster)?;
        sqlx::query(
            r#"
            INSERT INTO clusters (id, cross_source, size, updated_at, doc)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                cross_source = excluded.cross_source,
                size = excluded.size,
                updated_at = excluded.updated_at,
                doc = excluded.doc
            "#,
        )
        .bind(&cluster.cluster_id)
        .bind(cluster.cross_source)
        .bind(cluster.members.len() as i64)
        .bind(cluster.updated_at.to_rfc3339())
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn cross_source_cluster_count(&self) -> Result<u64, DbError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clusters WHERE cross_source = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn cross_source_clusters_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM clusters WHERE cross_source = 1 AND updated_at >= ?",
        )
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    pub async fn top_clusters(&self, limit: u32) -> Result<Vec<DuplicateCluster>, DbError> {
        let rows = sqlx::query(
            "SELECT doc FROM clusters WHERE cross_source = 1 ORDER BY size DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).map_err(DbError::from)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Events (durable tail)
    // ------------------------------------------------------------------

    pub async fn append_event(&self, event: &Event) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO events (sequence, timestamp, kind, job_id, source_id, payload)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(sequence) DO NOTHING
            "#,
        )
        .bind(event.sequence as i64)
        .bind(event.timestamp.to_rfc3339())
        .bind(event.kind.as_str())
        .bind(event.job_id.map(|j| j.as_u64() as i64))
        .bind(event.source_id.as_ref().map(|s| s.as_str().to_string()))
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Historical replay: events with `sequence > since`, in order. This
    /// is the complete record past the in-memory ring.
    pub async fn events_since(&self, since: u64, limit: u32) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, timestamp, kind, job_id, source_id, payload
            FROM events WHERE sequence > ? ORDER BY sequence ASC LIMIT ?
            "#,
        )
        .bind(since as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind_raw: String = row.get("kind");
                let payload_raw: String = row.get("payload");
                let timestamp_raw: String = row.get("timestamp");
                let kind = serde_json::from_value(serde_json::Value::String(kind_raw))
                    .map_err(DbError::from)?;
                Ok(Event {
                    sequence: row.get::<i64, _>("sequence") as u64,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_raw)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    kind,
                    job_id: row
                        .get::<Option<i64>, _>("job_id")
                        .map(|j| quarry_protocol::types::JobId::new(j as u64)),
                    source_id: row
                        .get::<Option<String>, _>("source_id")
                        .map(|s| SourceId::new(&s)),
                    payload: serde_json::from_str(&payload_raw)?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Alerts / sources
    // ------------------------------------------------------------------

    pub async fn upsert_alert(&self, alert: &quarry_protocol::types::Alert) -> Result<(), DbError> {
        let doc = serde_json::to_string(alert)?;
        sqlx::query(
            r#"
            INSERT INTO alerts (id, rule_id, state, opened_at, doc)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET state = excluded.state, doc = excluded.doc
            "#,
        )
        .bind(alert.alert_id.to_string())
        .bind(&alert.rule_id)
        .bind(alert.state.as_str())
        .bind(alert.opened_at.to_rfc3339())
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_source(&self, source: &SourceConfig) -> Result<(), DbError> {
        let doc = serde_json::to_string(source)?;
        sqlx::query(
            r#"
            INSERT INTO sources (source_id, reliability, version, doc)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                reliability = excluded.reliability,
                version = excluded.version,
                doc = excluded.doc
            "#,
        )
        .bind(source.source_id.as_str())
        .bind(source.reliability)
        .bind(source.version)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_sources(&self) -> Result<Vec<SourceConfig>, DbError> {
        let rows = sqlx::query("SELECT doc FROM sources ORDER BY source_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).map_err(DbError::from)
            })
            .collect()
    }

    pub async fn set_source_reliability(
        &self,
        source_id: &SourceId,
        reliability: f64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE sources
            SET reliability = ?,
                doc = json_set(doc, '$.reliability', ?)
            WHERE source_id = ?
            "#,
        )
        .bind(reliability)
        .bind(reliability)
        .bind(source_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::config::seed_sources;
    use quarry_protocol::events::EventKind;
    use quarry_protocol::types::{Difficulty, GateVerdict, QualityReport};

    fn question(source: &str, key: &str, verdict: GateVerdict) -> ProcessedQuestion {
        ProcessedQuestion {
            id: Uuid::new_v4(),
            source_id: SourceId::new(source),
            target_id: "logical".to_string(),
            question_text: format!("question {key}"),
            options: vec!["a".to_string(), "b".to_string()],
            correct_index: 0,
            explanation: None,
            category: "logical".to_string(),
            difficulty: Difficulty::Medium,
            quality: QualityReport::default(),
            fused_score: 80.0,
            verdict,
            embedding: vec![0.1, 0.2],
            cluster_id: None,
            reviewer_notes: Vec::new(),
            extracted_at: Utc::now(),
            extract_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn question_upsert_is_idempotent_by_extract_key() {
        let db = QuarryDb::connect_memory().await.unwrap();
        let q1 = question("quizpages", "k1", GateVerdict::AutoApprove);
        let mut q2 = question("quizpages", "k1", GateVerdict::AutoApprove);
        q2.id = Uuid::new_v4();

        assert!(db.upsert_question(&q1).await.unwrap());
        assert!(!db.upsert_question(&q2).await.unwrap());

        let found = db.find_question(q1.id).await.unwrap().unwrap();
        assert_eq!(found.extract_key, "k1");
        assert!(db
            .extract_key_seen(&SourceId::new("quizpages"), "logical", "k1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rejected_records_are_retained_but_hidden() {
        let db = QuarryDb::connect_memory().await.unwrap();
        db.upsert_question(&question("quizpages", "ok", GateVerdict::AutoApprove))
            .await
            .unwrap();
        db.upsert_question(&question("quizpages", "bad", GateVerdict::AutoReject))
            .await
            .unwrap();

        let public = db
            .scan_questions(Utc::now() - chrono::Duration::hours(1), 100, false)
            .await
            .unwrap();
        assert_eq!(public.len(), 1);

        let all = db
            .scan_questions(Utc::now() - chrono::Duration::hours(1), 100, true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn verdict_counts_aggregate() {
        let db = QuarryDb::connect_memory().await.unwrap();
        for (key, verdict) in [
            ("a", GateVerdict::AutoApprove),
            ("b", GateVerdict::AutoApprove),
            ("c", GateVerdict::AutoReject),
        ] {
            db.upsert_question(&question("quizpages", key, verdict))
                .await
                .unwrap();
        }
        let counts = db.count_by_verdict().await.unwrap();
        let approve = counts.iter().find(|(v, _)| v == "auto_approve").unwrap();
        assert_eq!(approve.1, 2);
    }

    #[tokio::test]
    async fn event_tail_replays_by_sequence() {
        let db = QuarryDb::connect_memory().await.unwrap();
        for seq in 1..=5u64 {
            db.append_event(&Event {
                sequence: seq,
                timestamp: Utc::now(),
                kind: EventKind::QuestionExtracted,
                job_id: Some(quarry_protocol::types::JobId::new(1)),
                source_id: None,
                payload: serde_json::json!({"n": seq}),
            })
            .await
            .unwrap();
        }
        let tail = db.events_since(2, 10).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].sequence, 3);
        assert_eq!(tail[2].sequence, 5);
    }

    #[tokio::test]
    async fn source_reliability_round_trips() {
        let db = QuarryDb::connect_memory().await.unwrap();
        let sources = seed_sources();
        for s in &sources {
            db.upsert_source(s).await.unwrap();
        }
        db.set_source_reliability(&sources[0].source_id, 0.55)
            .await
            .unwrap();
        let loaded = db.load_sources().await.unwrap();
        let updated = loaded
            .iter()
            .find(|s| s.source_id == sources[0].source_id)
            .unwrap();
        assert!((updated.reliability - 0.55).abs() < 1e-9);
    }
}
