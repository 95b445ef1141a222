use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::Result;
use crate::types::SessionTask;

/// A task a worker is currently holding. Must be `ack`ed once the worker
/// has published a terminal event for the session.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task_id: String,
    pub task: SessionTask,
}

/// SQLite-backed FIFO shared between the HTTP entry point and the worker
/// pool. A single connection behind a mutex serialises access, which is
/// what makes `claim` race-free.
pub struct TaskQueue {
    conn: Arc<Mutex<Connection>>,
}

impl TaskQueue {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory queue, used by tests and by `--ephemeral` deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append a task. The trace id rides in its own column so consumers
    /// can restore the producer's span without parsing the payload.
    pub fn enqueue(&self, task: &SessionTask) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(task)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tasks (id, payload, trace_id, status, enqueued_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![task_id, payload, task.trace_id, task.enqueued_at],
        )?;
        info!(task_id = %task_id, session_id = %task.session_id, "task enqueued");
        Ok(task_id)
    }

    /// Claim the oldest pending task for `worker_id`, or `None` when the
    /// queue is empty. The row stays in the table until `ack`.
    pub fn claim(&self, worker_id: &str) -> Result<Option<ClaimedTask>> {
        let conn = self.lock();

        let row: Option<(String, String)> = match conn.query_row(
            "SELECT id, payload FROM tasks
             WHERE status = 'pending'
             ORDER BY seq LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(r) => Some(r),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((task_id, payload)) = row else {
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET status = 'claimed', claimed_by = ?1, claimed_at = ?2
             WHERE id = ?3",
            rusqlite::params![worker_id, now, task_id],
        )?;

        let task: SessionTask = serde_json::from_str(&payload)?;
        debug!(task_id = %task_id, worker_id, "task claimed");
        Ok(Some(ClaimedTask { task_id, task }))
    }

    /// Remove an acknowledged task. Safe to call twice.
    pub fn ack(&self, task_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        if n > 0 {
            debug!(task_id, "task acknowledged");
        }
        Ok(())
    }

    /// Return claims older than `max_age` to pending (at-least-once: the
    /// worker died or lost the session before acking).
    pub fn requeue_stale(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default())
            .to_rfc3339();
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE tasks SET status = 'pending', claimed_by = NULL, claimed_at = NULL
             WHERE status = 'claimed' AND claimed_at <= ?1",
            [cutoff],
        )?;
        if n > 0 {
            warn!(requeued = n, "stale claims returned to the queue");
        }
        Ok(n)
    }

    /// Number of tasks waiting for a worker.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(session_id: &str) -> SessionTask {
        SessionTask {
            session_id: session_id.to_string(),
            alias: "agent".to_string(),
            user_query: "q".to_string(),
            reasoning_mode: None,
            client_system_instruction: None,
            client_manifests: Vec::new(),
            safety_flags: Vec::new(),
            enqueued_at: Utc::now().to_rfc3339(),
            trace_id: "trace-1".to_string(),
        }
    }

    #[test]
    fn claims_are_fifo() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue(&task("s1")).unwrap();
        q.enqueue(&task("s2")).unwrap();
        q.enqueue(&task("s3")).unwrap();

        assert_eq!(q.claim("w1").unwrap().unwrap().task.session_id, "s1");
        assert_eq!(q.claim("w1").unwrap().unwrap().task.session_id, "s2");
        assert_eq!(q.claim("w2").unwrap().unwrap().task.session_id, "s3");
        assert!(q.claim("w1").unwrap().is_none());
    }

    #[test]
    fn claimed_tasks_survive_until_ack() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue(&task("s1")).unwrap();

        let claimed = q.claim("w1").unwrap().unwrap();
        assert_eq!(q.pending_count().unwrap(), 0);

        // not acked yet: a stale-claim sweep brings it back
        assert_eq!(q.requeue_stale(Duration::ZERO).unwrap(), 1);
        assert_eq!(q.pending_count().unwrap(), 1);

        let reclaimed = q.claim("w2").unwrap().unwrap();
        assert_eq!(reclaimed.task.session_id, "s1");
        q.ack(&reclaimed.task_id).unwrap();
        assert_eq!(q.requeue_stale(Duration::ZERO).unwrap(), 0);
        assert!(q.claim("w1").unwrap().is_none());

        // double-ack is harmless
        q.ack(&claimed.task_id).unwrap();
    }

    #[test]
    fn trace_id_round_trips_through_the_payload() {
        let q = TaskQueue::open_in_memory().unwrap();
        let mut t = task("s1");
        t.trace_id = "trace-abc".to_string();
        q.enqueue(&t).unwrap();

        let claimed = q.claim("w1").unwrap().unwrap();
        assert_eq!(claimed.task.trace_id, "trace-abc");
    }

    #[test]
    fn fresh_claims_are_not_requeued() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue(&task("s1")).unwrap();
        q.claim("w1").unwrap().unwrap();
        assert_eq!(q.requeue_stale(Duration::from_secs(3600)).unwrap(), 0);
    }
}
