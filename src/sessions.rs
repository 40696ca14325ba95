use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::db::models::FocusSession;
use crate::error::{Result, TrackerError};
use crate::pagination::{to_limit_offset, PageRequest, Paginated};
use crate::time_utils::range_bounds;

/// What to do when a start is requested while another session is active.
/// The tracker historically allowed overlapping sessions, so that is the
/// default; strict single-session tracking is opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPolicy {
    #[default]
    AllowConcurrent,
    RejectWhileActive,
}

/// Listing filter on session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
}

impl FromStr for SessionState {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionState::Active),
            "completed" => Ok(SessionState::Completed),
            other => Err(TrackerError::Request(format!(
                "invalid session status '{}', expected active or completed",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub task_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub state: Option<SessionState>,
}

/// Partial edit of an existing session. `started_at`/`ended_at` edits are
/// checked against the interval invariant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPatch<'p> {
    pub notes: Option<&'p str>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub struct FocusSessionManager<'a> {
    pool: &'a SqlitePool,
    start_policy: StartPolicy,
}

impl<'a> FocusSessionManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            start_policy: StartPolicy::default(),
        }
    }

    pub fn with_policy(pool: &'a SqlitePool, start_policy: StartPolicy) -> Self {
        Self { pool, start_policy }
    }

    /// Start a timed session against one of the user's tasks.
    pub async fn start_session(
        &self,
        user_id: i64,
        task_id: i64,
        notes: Option<&str>,
    ) -> Result<FocusSession> {
        // Task must belong to the requesting user.
        let owned: Option<i64> =
            sqlx::query_scalar("SELECT id FROM tasks WHERE id = ? AND user_id = ?")
                .bind(task_id)
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;
        if owned.is_none() {
            return Err(TrackerError::not_found("Task", task_id));
        }

        if self.start_policy == StartPolicy::RejectWhileActive {
            if let Some(active) = self.current_session(user_id).await? {
                return Err(TrackerError::Conflict(format!(
                    "A focus session is already active (id {})",
                    active.id
                )));
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO focus_sessions (user_id, task_id, started_at, notes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(task_id)
        .bind(Utc::now())
        .bind(notes)
        .execute(self.pool)
        .await?;

        let session = self.get_session(user_id, result.last_insert_rowid()).await?;
        tracing::debug!(session_id = session.id, task_id, user_id, "focus session started");
        Ok(session)
    }

    /// Stop an active session: set `ended_at`, derive `duration_minutes`
    /// (rounded to the nearest minute) and add it to the owner's
    /// `total_focus_time`, all in one transaction. A session that is
    /// already stopped stays untouched and the counter is never
    /// incremented twice; the guarded UPDATE serializes concurrent stops.
    pub async fn stop_session(&self, user_id: i64, id: i64) -> Result<FocusSession> {
        let session = self.get_session(user_id, id).await?;

        if session.ended_at.is_some() {
            return Err(TrackerError::Conflict(
                "Focus session already ended".to_string(),
            ));
        }

        let ended_at = Utc::now();
        let seconds = (ended_at - session.started_at).num_seconds();
        let duration_minutes = (seconds as f64 / 60.0).round() as i64;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE focus_sessions
            SET ended_at = ?, duration_minutes = ?
            WHERE id = ? AND user_id = ? AND ended_at IS NULL
            "#,
        )
        .bind(ended_at)
        .bind(duration_minutes)
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Lost the race against another stop call.
            return Err(TrackerError::Conflict(
                "Focus session already ended".to_string(),
            ));
        }

        sqlx::query("UPDATE users SET total_focus_time = total_focus_time + ? WHERE id = ?")
            .bind(duration_minutes)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(session_id = id, user_id, duration_minutes, "focus session stopped");
        self.get_session(user_id, id).await
    }

    pub async fn get_session(&self, user_id: i64, id: i64) -> Result<FocusSession> {
        sqlx::query_as::<_, FocusSession>(
            r#"
            SELECT id, user_id, task_id, started_at, ended_at, duration_minutes, notes, created_at
            FROM focus_sessions
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("Focus session", id))
    }

    /// The user's active session, newest first. Nothing prevents several
    /// sessions from being active under `AllowConcurrent`; this picks the
    /// most recently started one.
    pub async fn current_session(&self, user_id: i64) -> Result<Option<FocusSession>> {
        let session = sqlx::query_as::<_, FocusSession>(
            r#"
            SELECT id, user_id, task_id, started_at, ended_at, duration_minutes, notes, created_at
            FROM focus_sessions
            WHERE user_id = ? AND ended_at IS NULL
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(session)
    }

    /// Manual edit of notes or interval bounds. The merged interval must
    /// still satisfy `started_at <= ended_at`; `duration_minutes` is not
    /// recomputed here.
    pub async fn update_session(
        &self,
        user_id: i64,
        id: i64,
        patch: SessionPatch<'_>,
    ) -> Result<FocusSession> {
        let session = self.get_session(user_id, id).await?;

        let started_at = patch.started_at.unwrap_or(session.started_at);
        let ended_at = patch.ended_at.or(session.ended_at);
        if let Some(end) = ended_at {
            if started_at > end {
                return Err(TrackerError::validation(
                    "Ended at must be after started at",
                ));
            }
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE focus_sessions SET ");
        let mut has_updates = false;

        if let Some(notes) = patch.notes {
            builder.push("notes = ").push_bind(notes.to_string());
            has_updates = true;
        }
        if let Some(start) = patch.started_at {
            if has_updates {
                builder.push(", ");
            }
            builder.push("started_at = ").push_bind(start);
            has_updates = true;
        }
        if let Some(end) = patch.ended_at {
            if has_updates {
                builder.push(", ");
            }
            builder.push("ended_at = ").push_bind(end);
            has_updates = true;
        }

        if !has_updates {
            return Ok(session);
        }

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id);

        builder.build().execute(self.pool).await?;

        self.get_session(user_id, id).await
    }

    pub async fn delete_session(&self, user_id: i64, id: i64) -> Result<()> {
        self.get_session(user_id, id).await?;

        sqlx::query("DELETE FROM focus_sessions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Filtered listing ordered by start time, newest first.
    pub async fn list_sessions(
        &self,
        user_id: i64,
        filter: SessionFilter,
        page: PageRequest,
    ) -> Result<Paginated<FocusSession>> {
        let (page_num, per_page) = page.resolve()?;
        let (limit, offset) = to_limit_offset(page_num, per_page);

        let apply_filters = |builder: &mut sqlx::QueryBuilder<sqlx::Sqlite>| {
            builder.push(" WHERE user_id = ").push_bind(user_id);

            if let Some(task_id) = filter.task_id {
                builder.push(" AND task_id = ").push_bind(task_id);
            }
            if let Some(start) = filter.start_date {
                let (start_dt, _) = range_bounds(start, start);
                builder.push(" AND started_at >= ").push_bind(start_dt);
            }
            if let Some(end) = filter.end_date {
                let (_, end_dt) = range_bounds(end, end);
                builder.push(" AND started_at <= ").push_bind(end_dt);
            }
            match filter.state {
                Some(SessionState::Active) => {
                    builder.push(" AND ended_at IS NULL");
                },
                Some(SessionState::Completed) => {
                    builder.push(" AND ended_at IS NOT NULL");
                },
                None => {},
            }
        };

        let mut count_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM focus_sessions");
        apply_filters(&mut count_builder);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT id, user_id, task_id, started_at, ended_at, duration_minutes, notes, \
             created_at FROM focus_sessions",
        );
        apply_filters(&mut builder);
        builder
            .push(" ORDER BY started_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let sessions = builder
            .build_query_as::<FocusSession>()
            .fetch_all(self.pool)
            .await?;

        Ok(Paginated::new(sessions, page_num, per_page, total))
    }
}
