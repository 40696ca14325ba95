//! Shared fixtures for unit tests. Each `TestContext` owns a temporary
//! directory holding a freshly migrated database, dropped with the context.

pub mod test_helpers {
    use chrono::{DateTime, Utc};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    use crate::db::models::{FocusSession, Project, Task, User};
    use crate::db::{create_pool, run_migrations};

    pub struct TestContext {
        pool: SqlitePool,
        _dir: TempDir,
    }

    impl TestContext {
        pub async fn new() -> Self {
            let dir = TempDir::new().expect("create temp dir");
            let db_path = dir.path().join("test.db");
            let pool = create_pool(&db_path).await.expect("create pool");
            run_migrations(&pool).await.expect("run migrations");
            Self { pool, _dir: dir }
        }

        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }
    }

    pub async fn seed_user(pool: &SqlitePool) -> User {
        crate::users::UserManager::new(pool)
            .create_user("test@example.com", "Test", "User")
            .await
            .expect("seed user")
    }

    pub async fn seed_user_with_project(pool: &SqlitePool) -> (User, Project) {
        let user = seed_user(pool).await;
        let project = crate::projects::ProjectManager::new(pool)
            .create_project(user.id, "Test Project", None)
            .await
            .expect("seed project");
        (user, project)
    }

    /// Insert a task directly, bypassing manager validation, so tests can
    /// seed any status/priority combination in one call. The due date is
    /// far enough out that the task trips no due-date predicate.
    pub async fn seed_task(
        pool: &SqlitePool,
        user_id: i64,
        project_id: i64,
        title: &str,
        status: &str,
        priority: &str,
    ) -> Task {
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (project_id, user_id, title, status, priority, due_date)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(title)
        .bind(status)
        .bind(priority)
        .bind(Utc::now() + chrono::Duration::days(30))
        .execute(pool)
        .await
        .expect("seed task")
        .last_insert_rowid();

        sqlx::query_as::<_, Task>(
            r#"
            SELECT id, project_id, user_id, title, description, status, priority,
                   estimated_minutes, due_date, created_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("fetch seeded task")
    }

    /// Insert a focus session with a chosen start time. `ended` carries the
    /// end timestamp and duration for a stopped session, `None` leaves it
    /// active.
    pub async fn seed_session(
        pool: &SqlitePool,
        user_id: i64,
        task_id: i64,
        started_at: DateTime<Utc>,
        ended: Option<(DateTime<Utc>, i64)>,
    ) -> FocusSession {
        let (ended_at, duration_minutes) = match ended {
            Some((at, minutes)) => (Some(at), Some(minutes)),
            None => (None, None),
        };

        let id = sqlx::query(
            r#"
            INSERT INTO focus_sessions (user_id, task_id, started_at, ended_at, duration_minutes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(task_id)
        .bind(started_at)
        .bind(ended_at)
        .bind(duration_minutes)
        .execute(pool)
        .await
        .expect("seed session")
        .last_insert_rowid();

        sqlx::query_as::<_, FocusSession>(
            r#"
            SELECT id, user_id, task_id, started_at, ended_at, duration_minutes, notes, created_at
            FROM focus_sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("fetch seeded session")
    }
}
