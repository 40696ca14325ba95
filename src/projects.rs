use sqlx::SqlitePool;

use crate::db::models::Project;
use crate::error::{Result, TrackerError};
use crate::pagination::{to_limit_offset, PageRequest, Paginated};

pub struct ProjectManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProjectManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a project. Names are unique per owner, case-sensitive.
    pub async fn create_project(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(TrackerError::validation("Name can't be blank"));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO projects (user_id, name, description)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(description)
        .execute(self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(TrackerError::validation("Name has already been taken"));
            },
            Err(e) => return Err(e.into()),
        };

        let project = self.get_project(user_id, result.last_insert_rowid()).await?;
        tracing::debug!(project_id = project.id, user_id, "project created");
        Ok(project)
    }

    /// Owner-scoped lookup: a project belonging to someone else is
    /// indistinguishable from a missing one.
    pub async fn get_project(&self, user_id: i64, id: i64) -> Result<Project> {
        sqlx::query_as::<_, Project>(
            r#"
            SELECT id, user_id, name, description, created_at
            FROM projects
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("Project", id))
    }

    pub async fn update_project(
        &self,
        user_id: i64,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let project = self.get_project(user_id, id).await?;

        if let Some(n) = name {
            if n.trim().is_empty() {
                return Err(TrackerError::validation("Name can't be blank"));
            }
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE projects SET ");
        let mut has_updates = false;

        if let Some(n) = name {
            builder.push("name = ").push_bind(n);
            has_updates = true;
        }

        if let Some(d) = description {
            if has_updates {
                builder.push(", ");
            }
            builder.push("description = ").push_bind(d);
            has_updates = true;
        }

        if !has_updates {
            return Ok(project);
        }

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id);

        match builder.build().execute(self.pool).await {
            Ok(_) => {},
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(TrackerError::validation("Name has already been taken"));
            },
            Err(e) => return Err(e.into()),
        }

        self.get_project(user_id, id).await
    }

    /// Delete a project and, via foreign-key cascade, its tasks, their tag
    /// assignments and their focus sessions.
    pub async fn delete_project(&self, user_id: i64, id: i64) -> Result<()> {
        self.get_project(user_id, id).await?;

        sqlx::query("DELETE FROM projects WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;

        tracing::debug!(project_id = id, user_id, "project deleted");
        Ok(())
    }

    /// Newest-first listing of a user's projects.
    pub async fn list_projects(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Paginated<Project>> {
        let (page_num, per_page) = page.resolve()?;
        let (limit, offset) = to_limit_offset(page_num, per_page);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool)
            .await?;

        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, user_id, name, description, created_at
            FROM projects
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(Paginated::new(projects, page_num, per_page, total))
    }
}
