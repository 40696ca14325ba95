use sqlx::SqlitePool;
use std::str::FromStr;

use crate::db::models::{Tag, TagWithUsage};
use crate::error::{Result, TrackerError};
use crate::pagination::{to_limit_offset, PageRequest, Paginated};

/// Canonical form of a tag name: surrounding whitespace stripped,
/// lower-cased. Two raw names with the same canonical form are the same tag.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagSort {
    #[default]
    Name,
    UsageCount,
    CreatedAt,
}

impl FromStr for TagSort {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(TagSort::Name),
            "usage_count" => Ok(TagSort::UsageCount),
            "created_at" => Ok(TagSort::CreatedAt),
            other => Err(TrackerError::Request(format!(
                "invalid sort '{}', expected name, usage_count or created_at",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagListFilter {
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
    /// Restrict to tags attached to the requesting user's tasks.
    pub user_only: bool,
    pub sort: TagSort,
}

pub struct TagManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TagManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a tag by canonical name, creating it on first use. The
    /// insert is an upsert against the UNIQUE(name) constraint, so two
    /// concurrent callers converge on a single row.
    pub async fn find_or_create(&self, raw_name: &str) -> Result<Tag> {
        let name = normalize(raw_name);
        if name.is_empty() {
            return Err(TrackerError::validation("Name can't be blank"));
        }

        sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(&name)
            .execute(self.pool)
            .await?;

        let tag = sqlx::query_as::<_, Tag>(
            "SELECT id, name, created_at FROM tags WHERE name = ?",
        )
        .bind(&name)
        .fetch_one(self.pool)
        .await?;

        Ok(tag)
    }

    /// Tags are global; lookup is not ownership-scoped.
    pub async fn get_tag(&self, id: i64) -> Result<Tag> {
        sqlx::query_as::<_, Tag>("SELECT id, name, created_at FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(TrackerError::not_found("Tag", id))
    }

    pub async fn get_tag_with_usage(&self, id: i64) -> Result<TagWithUsage> {
        sqlx::query_as::<_, TagWithUsage>(
            r#"
            SELECT t.id, t.name, t.created_at, COUNT(tt.id) AS usage_count
            FROM tags t
            LEFT JOIN task_tags tt ON tt.tag_id = t.id
            WHERE t.id = ?
            GROUP BY t.id
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("Tag", id))
    }

    /// Rename a tag; the new name is normalized and must stay unique.
    pub async fn rename_tag(&self, id: i64, raw_name: &str) -> Result<Tag> {
        self.get_tag(id).await?;

        let name = normalize(raw_name);
        if name.is_empty() {
            return Err(TrackerError::validation("Name can't be blank"));
        }

        match sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(id)
            .execute(self.pool)
            .await
        {
            Ok(_) => {},
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(TrackerError::validation("Name has already been taken"));
            },
            Err(e) => return Err(e.into()),
        }

        self.get_tag(id).await
    }

    /// Replace a task's tag set with exactly the given names: each name is
    /// normalized and find-or-created, existing assignments are dropped.
    pub async fn assign_tags(
        &self,
        user_id: i64,
        task_id: i64,
        tag_names: &[String],
    ) -> Result<Vec<Tag>> {
        self.check_task_owned(user_id, task_id).await?;

        // Dedup after normalization, keeping first-occurrence order.
        let mut tags: Vec<Tag> = Vec::new();
        for raw in tag_names {
            let tag = self.find_or_create(raw).await?;
            if !tags.iter().any(|t| t.id == tag.id) {
                tags.push(tag);
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM task_tags WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        for tag in &tags {
            sqlx::query("INSERT INTO task_tags (task_id, tag_id) VALUES (?, ?)")
                .bind(task_id)
                .bind(tag.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(task_id, user_id, count = tags.len(), "tags assigned");
        Ok(tags)
    }

    /// Remove only the named associations; other tags stay attached.
    pub async fn remove_tags(&self, user_id: i64, task_id: i64, tag_ids: &[i64]) -> Result<()> {
        self.check_task_owned(user_id, task_id).await?;

        if tag_ids.is_empty() {
            return Ok(());
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("DELETE FROM task_tags WHERE task_id = ");
        builder.push_bind(task_id);
        builder.push(" AND tag_id IN (");
        let mut separated = builder.separated(", ");
        for id in tag_ids {
            separated.push_bind(*id);
        }
        builder.push(")");

        builder.build().execute(self.pool).await?;
        Ok(())
    }

    pub async fn tags_for_task(&self, user_id: i64, task_id: i64) -> Result<Vec<Tag>> {
        self.check_task_owned(user_id, task_id).await?;

        let tags = sqlx::query_as::<_, Tag>(
            r#"
            SELECT t.id, t.name, t.created_at
            FROM tags t
            JOIN task_tags tt ON tt.tag_id = t.id
            WHERE tt.task_id = ?
            ORDER BY t.name ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(self.pool)
        .await?;

        Ok(tags)
    }

    /// Delete a tag, refused while any task still references it.
    pub async fn delete_tag(&self, id: i64) -> Result<()> {
        self.get_tag(id).await?;

        let references: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_tags WHERE tag_id = ?")
            .bind(id)
            .fetch_one(self.pool)
            .await?;

        if references > 0 {
            return Err(TrackerError::Conflict(
                "Cannot delete tag that is assigned to tasks. Please remove all task assignments first."
                    .to_string(),
            ));
        }

        sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Searchable, sortable tag listing. Usage-count order breaks ties in
    /// whatever order SQLite returns the grouped rows; callers must not
    /// rely on it.
    pub async fn list_tags(
        &self,
        user_id: i64,
        filter: &TagListFilter,
        page: PageRequest,
    ) -> Result<Paginated<Tag>> {
        let (page_num, per_page) = page.resolve()?;
        let (limit, offset) = to_limit_offset(page_num, per_page);

        let needle = filter
            .search
            .as_deref()
            .map(|s| format!("%{}%", s.trim().to_lowercase()));

        // One join path feeds both the filter and the usage count. Under
        // user_only the task_tags rows are restricted to the user's tasks,
        // so COUNT(tt.id) is the user-scoped usage; otherwise the LEFT
        // JOIN keeps unreferenced tags and counts globally.
        let apply_filters = |builder: &mut sqlx::QueryBuilder<sqlx::Sqlite>| {
            if filter.user_only {
                builder
                    .push(
                        " JOIN task_tags tt ON tt.tag_id = t.id \
                         JOIN tasks ut ON ut.id = tt.task_id AND ut.user_id = ",
                    )
                    .push_bind(user_id);
            } else {
                builder.push(" LEFT JOIN task_tags tt ON tt.tag_id = t.id");
            }
            if let Some(ref pattern) = needle {
                // Names are stored lower-cased, so a lower-cased LIKE
                // pattern gives case-insensitive matching.
                builder.push(" WHERE t.name LIKE ").push_bind(pattern.clone());
            }
        };

        let mut count_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT COUNT(DISTINCT t.id) FROM tags t");
        apply_filters(&mut count_builder);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT t.id, t.name, t.created_at FROM tags t");
        apply_filters(&mut builder);
        builder.push(" GROUP BY t.id");
        match filter.sort {
            TagSort::Name => builder.push(" ORDER BY t.name ASC"),
            TagSort::UsageCount => builder.push(" ORDER BY COUNT(tt.id) DESC"),
            TagSort::CreatedAt => builder.push(" ORDER BY t.created_at DESC, t.id DESC"),
        };
        builder
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let tags = builder.build_query_as::<Tag>().fetch_all(self.pool).await?;

        Ok(Paginated::new(tags, page_num, per_page, total))
    }

    async fn check_task_owned(&self, user_id: i64, task_id: i64) -> Result<()> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM tasks WHERE id = ? AND user_id = ?")
                .bind(task_id)
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;

        exists
            .map(|_| ())
            .ok_or(TrackerError::not_found("Task", task_id))
    }
}
