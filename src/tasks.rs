use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::db::models::{Task, TaskPriority, TaskStatus};
use crate::error::{Result, TrackerError};
use crate::pagination::{to_limit_offset, PageRequest, Paginated};
use crate::time_utils::{day_bounds, week_bounds};

/// Due-date classification of a single task at a reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueClassification {
    Overdue,
    DueToday,
    DueThisWeek,
    None,
}

/// Due-date predicate selectable by listing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueFilter {
    Overdue,
    DueToday,
    DueThisWeek,
}

impl FromStr for DueFilter {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overdue" => Ok(DueFilter::Overdue),
            "due_today" => Ok(DueFilter::DueToday),
            "due_this_week" => Ok(DueFilter::DueThisWeek),
            other => Err(TrackerError::Request(format!(
                "invalid due_type '{}', expected overdue, due_today or due_this_week",
                other
            ))),
        }
    }
}

/// Past due date and not completed. Cancelled, pending and in-progress
/// tasks all go overdue.
pub fn is_overdue(task: &Task, reference: DateTime<Utc>) -> bool {
    task.due_date < reference && task.status != TaskStatus::Completed
}

/// Due within the reference day, regardless of status.
pub fn is_due_today(task: &Task, reference: DateTime<Utc>) -> bool {
    let (start, end) = day_bounds(reference);
    task.due_date >= start && task.due_date <= end
}

/// Due within the reference ISO week, regardless of status.
pub fn is_due_this_week(task: &Task, reference: DateTime<Utc>) -> bool {
    let (start, end) = week_bounds(reference);
    task.due_date >= start && task.due_date <= end
}

/// Collapse the independent predicates into a single label, most urgent
/// first. The predicates themselves are not mutually exclusive; filtering
/// always evaluates them individually.
pub fn classify_by_due(task: &Task, reference: DateTime<Utc>) -> DueClassification {
    if is_overdue(task, reference) {
        DueClassification::Overdue
    } else if is_due_today(task, reference) {
        DueClassification::DueToday
    } else if is_due_this_week(task, reference) {
        DueClassification::DueThisWeek
    } else {
        DueClassification::None
    }
}

/// Input for task creation. Status and priority arrive as raw strings and
/// are parsed against the closed enum sets.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Defaults to `pending` when absent.
    pub status: Option<String>,
    pub priority: Option<String>,
    pub estimated_minutes: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Partial update; only provided fields are touched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub estimated_minutes: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub project_id: Option<i64>,
}

/// Conjunctive listing filters; every provided predicate must hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<i64>,
    pub due: Option<DueFilter>,
}

pub struct TaskManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TaskManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_task(&self, user_id: i64, new_task: NewTask) -> Result<Task> {
        let mut errors = Vec::new();

        if new_task.title.trim().is_empty() {
            errors.push("Title can't be blank".to_string());
        }

        let status = match new_task.status.as_deref() {
            None => Some(TaskStatus::Pending),
            Some(raw) => match raw.parse::<TaskStatus>() {
                Ok(s) => Some(s),
                Err(TrackerError::Validation(mut msgs)) => {
                    errors.append(&mut msgs);
                    None
                },
                Err(e) => return Err(e),
            },
        };

        let priority = match new_task.priority.as_deref() {
            None => {
                errors.push("Priority can't be blank".to_string());
                None
            },
            Some(raw) => match raw.parse::<TaskPriority>() {
                Ok(p) => Some(p),
                Err(TrackerError::Validation(mut msgs)) => {
                    errors.append(&mut msgs);
                    None
                },
                Err(e) => return Err(e),
            },
        };

        if new_task.due_date.is_none() {
            errors.push("Due date can't be blank".to_string());
        }

        if let Some(minutes) = new_task.estimated_minutes {
            if minutes < 0 {
                errors.push("Estimated minutes must be greater than or equal to 0".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(TrackerError::Validation(errors));
        }

        // Project must exist and belong to the creator.
        self.check_project_owned(user_id, new_task.project_id)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (project_id, user_id, title, description, status, priority, estimated_minutes, due_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_task.project_id)
        .bind(user_id)
        .bind(&new_task.title)
        .bind(&new_task.description)
        .bind(status.unwrap())
        .bind(priority.unwrap())
        .bind(new_task.estimated_minutes)
        .bind(new_task.due_date.unwrap())
        .execute(self.pool)
        .await?;

        let task = self.get_task(user_id, result.last_insert_rowid()).await?;
        tracing::debug!(task_id = task.id, user_id, "task created");
        Ok(task)
    }

    /// Owner-scoped lookup; another user's task reads as missing.
    pub async fn get_task(&self, user_id: i64, id: i64) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT id, project_id, user_id, title, description, status, priority,
                   estimated_minutes, due_date, created_at
            FROM tasks
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("Task", id))
    }

    pub async fn update_task(&self, user_id: i64, id: i64, patch: TaskPatch) -> Result<Task> {
        let task = self.get_task(user_id, id).await?;

        let mut errors = Vec::new();

        if let Some(ref title) = patch.title {
            if title.trim().is_empty() {
                errors.push("Title can't be blank".to_string());
            }
        }

        let status = match patch.status.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<TaskStatus>() {
                Ok(s) => Some(s),
                Err(TrackerError::Validation(mut msgs)) => {
                    errors.append(&mut msgs);
                    None
                },
                Err(e) => return Err(e),
            },
        };

        let priority = match patch.priority.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<TaskPriority>() {
                Ok(p) => Some(p),
                Err(TrackerError::Validation(mut msgs)) => {
                    errors.append(&mut msgs);
                    None
                },
                Err(e) => return Err(e),
            },
        };

        if let Some(minutes) = patch.estimated_minutes {
            if minutes < 0 {
                errors.push("Estimated minutes must be greater than or equal to 0".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(TrackerError::Validation(errors));
        }

        if let Some(project_id) = patch.project_id {
            self.check_project_owned(user_id, project_id).await?;
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE tasks SET ");
        let mut has_updates = false;

        let push_sep = |builder: &mut sqlx::QueryBuilder<sqlx::Sqlite>,
                        has_updates: &mut bool| {
            if *has_updates {
                builder.push(", ");
            }
            *has_updates = true;
        };

        if let Some(ref title) = patch.title {
            push_sep(&mut builder, &mut has_updates);
            builder.push("title = ").push_bind(title.clone());
        }
        if let Some(ref description) = patch.description {
            push_sep(&mut builder, &mut has_updates);
            builder.push("description = ").push_bind(description.clone());
        }
        if let Some(s) = status {
            push_sep(&mut builder, &mut has_updates);
            builder.push("status = ").push_bind(s);
        }
        if let Some(p) = priority {
            push_sep(&mut builder, &mut has_updates);
            builder.push("priority = ").push_bind(p);
        }
        if let Some(minutes) = patch.estimated_minutes {
            push_sep(&mut builder, &mut has_updates);
            builder.push("estimated_minutes = ").push_bind(minutes);
        }
        if let Some(due) = patch.due_date {
            push_sep(&mut builder, &mut has_updates);
            builder.push("due_date = ").push_bind(due);
        }
        if let Some(project_id) = patch.project_id {
            push_sep(&mut builder, &mut has_updates);
            builder.push("project_id = ").push_bind(project_id);
        }

        if !has_updates {
            return Ok(task);
        }

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id);

        builder.build().execute(self.pool).await?;

        self.get_task(user_id, id).await
    }

    /// Delete a task; tag assignments and focus sessions cascade away.
    pub async fn delete_task(&self, user_id: i64, id: i64) -> Result<()> {
        self.get_task(user_id, id).await?;

        sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;

        tracing::debug!(task_id = id, user_id, "task deleted");
        Ok(())
    }

    /// Filtered, newest-first, paginated listing. Filters are applied
    /// conjunctively, before pagination.
    pub async fn list_tasks(
        &self,
        user_id: i64,
        filter: TaskFilter,
        page: PageRequest,
    ) -> Result<Paginated<Task>> {
        let (page_num, per_page) = page.resolve()?;
        let (limit, offset) = to_limit_offset(page_num, per_page);
        let now = Utc::now();

        let apply_filters = |builder: &mut sqlx::QueryBuilder<sqlx::Sqlite>| {
            builder.push(" WHERE user_id = ").push_bind(user_id);

            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status);
            }
            if let Some(project_id) = filter.project_id {
                builder.push(" AND project_id = ").push_bind(project_id);
            }
            match filter.due {
                Some(DueFilter::Overdue) => {
                    builder
                        .push(" AND due_date < ")
                        .push_bind(now)
                        .push(" AND status != ")
                        .push_bind(TaskStatus::Completed);
                },
                Some(DueFilter::DueToday) => {
                    let (start, end) = day_bounds(now);
                    builder
                        .push(" AND due_date >= ")
                        .push_bind(start)
                        .push(" AND due_date <= ")
                        .push_bind(end);
                },
                Some(DueFilter::DueThisWeek) => {
                    let (start, end) = week_bounds(now);
                    builder
                        .push(" AND due_date >= ")
                        .push_bind(start)
                        .push(" AND due_date <= ")
                        .push_bind(end);
                },
                None => {},
            }
        };

        let mut count_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM tasks");
        apply_filters(&mut count_builder);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT id, project_id, user_id, title, description, status, priority, \
             estimated_minutes, due_date, created_at FROM tasks",
        );
        apply_filters(&mut builder);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let tasks = builder
            .build_query_as::<Task>()
            .fetch_all(self.pool)
            .await?;

        Ok(Paginated::new(tasks, page_num, per_page, total))
    }

    async fn check_project_owned(&self, user_id: i64, project_id: i64) -> Result<()> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM projects WHERE id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;

        exists
            .map(|_| ())
            .ok_or(TrackerError::not_found("Project", project_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{seed_task, seed_user_with_project, TestContext};
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_task_defaults_to_pending() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());

        let task = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "Write draft".to_string(),
                    priority: Some("high".to_string()),
                    due_date: Some(Utc::now() + Duration::days(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn test_create_task_collects_all_validation_errors() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());

        let result = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "".to_string(),
                    status: Some("archived".to_string()),
                    priority: None,
                    estimated_minutes: Some(-5),
                    due_date: None,
                    ..Default::default()
                },
            )
            .await;

        match result {
            Err(TrackerError::Validation(messages)) => {
                assert_eq!(messages.len(), 5);
                assert!(messages.iter().any(|m| m.contains("Title")));
                assert!(messages.iter().any(|m| m.contains("'archived'")));
                assert!(messages.iter().any(|m| m.contains("Priority")));
                assert!(messages.iter().any(|m| m.contains("Due date")));
                assert!(messages.iter().any(|m| m.contains("Estimated minutes")));
            },
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_priority() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let task = seed_task(ctx.pool(), user.id, project.id, "T", "pending", "low").await;

        let result = mgr
            .update_task(
                user.id,
                task.id,
                TaskPatch {
                    priority: Some("critical".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(TrackerError::Validation(_))));

        // nothing was written
        let unchanged = mgr.get_task(user.id, task.id).await.unwrap();
        assert_eq!(unchanged.priority, TaskPriority::Low);
    }

    #[tokio::test]
    async fn test_update_touches_only_provided_fields() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let task = seed_task(ctx.pool(), user.id, project.id, "T", "pending", "low").await;

        let updated = mgr
            .update_task(
                user.id,
                task.id,
                TaskPatch {
                    status: Some("in_progress".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.title, "T");
        assert_eq!(updated.priority, TaskPriority::Low);
    }

    #[tokio::test]
    async fn test_classify_by_due() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let now = Utc::now();

        let overdue = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "Late".to_string(),
                    priority: Some("low".to_string()),
                    due_date: Some(now - Duration::days(10)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(classify_by_due(&overdue, now), DueClassification::Overdue);
        assert!(is_overdue(&overdue, now));

        // completed tasks never count as overdue
        let completed = mgr
            .update_task(
                user.id,
                overdue.id,
                TaskPatch {
                    status: Some("completed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!is_overdue(&completed, now));

        // cancelled tasks still go overdue
        let cancelled = mgr
            .update_task(
                user.id,
                overdue.id,
                TaskPatch {
                    status: Some("cancelled".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(is_overdue(&cancelled, now));

        let today = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "Today".to_string(),
                    priority: Some("low".to_string()),
                    due_date: Some(now),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(is_due_today(&today, now));
        assert!(is_due_this_week(&today, now));
    }

    #[tokio::test]
    async fn test_list_tasks_filters_are_conjunctive() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());

        let high = seed_task(ctx.pool(), user.id, project.id, "High", "completed", "high").await;
        seed_task(ctx.pool(), user.id, project.id, "Urgent", "pending", "urgent").await;

        let page = mgr
            .list_tasks(
                user.id,
                TaskFilter {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
                PageRequest::new(1),
            )
            .await
            .unwrap();

        assert_eq!(page.meta.total, 1);
        assert_eq!(page.records[0].id, high.id);
        assert_eq!(page.records[0].priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn test_list_tasks_overdue_filter_excludes_completed() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let past = Utc::now() - Duration::days(3);

        let open = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "Open late".to_string(),
                    priority: Some("low".to_string()),
                    due_date: Some(past),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let done = mgr
            .create_task(
                user.id,
                NewTask {
                    project_id: project.id,
                    title: "Done late".to_string(),
                    status: Some("completed".to_string()),
                    priority: Some("low".to_string()),
                    due_date: Some(past),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let page = mgr
            .list_tasks(
                user.id,
                TaskFilter {
                    due: Some(DueFilter::Overdue),
                    ..Default::default()
                },
                PageRequest::new(1),
            )
            .await
            .unwrap();

        let ids: Vec<i64> = page.records.iter().map(|t| t.id).collect();
        assert!(ids.contains(&open.id));
        assert!(!ids.contains(&done.id));
    }

    #[tokio::test]
    async fn test_list_tasks_bad_page_rejected_before_lookup() {
        let ctx = TestContext::new().await;
        let (user, _) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());

        let result = mgr
            .list_tasks(user.id, TaskFilter::default(), PageRequest::new(0))
            .await;

        match result {
            Err(TrackerError::Request(msg)) => {
                assert_eq!(msg, "page parameter must be positive integer")
            },
            other => panic!("expected request error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_per_page_capped_at_50() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());

        for i in 0..60 {
            seed_task(
                ctx.pool(),
                user.id,
                project.id,
                &format!("T{i}"),
                "pending",
                "low",
            )
            .await;
        }

        let page = mgr
            .list_tasks(
                user.id,
                TaskFilter::default(),
                PageRequest::with_per_page(1, 100),
            )
            .await
            .unwrap();

        assert_eq!(page.records.len(), 50);
        assert_eq!(page.meta.per_page, 50);
        assert_eq!(page.meta.total, 60);
        assert_eq!(page.meta.total_pages, 2);
    }

    #[tokio::test]
    async fn test_task_not_visible_across_users() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let task = seed_task(ctx.pool(), user.id, project.id, "Mine", "pending", "low").await;

        let stranger = crate::users::UserManager::new(ctx.pool())
            .create_user("other@example.com", "Other", "User")
            .await
            .unwrap();

        let result = mgr.get_task(stranger.id, task.id).await;
        assert!(matches!(result, Err(TrackerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_task_cascades_sessions_and_tags() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = TaskManager::new(ctx.pool());
        let task = seed_task(ctx.pool(), user.id, project.id, "T", "pending", "low").await;

        crate::tags::TagManager::new(ctx.pool())
            .assign_tags(user.id, task.id, &["deep-work".to_string()])
            .await
            .unwrap();
        crate::sessions::FocusSessionManager::new(ctx.pool())
            .start_session(user.id, task.id, None)
            .await
            .unwrap();

        mgr.delete_task(user.id, task.id).await.unwrap();

        let task_tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_tags")
            .fetch_one(ctx.pool())
            .await
            .unwrap();
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM focus_sessions")
            .fetch_one(ctx.pool())
            .await
            .unwrap();
        assert_eq!(task_tags, 0);
        assert_eq!(sessions, 0);
    }
}
