//! Read-side aggregations over tasks, tags and focus sessions. Nothing in
//! this module mutates entity state.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::db::models::{
    DashboardOverview, DashboardStats, FocusSession, FocusStatsReport, MostUsedTag, PopularTag,
    Project, ProjectSummary, StatsPeriod, Task,
};
use crate::error::{Result, TrackerError};
use crate::time_utils::{day_bounds, default_stats_range, range_bounds, week_bounds};

fn round_dp(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub struct StatsManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StatsManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Headline counters for the dashboard. Overdue/due-today/due-this-week
    /// use the same predicates as task listing.
    pub async fn dashboard_stats(&self, user_id: i64) -> Result<DashboardStats> {
        let now = Utc::now();
        let (day_start, day_end) = day_bounds(now);
        let (week_start, week_end) = week_bounds(now);

        let total_projects: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(self.pool)
                .await?;

        let total_tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool)
            .await?;

        let completed_tasks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ? AND status = 'completed'",
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        let overdue_tasks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ? AND due_date < ? AND status != 'completed'",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        let tasks_due_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ? AND due_date >= ? AND due_date <= ?",
        )
        .bind(user_id)
        .bind(day_start)
        .bind(day_end)
        .fetch_one(self.pool)
        .await?;

        let tasks_due_this_week: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ? AND due_date >= ? AND due_date <= ?",
        )
        .bind(user_id)
        .bind(week_start)
        .bind(week_end)
        .fetch_one(self.pool)
        .await?;

        let total_focus_time: i64 =
            sqlx::query_scalar("SELECT total_focus_time FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?
                .ok_or(TrackerError::not_found("User", user_id))?;

        Ok(DashboardStats {
            total_projects,
            total_tasks,
            completed_tasks,
            overdue_tasks,
            tasks_due_today,
            tasks_due_this_week,
            total_focus_hours: total_focus_time as f64 / 60.0,
        })
    }

    /// Dashboard payload: counters plus small recent-activity samples.
    pub async fn dashboard_overview(&self, user_id: i64) -> Result<DashboardOverview> {
        let stats = self.dashboard_stats(user_id).await?;
        let now = Utc::now();

        let recent_tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, project_id, user_id, title, description, status, priority,
                   estimated_minutes, due_date, created_at
            FROM tasks
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 5
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        let overdue_tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, project_id, user_id, title, description, status, priority,
                   estimated_minutes, due_date, created_at
            FROM tasks
            WHERE user_id = ? AND due_date < ? AND status != 'completed'
            ORDER BY due_date ASC
            LIMIT 5
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        let recent_focus_sessions = sqlx::query_as::<_, FocusSession>(
            r#"
            SELECT id, user_id, task_id, started_at, ended_at, duration_minutes, notes, created_at
            FROM focus_sessions
            WHERE user_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT 5
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(DashboardOverview {
            stats,
            recent_tasks,
            overdue_tasks,
            recent_focus_sessions,
        })
    }

    /// Aggregates over stopped sessions whose `started_at` falls inside the
    /// date range (inclusive calendar days). Active sessions are excluded.
    /// Defaults to the last 7 days plus today.
    pub async fn focus_stats(
        &self,
        user_id: i64,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<FocusStatsReport> {
        let today = Utc::now().date_naive();
        let (default_start, default_end) = default_stats_range(today);
        let start = start_date.unwrap_or(default_start);
        let end = end_date.unwrap_or(default_end);
        let (range_start, range_end) = range_bounds(start, end);

        let rows: Vec<(i64, chrono::DateTime<Utc>, String)> = sqlx::query_as(
            r#"
            SELECT fs.duration_minutes, fs.started_at, t.title
            FROM focus_sessions fs
            JOIN tasks t ON t.id = fs.task_id
            WHERE fs.user_id = ?
              AND fs.started_at >= ? AND fs.started_at <= ?
              AND fs.ended_at IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(range_start)
        .bind(range_end)
        .fetch_all(self.pool)
        .await?;

        let total_sessions = rows.len() as i64;
        let total_duration_minutes: i64 = rows.iter().map(|(d, _, _)| d).sum();
        let average_duration_minutes = if total_sessions > 0 {
            round_dp(total_duration_minutes as f64 / total_sessions as f64, 1)
        } else {
            0.0
        };

        let mut daily_breakdown: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        let mut task_breakdown: BTreeMap<String, i64> = BTreeMap::new();
        for (duration, started_at, title) in rows {
            *daily_breakdown.entry(started_at.date_naive()).or_default() += duration;
            *task_breakdown.entry(title).or_default() += duration;
        }

        Ok(FocusStatsReport {
            period: StatsPeriod {
                start_date: start,
                end_date: end,
            },
            total_duration_minutes,
            total_duration_hours: round_dp(total_duration_minutes as f64 / 60.0, 2),
            total_sessions,
            average_duration_minutes,
            daily_breakdown,
            task_breakdown,
        })
    }

    /// Tag usage overview: distinct tags on the user's tasks, the most-used
    /// one (ties resolved arbitrarily by the grouped query), and the
    /// system-wide count of tags nothing references.
    pub async fn tag_stats(&self, user_id: i64) -> Result<crate::db::models::TagStatsReport> {
        let total_tags_used: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT tt.tag_id)
            FROM task_tags tt
            JOIN tasks t ON t.id = tt.task_id
            WHERE t.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        let most_used_tag: Option<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT g.id, g.name, COUNT(tt.id) AS usage_count
            FROM tags g
            JOIN task_tags tt ON tt.tag_id = g.id
            JOIN tasks t ON t.id = tt.task_id
            WHERE t.user_id = ?
            GROUP BY g.id, g.name
            ORDER BY COUNT(tt.id) DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        let unused_tags_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM tags g
            LEFT JOIN task_tags tt ON tt.tag_id = g.id
            WHERE tt.id IS NULL
            "#,
        )
        .fetch_one(self.pool)
        .await?;

        Ok(crate::db::models::TagStatsReport {
            total_tags_used,
            most_used_tag: most_used_tag.map(|(id, name, usage_count)| MostUsedTag {
                id,
                name,
                usage_count,
            }),
            unused_tags_count,
        })
    }

    /// Tags on the user's tasks by descending usage, at most `limit`
    /// (default 10, capped at 50).
    pub async fn popular_tags(&self, user_id: i64, limit: Option<i64>) -> Result<Vec<PopularTag>> {
        let limit = limit.unwrap_or(10).clamp(1, 50);

        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT g.id, g.name, COUNT(tt.id) AS usage_count
            FROM tags g
            JOIN task_tags tt ON tt.tag_id = g.id
            JOIN tasks t ON t.id = tt.task_id
            WHERE t.user_id = ?
            GROUP BY g.id, g.name
            ORDER BY COUNT(tt.id) DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, usage_count)| PopularTag {
                id,
                name,
                usage_count,
            })
            .collect())
    }

    /// Completion and time rollups for one project. Active sessions carry
    /// no duration yet, so they contribute nothing to actual time.
    pub async fn project_summary(&self, user_id: i64, project_id: i64) -> Result<ProjectSummary> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, user_id, name, description, created_at
            FROM projects
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("Project", project_id))?;

        let (task_count, completed_task_count, total_estimated_time): (i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                       COALESCE(SUM(estimated_minutes), 0)
                FROM tasks
                WHERE project_id = ?
                "#,
            )
            .bind(project_id)
            .fetch_one(self.pool)
            .await?;

        let total_actual_time: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(fs.duration_minutes), 0)
            FROM focus_sessions fs
            JOIN tasks t ON t.id = fs.task_id
            WHERE t.project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_one(self.pool)
        .await?;

        let completion_percentage = if task_count == 0 {
            0.0
        } else {
            round_dp(completed_task_count as f64 / task_count as f64 * 100.0, 1)
        };

        Ok(ProjectSummary {
            project,
            task_count,
            completed_task_count,
            completion_percentage,
            total_estimated_time,
            total_actual_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::FocusSessionManager;
    use crate::tags::TagManager;
    use crate::test_utils::test_helpers::{
        seed_session, seed_task, seed_user_with_project, TestContext,
    };
    use chrono::Duration;

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(75.04, 1), 75.0);
        assert_eq!(round_dp(75.05, 1), 75.1);
        assert_eq!(round_dp(2.505, 2), 2.51);
    }

    #[tokio::test]
    async fn test_dashboard_stats_counts() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = StatsManager::new(ctx.pool());

        seed_task(ctx.pool(), user.id, project.id, "Done", "completed", "low").await;
        seed_task(ctx.pool(), user.id, project.id, "Open", "pending", "low").await;

        // overdue task
        sqlx::query("UPDATE tasks SET due_date = ? WHERE title = 'Open'")
            .bind(Utc::now() - Duration::days(2))
            .execute(ctx.pool())
            .await
            .unwrap();

        let stats = mgr.dashboard_stats(user.id).await.unwrap();
        assert_eq!(stats.total_projects, 1);
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(stats.total_focus_hours, 0.0);
    }

    #[tokio::test]
    async fn test_focus_stats_range_and_exclusions() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let task = seed_task(ctx.pool(), user.id, project.id, "Deep work", "pending", "low").await;
        let sessions = FocusSessionManager::new(ctx.pool());
        let mgr = StatsManager::new(ctx.pool());

        let today = Utc::now().date_naive();

        // 60 and 90 minute sessions inside the range
        let s1 = seed_session(
            ctx.pool(),
            user.id,
            task.id,
            Utc::now() - Duration::minutes(60),
            None,
        )
        .await;
        sessions.stop_session(user.id, s1.id).await.unwrap();
        let s2 = seed_session(
            ctx.pool(),
            user.id,
            task.id,
            Utc::now() - Duration::minutes(90),
            None,
        )
        .await;
        sessions.stop_session(user.id, s2.id).await.unwrap();

        // 30-minute stopped session far outside the range
        let old_start = Utc::now() - Duration::days(30);
        seed_session(
            ctx.pool(),
            user.id,
            task.id,
            old_start,
            Some((old_start + Duration::minutes(30), 30)),
        )
        .await;

        // active session inside the range: excluded
        seed_session(ctx.pool(), user.id, task.id, Utc::now(), None).await;

        let report = mgr
            .focus_stats(user.id, Some(today - Duration::days(7)), Some(today))
            .await
            .unwrap();

        assert_eq!(report.total_duration_minutes, 150);
        assert_eq!(report.total_sessions, 2);
        assert_eq!(report.average_duration_minutes, 75.0);
        assert_eq!(report.total_duration_hours, 2.5);
        assert_eq!(report.daily_breakdown.values().sum::<i64>(), 150);
        assert_eq!(report.task_breakdown.get("Deep work"), Some(&150));
    }

    #[tokio::test]
    async fn test_focus_stats_empty_range() {
        let ctx = TestContext::new().await;
        let (user, _) = seed_user_with_project(ctx.pool()).await;
        let mgr = StatsManager::new(ctx.pool());

        let report = mgr.focus_stats(user.id, None, None).await.unwrap();
        assert_eq!(report.total_sessions, 0);
        assert_eq!(report.average_duration_minutes, 0.0);
        assert!(report.daily_breakdown.is_empty());

        // default window is the last 7 days plus today
        let today = Utc::now().date_naive();
        assert_eq!(report.period.end_date, today);
        assert_eq!(report.period.start_date, today - Duration::days(7));
    }

    #[tokio::test]
    async fn test_tag_stats() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let a = seed_task(ctx.pool(), user.id, project.id, "A", "pending", "low").await;
        let b = seed_task(ctx.pool(), user.id, project.id, "B", "pending", "low").await;
        let tags = TagManager::new(ctx.pool());
        let mgr = StatsManager::new(ctx.pool());

        tags.assign_tags(user.id, a.id, &["rust".into(), "focus".into()])
            .await
            .unwrap();
        tags.assign_tags(user.id, b.id, &["rust".into()])
            .await
            .unwrap();
        tags.find_or_create("orphan").await.unwrap();

        let report = mgr.tag_stats(user.id).await.unwrap();
        assert_eq!(report.total_tags_used, 2);
        assert_eq!(report.unused_tags_count, 1);

        let most_used = report.most_used_tag.unwrap();
        assert_eq!(most_used.name, "rust");
        assert_eq!(most_used.usage_count, 2);
    }

    #[tokio::test]
    async fn test_popular_tags_ordering_and_cap() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let a = seed_task(ctx.pool(), user.id, project.id, "A", "pending", "low").await;
        let b = seed_task(ctx.pool(), user.id, project.id, "B", "pending", "low").await;
        let tags = TagManager::new(ctx.pool());
        let mgr = StatsManager::new(ctx.pool());

        tags.assign_tags(user.id, a.id, &["common".into(), "rare".into()])
            .await
            .unwrap();
        tags.assign_tags(user.id, b.id, &["common".into()])
            .await
            .unwrap();

        let popular = mgr.popular_tags(user.id, None).await.unwrap();
        assert_eq!(popular[0].name, "common");
        assert_eq!(popular[0].usage_count, 2);
        assert_eq!(popular.len(), 2);

        // requested limit above the cap collapses to 50
        let capped = mgr.popular_tags(user.id, Some(500)).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_project_completion_percentage() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = StatsManager::new(ctx.pool());

        for i in 0..3 {
            seed_task(
                ctx.pool(),
                user.id,
                project.id,
                &format!("Done {i}"),
                "completed",
                "low",
            )
            .await;
        }
        for i in 0..7 {
            seed_task(
                ctx.pool(),
                user.id,
                project.id,
                &format!("Open {i}"),
                "pending",
                "low",
            )
            .await;
        }

        let summary = mgr.project_summary(user.id, project.id).await.unwrap();
        assert_eq!(summary.task_count, 10);
        assert_eq!(summary.completed_task_count, 3);
        assert_eq!(summary.completion_percentage, 30.0);
    }

    #[tokio::test]
    async fn test_empty_project_completion_is_zero() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let mgr = StatsManager::new(ctx.pool());

        let summary = mgr.project_summary(user.id, project.id).await.unwrap();
        assert_eq!(summary.completion_percentage, 0.0);
        assert_eq!(summary.total_actual_time, 0);
    }

    #[tokio::test]
    async fn test_project_actual_time_ignores_active_sessions() {
        let ctx = TestContext::new().await;
        let (user, project) = seed_user_with_project(ctx.pool()).await;
        let task = seed_task(ctx.pool(), user.id, project.id, "T", "pending", "low").await;
        let sessions = FocusSessionManager::new(ctx.pool());
        let mgr = StatsManager::new(ctx.pool());

        let s = seed_session(
            ctx.pool(),
            user.id,
            task.id,
            Utc::now() - Duration::minutes(45),
            None,
        )
        .await;
        sessions.stop_session(user.id, s.id).await.unwrap();

        // still running, contributes nothing
        seed_session(ctx.pool(), user.id, task.id, Utc::now(), None).await;

        let summary = mgr.project_summary(user.id, project.id).await.unwrap();
        assert_eq!(summary.total_actual_time, 45);
    }
}
