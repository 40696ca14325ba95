use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;

/// Closed set of task states. Unknown values are rejected at the API
/// boundary with a validation error rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(TrackerError::validation(format!(
                "'{}' is not a valid status",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(TrackerError::validation(format!(
                "'{}' is not a valid priority",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Cumulative stopped-session minutes. Mutated only by the
    /// stop-session transaction.
    pub total_focus_time: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn total_focus_hours(&self) -> f64 {
        self.total_focus_time as f64 / 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i64>,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub id: i64,
    /// Canonical (trimmed, lower-cased) name.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A tag annotated with how many tasks currently reference it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TagWithUsage {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FocusSession {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub started_at: DateTime<Utc>,
    /// NULL while the session is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Set exactly once, when the session stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FocusSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Headline counters shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_projects: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub overdue_tasks: i64,
    pub tasks_due_today: i64,
    pub tasks_due_this_week: i64,
    pub total_focus_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub stats: DashboardStats,
    pub recent_tasks: Vec<Task>,
    pub overdue_tasks: Vec<Task>,
    pub recent_focus_sessions: Vec<FocusSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Aggregates over stopped focus sessions within a date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusStatsReport {
    pub period: StatsPeriod,
    pub total_duration_minutes: i64,
    pub total_duration_hours: f64,
    pub total_sessions: i64,
    pub average_duration_minutes: f64,
    /// Calendar date -> summed minutes for that date.
    pub daily_breakdown: BTreeMap<NaiveDate, i64>,
    /// Task title -> summed minutes for that task.
    pub task_breakdown: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MostUsedTag {
    pub id: i64,
    pub name: String,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagStatsReport {
    /// Distinct tags attached to the requesting user's tasks.
    pub total_tags_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_used_tag: Option<MostUsedTag>,
    /// Tags with no task association anywhere, not scoped to the user.
    pub unused_tags_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularTag {
    pub id: i64,
    pub name: String,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project: Project,
    pub task_count: i64,
    pub completed_task_count: i64,
    /// 0 for an empty project, otherwise rounded to one decimal place.
    pub completion_percentage: f64,
    pub total_estimated_time: i64,
    /// Sum of duration_minutes over all sessions of the project's tasks;
    /// active sessions contribute nothing until stopped.
    pub total_actual_time: i64,
}
