//! Command-line surface. Argument parsing lives in the derive structs at
//! the top; `run` dispatches into the managers and renders results either
//! as human-readable text or JSON.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::models::{FocusSession, Project, Task, User};
use crate::error::{Result, TrackerError};
use crate::pagination::{PageRequest, Paginated};
use crate::projects::ProjectManager;
use crate::sessions::{FocusSessionManager, SessionFilter, StartPolicy};
use crate::stats::StatsManager;
use crate::tags::{TagListFilter, TagManager};
use crate::tasks::{DueFilter, NewTask, TaskFilter, TaskManager, TaskPatch};
use crate::time_utils::parse_date;
use crate::users::UserManager;

const LOCAL_EMAIL: &str = "local@focuslog";

#[derive(Parser)]
#[command(name = "focuslog")]
#[command(about = "Track projects, tasks, tags and focus sessions")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v)
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output (-q)
    #[arg(short, long)]
    pub quiet: bool,

    /// Emit results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Start, stop and inspect focus sessions
    #[command(subcommand)]
    Focus(FocusCommands),

    /// Manage tags and task assignments
    #[command(subcommand)]
    Tag(TagCommands),

    /// Aggregated statistics
    #[command(subcommand)]
    Stats(StatsCommands),
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a project
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List projects, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long)]
        per_page: Option<i64>,
    },
    /// Update a project's name or description
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a project and everything under it
    Delete { id: i64 },
    /// Completion and time rollups for one project
    Summary { id: i64 },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task
    Add {
        /// Project the task belongs to
        #[arg(long)]
        project: i64,
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// pending, in_progress, completed or cancelled (default pending)
        #[arg(long)]
        status: Option<String>,
        /// low, medium, high or urgent
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        estimate: Option<i64>,
        /// Due date, YYYY-MM-DD or RFC 3339
        #[arg(long)]
        due: Option<String>,
    },
    /// Show one task with its tags
    Show { id: i64 },
    /// List tasks with optional filters
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        project: Option<i64>,
        /// overdue, due_today or due_this_week
        #[arg(long)]
        due: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long)]
        per_page: Option<i64>,
    },
    /// Update task fields
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        estimate: Option<i64>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        project: Option<i64>,
    },
    /// Mark a task completed
    Done { id: i64 },
    /// Delete a task
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum FocusCommands {
    /// Start a focus session against a task
    Start {
        task: i64,
        #[arg(long)]
        notes: Option<String>,
        /// Refuse to start while another session is active
        #[arg(long)]
        exclusive: bool,
    },
    /// Stop a session (the current one if no id is given)
    Stop { id: Option<i64> },
    /// Show the currently active session, if any
    Current,
    /// List sessions with optional filters
    List {
        #[arg(long)]
        task: Option<i64>,
        /// active or completed
        #[arg(long)]
        status: Option<String>,
        /// Start of date range, YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,
        /// End of date range, YYYY-MM-DD
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long)]
        per_page: Option<i64>,
    },
    /// Delete a session
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum TagCommands {
    /// Replace a task's tag set
    Assign {
        task: i64,
        /// Tag names; trimmed and lower-cased before use
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Show the tags on a task
    Show { task: i64 },
    /// List tags
    List {
        /// Case-insensitive substring match on the name
        #[arg(long)]
        search: Option<String>,
        /// Only tags attached to your own tasks
        #[arg(long)]
        mine: bool,
        /// name, usage_count or created_at
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long)]
        per_page: Option<i64>,
    },
    /// Rename a tag
    Rename { id: i64, name: String },
    /// Delete an unreferenced tag
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum StatsCommands {
    /// Headline counters plus recent activity
    Dashboard,
    /// Focus time aggregates over a date range
    Focus {
        /// Start date, YYYY-MM-DD (default: 7 days ago)
        #[arg(long)]
        from: Option<String>,
        /// End date, YYYY-MM-DD (default: today)
        #[arg(long)]
        to: Option<String>,
    },
    /// Tag usage overview
    Tags,
    /// Most-used tags
    Popular {
        #[arg(long)]
        limit: Option<i64>,
    },
}

fn page_request(page: i64, per_page: Option<i64>) -> PageRequest {
    match per_page {
        Some(pp) => PageRequest::with_per_page(page, pp),
        None => PageRequest::new(page),
    }
}

/// Accept a full RFC 3339 timestamp or a bare date. A bare date means end
/// of that day, so a task due "2025-07-01" is not overdue until July 2nd.
fn parse_due(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = parse_date(input)?;
    let (_, end) = crate::time_utils::range_bounds(date, date);
    Ok(end)
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_project(project: &Project) {
    println!(
        "#{}  {}{}",
        project.id,
        project.name,
        project
            .description
            .as_deref()
            .map(|d| format!("  - {}", d))
            .unwrap_or_default()
    );
}

fn print_task(task: &Task) {
    println!(
        "#{}  [{}/{}]  {}  (project {}, due {})",
        task.id,
        task.status.as_str(),
        task.priority.as_str(),
        task.title,
        task.project_id,
        task.due_date.format("%Y-%m-%d %H:%M"),
    );
}

fn print_session(session: &FocusSession) {
    let state = if session.is_active() {
        "active".to_string()
    } else {
        format!("{} min", session.duration_minutes.unwrap_or(0))
    };
    println!(
        "#{}  task {}  started {}  [{}]{}",
        session.id,
        session.task_id,
        session.started_at.format("%Y-%m-%d %H:%M"),
        state,
        session
            .notes
            .as_deref()
            .map(|n| format!("  - {}", n))
            .unwrap_or_default()
    );
}

fn print_page_meta<T>(page: &Paginated<T>) {
    println!(
        "page {}/{} ({} total)",
        page.meta.page, page.meta.total_pages, page.meta.total
    );
}

/// Resolve the single local identity and dispatch the parsed command.
pub async fn run(command: Commands, json: bool, pool: &SqlitePool) -> Result<()> {
    let user = UserManager::new(pool)
        .get_or_create(LOCAL_EMAIL, "Local", "User")
        .await?;

    match command {
        Commands::Project(cmd) => handle_project(cmd, json, pool, &user).await,
        Commands::Task(cmd) => handle_task(cmd, json, pool, &user).await,
        Commands::Focus(cmd) => handle_focus(cmd, json, pool, &user).await,
        Commands::Tag(cmd) => handle_tag(cmd, json, pool, &user).await,
        Commands::Stats(cmd) => handle_stats(cmd, json, pool, &user).await,
    }
}

async fn handle_project(
    cmd: ProjectCommands,
    json: bool,
    pool: &SqlitePool,
    user: &User,
) -> Result<()> {
    let projects = ProjectManager::new(pool);

    match cmd {
        ProjectCommands::Add { name, description } => {
            let project = projects
                .create_project(user.id, &name, description.as_deref())
                .await?;
            if json {
                emit_json(&project)?;
            } else {
                println!("Created project #{}: {}", project.id, project.name);
            }
        },
        ProjectCommands::List { page, per_page } => {
            let result = projects
                .list_projects(user.id, page_request(page, per_page))
                .await?;
            if json {
                emit_json(&result)?;
            } else {
                for project in &result.records {
                    print_project(project);
                }
                print_page_meta(&result);
            }
        },
        ProjectCommands::Update {
            id,
            name,
            description,
        } => {
            let project = projects
                .update_project(user.id, id, name.as_deref(), description.as_deref())
                .await?;
            if json {
                emit_json(&project)?;
            } else {
                println!("Updated project #{}", project.id);
                print_project(&project);
            }
        },
        ProjectCommands::Delete { id } => {
            projects.delete_project(user.id, id).await?;
            if json {
                emit_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted project #{}", id);
            }
        },
        ProjectCommands::Summary { id } => {
            let summary = StatsManager::new(pool).project_summary(user.id, id).await?;
            if json {
                emit_json(&summary)?;
            } else {
                println!("{}", summary.project.name);
                println!(
                    "  tasks: {} ({} completed, {:.1}%)",
                    summary.task_count, summary.completed_task_count, summary.completion_percentage
                );
                println!(
                    "  estimated: {} min, actual: {} min",
                    summary.total_estimated_time, summary.total_actual_time
                );
            }
        },
    }

    Ok(())
}

async fn handle_task(cmd: TaskCommands, json: bool, pool: &SqlitePool, user: &User) -> Result<()> {
    let tasks = TaskManager::new(pool);

    match cmd {
        TaskCommands::Add {
            project,
            title,
            description,
            status,
            priority,
            estimate,
            due,
        } => {
            let due_date = due.as_deref().map(parse_due).transpose()?;
            let task = tasks
                .create_task(
                    user.id,
                    NewTask {
                        project_id: project,
                        title,
                        description,
                        status,
                        priority,
                        estimated_minutes: estimate,
                        due_date,
                    },
                )
                .await?;
            if json {
                emit_json(&task)?;
            } else {
                println!("Created task #{}", task.id);
                print_task(&task);
            }
        },
        TaskCommands::Show { id } => {
            let task = tasks.get_task(user.id, id).await?;
            let tags = TagManager::new(pool).tags_for_task(user.id, id).await?;
            if json {
                emit_json(&serde_json::json!({ "task": task, "tags": tags }))?;
            } else {
                print_task(&task);
                if let Some(description) = &task.description {
                    println!("  {}", description);
                }
                if !tags.is_empty() {
                    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
                    println!("  tags: {}", names.join(", "));
                }
            }
        },
        TaskCommands::List {
            status,
            project,
            due,
            page,
            per_page,
        } => {
            let filter = TaskFilter {
                status: status.as_deref().map(str::parse).transpose()?,
                project_id: project,
                due: due.as_deref().map(str::parse::<DueFilter>).transpose()?,
            };
            let result = tasks
                .list_tasks(user.id, filter, page_request(page, per_page))
                .await?;
            if json {
                emit_json(&result)?;
            } else {
                for task in &result.records {
                    print_task(task);
                }
                print_page_meta(&result);
            }
        },
        TaskCommands::Update {
            id,
            title,
            description,
            status,
            priority,
            estimate,
            due,
            project,
        } => {
            let due_date = due.as_deref().map(parse_due).transpose()?;
            let task = tasks
                .update_task(
                    user.id,
                    id,
                    TaskPatch {
                        title,
                        description,
                        status,
                        priority,
                        estimated_minutes: estimate,
                        due_date,
                        project_id: project,
                    },
                )
                .await?;
            if json {
                emit_json(&task)?;
            } else {
                println!("Updated task #{}", task.id);
                print_task(&task);
            }
        },
        TaskCommands::Done { id } => {
            let task = tasks
                .update_task(
                    user.id,
                    id,
                    TaskPatch {
                        status: Some("completed".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            if json {
                emit_json(&task)?;
            } else {
                println!("Completed task #{}: {}", task.id, task.title);
            }
        },
        TaskCommands::Delete { id } => {
            tasks.delete_task(user.id, id).await?;
            if json {
                emit_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted task #{}", id);
            }
        },
    }

    Ok(())
}

async fn handle_focus(
    cmd: FocusCommands,
    json: bool,
    pool: &SqlitePool,
    user: &User,
) -> Result<()> {
    match cmd {
        FocusCommands::Start {
            task,
            notes,
            exclusive,
        } => {
            let policy = if exclusive {
                StartPolicy::RejectWhileActive
            } else {
                StartPolicy::AllowConcurrent
            };
            let session = FocusSessionManager::with_policy(pool, policy)
                .start_session(user.id, task, notes.as_deref())
                .await?;
            if json {
                emit_json(&session)?;
            } else {
                println!("Started focus session #{} on task {}", session.id, task);
            }
        },
        FocusCommands::Stop { id } => {
            let sessions = FocusSessionManager::new(pool);
            let id = match id {
                Some(id) => id,
                None => sessions
                    .current_session(user.id)
                    .await?
                    .map(|s| s.id)
                    .ok_or_else(|| {
                        TrackerError::Request("no active focus session to stop".to_string())
                    })?,
            };
            let session = sessions.stop_session(user.id, id).await?;
            if json {
                emit_json(&session)?;
            } else {
                println!(
                    "Stopped session #{}: {} minutes",
                    session.id,
                    session.duration_minutes.unwrap_or(0)
                );
            }
        },
        FocusCommands::Current => {
            let current = FocusSessionManager::new(pool).current_session(user.id).await?;
            if json {
                emit_json(&current)?;
            } else {
                match current {
                    Some(session) => print_session(&session),
                    None => println!("No active focus session"),
                }
            }
        },
        FocusCommands::List {
            task,
            status,
            from,
            to,
            page,
            per_page,
        } => {
            let filter = SessionFilter {
                task_id: task,
                start_date: from.as_deref().map(parse_date).transpose()?,
                end_date: to.as_deref().map(parse_date).transpose()?,
                state: status.as_deref().map(str::parse).transpose()?,
            };
            let result = FocusSessionManager::new(pool)
                .list_sessions(user.id, filter, page_request(page, per_page))
                .await?;
            if json {
                emit_json(&result)?;
            } else {
                for session in &result.records {
                    print_session(session);
                }
                print_page_meta(&result);
            }
        },
        FocusCommands::Delete { id } => {
            FocusSessionManager::new(pool).delete_session(user.id, id).await?;
            if json {
                emit_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted session #{}", id);
            }
        },
    }

    Ok(())
}

async fn handle_tag(cmd: TagCommands, json: bool, pool: &SqlitePool, user: &User) -> Result<()> {
    let tags = TagManager::new(pool);

    match cmd {
        TagCommands::Assign { task, tags: names } => {
            let assigned = tags.assign_tags(user.id, task, &names).await?;
            if json {
                emit_json(&assigned)?;
            } else {
                let names: Vec<&str> = assigned.iter().map(|t| t.name.as_str()).collect();
                println!("Task {} tagged: {}", task, names.join(", "));
            }
        },
        TagCommands::Show { task } => {
            let result = tags.tags_for_task(user.id, task).await?;
            if json {
                emit_json(&result)?;
            } else if result.is_empty() {
                println!("Task {} has no tags", task);
            } else {
                for tag in &result {
                    println!("#{}  {}", tag.id, tag.name);
                }
            }
        },
        TagCommands::List {
            search,
            mine,
            sort,
            page,
            per_page,
        } => {
            let filter = TagListFilter {
                search,
                user_only: mine,
                sort: sort.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
            };
            let result = tags
                .list_tags(user.id, &filter, page_request(page, per_page))
                .await?;
            if json {
                emit_json(&result)?;
            } else {
                for tag in &result.records {
                    println!("#{}  {}", tag.id, tag.name);
                }
                print_page_meta(&result);
            }
        },
        TagCommands::Rename { id, name } => {
            let tag = tags.rename_tag(id, &name).await?;
            if json {
                emit_json(&tag)?;
            } else {
                println!("Renamed tag #{} to {}", tag.id, tag.name);
            }
        },
        TagCommands::Delete { id } => {
            tags.delete_tag(id).await?;
            if json {
                emit_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted tag #{}", id);
            }
        },
    }

    Ok(())
}

async fn handle_stats(
    cmd: StatsCommands,
    json: bool,
    pool: &SqlitePool,
    user: &User,
) -> Result<()> {
    let stats = StatsManager::new(pool);

    match cmd {
        StatsCommands::Dashboard => {
            let overview = stats.dashboard_overview(user.id).await?;
            if json {
                emit_json(&overview)?;
            } else {
                let s = &overview.stats;
                println!(
                    "{} projects, {} tasks ({} completed, {} overdue)",
                    s.total_projects, s.total_tasks, s.completed_tasks, s.overdue_tasks
                );
                println!(
                    "due today: {}, due this week: {}, lifetime focus: {:.1}h",
                    s.tasks_due_today, s.tasks_due_this_week, s.total_focus_hours
                );
                if !overview.overdue_tasks.is_empty() {
                    println!("\nOverdue:");
                    for task in &overview.overdue_tasks {
                        print_task(task);
                    }
                }
                if !overview.recent_tasks.is_empty() {
                    println!("\nRecent tasks:");
                    for task in &overview.recent_tasks {
                        print_task(task);
                    }
                }
                if !overview.recent_focus_sessions.is_empty() {
                    println!("\nRecent sessions:");
                    for session in &overview.recent_focus_sessions {
                        print_session(session);
                    }
                }
            }
        },
        StatsCommands::Focus { from, to } => {
            let start = from.as_deref().map(parse_date).transpose()?;
            let end = to.as_deref().map(parse_date).transpose()?;
            let report = stats.focus_stats(user.id, start, end).await?;
            if json {
                emit_json(&report)?;
            } else {
                println!(
                    "{} to {}: {} sessions, {} min total ({:.2}h), avg {:.1} min",
                    report.period.start_date,
                    report.period.end_date,
                    report.total_sessions,
                    report.total_duration_minutes,
                    report.total_duration_hours,
                    report.average_duration_minutes
                );
                for (date, minutes) in &report.daily_breakdown {
                    println!("  {}: {} min", date, minutes);
                }
                if !report.task_breakdown.is_empty() {
                    println!("By task:");
                    for (title, minutes) in &report.task_breakdown {
                        println!("  {}: {} min", title, minutes);
                    }
                }
            }
        },
        StatsCommands::Tags => {
            let report = stats.tag_stats(user.id).await?;
            if json {
                emit_json(&report)?;
            } else {
                println!("{} tags in use", report.total_tags_used);
                if let Some(top) = &report.most_used_tag {
                    println!("most used: {} ({} tasks)", top.name, top.usage_count);
                }
                println!("{} unused tags", report.unused_tags_count);
            }
        },
        StatsCommands::Popular { limit } => {
            let popular = stats.popular_tags(user.id, limit).await?;
            if json {
                emit_json(&popular)?;
            } else {
                for tag in &popular {
                    println!("{}  ({} tasks)", tag.name, tag.usage_count);
                }
            }
        },
    }

    Ok(())
}
