use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{Result, TrackerError};

pub struct UserManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a user. Email is globally unique.
    pub async fn create_user(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        let mut errors = Vec::new();
        if email.trim().is_empty() {
            errors.push("Email can't be blank".to_string());
        }
        if first_name.trim().is_empty() {
            errors.push("First name can't be blank".to_string());
        }
        if last_name.trim().is_empty() {
            errors.push("Last name can't be blank".to_string());
        }
        if !errors.is_empty() {
            return Err(TrackerError::Validation(errors));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO users (email, first_name, last_name)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .execute(self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(TrackerError::validation("Email has already been taken"));
            },
            Err(e) => return Err(e.into()),
        };

        self.get_user(result.last_insert_rowid()).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, total_focus_time, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(TrackerError::not_found("User", id))
    }

    /// Look up by email, registering on first use. Used by the CLI to
    /// resolve its single local identity.
    pub async fn get_or_create(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        let existing = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, total_focus_time, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await?;

        match existing {
            Some(user) => Ok(user),
            None => self.create_user(email, first_name, last_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::TestContext;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let ctx = TestContext::new().await;
        let mgr = UserManager::new(ctx.pool());

        let user = mgr
            .create_user("dev@example.com", "Dev", "One")
            .await
            .unwrap();
        assert_eq!(user.total_focus_time, 0);
        assert_eq!(user.full_name(), "Dev One");

        let fetched = mgr.get_user(user.id).await.unwrap();
        assert_eq!(fetched.email, "dev@example.com");
    }

    #[tokio::test]
    async fn test_create_user_requires_fields() {
        let ctx = TestContext::new().await;
        let mgr = UserManager::new(ctx.pool());

        let result = mgr.create_user("", "Dev", "").await;
        match result {
            Err(TrackerError::Validation(messages)) => {
                assert_eq!(messages.len(), 2);
            },
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let ctx = TestContext::new().await;
        let mgr = UserManager::new(ctx.pool());

        mgr.create_user("dev@example.com", "Dev", "One")
            .await
            .unwrap();
        let result = mgr.create_user("dev@example.com", "Other", "Dev").await;
        assert!(matches!(result, Err(TrackerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let ctx = TestContext::new().await;
        let mgr = UserManager::new(ctx.pool());

        let first = mgr
            .get_or_create("local@focuslog", "Local", "User")
            .await
            .unwrap();
        let second = mgr
            .get_or_create("local@focuslog", "Local", "User")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }
}
