use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::users::repo_types::{UserChanges, UserRow};

/// Persistence for user accounts. Implementations must enforce
/// case-insensitive uniqueness of `normalized_name` and `email` on write;
/// `name_taken`/`email_taken` are advisory probes only.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, changes: &UserChanges) -> anyhow::Result<UserRow>;
    async fn update(&self, id: i64, changes: &UserChanges) -> anyhow::Result<UserRow>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<UserRow>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRow>>;
    async fn find_by_remember_token(&self, token: &str) -> anyhow::Result<Option<UserRow>>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;
    async fn count(&self) -> anyhow::Result<i64>;
    /// `exclude` skips the caller's own row.
    async fn name_taken(&self, normalized_name: &str, exclude: Option<i64>)
        -> anyhow::Result<bool>;
    async fn email_taken(&self, email: &str, exclude: Option<i64>) -> anyhow::Result<bool>;
}

const USER_COLUMNS: &str = "id, display_name, normalized_name, email, password_hash, \
     remember_token, verified, verification_pass, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    /// Create a new user row.
    async fn insert(&self, changes: &UserChanges) -> anyhow::Result<UserRow> {
        let sql = format!(
            r#"
            INSERT INTO users (display_name, normalized_name, email, password_hash,
                               remember_token, verified, verification_pass)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&changes.display_name)
            .bind(&changes.normalized_name)
            .bind(&changes.email)
            .bind(&changes.password_hash)
            .bind(&changes.remember_token)
            .bind(changes.verified)
            .bind(&changes.verification_pass)
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        Ok(row)
    }

    async fn update(&self, id: i64, changes: &UserChanges) -> anyhow::Result<UserRow> {
        let sql = format!(
            r#"
            UPDATE users
               SET display_name = $2, normalized_name = $3, email = $4, password_hash = $5,
                   remember_token = $6, verified = $7, verification_pass = $8,
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(&changes.display_name)
            .bind(&changes.normalized_name)
            .bind(&changes.email)
            .bind(&changes.password_hash)
            .bind(&changes.remember_token)
            .bind(changes.verified)
            .bind(&changes.verification_pass)
            .fetch_optional(&self.db)
            .await
            .context("update user")?;
        row.with_context(|| format!("user {id} not found"))
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<UserRow>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(row)
    }

    /// Find a user by email, ignoring case.
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRow>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(row)
    }

    async fn find_by_remember_token(&self, token: &str) -> anyhow::Result<Option<UserRow>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE remember_token = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .context("find user by remember token")?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .context("count users")?;
        Ok(n)
    }

    async fn name_taken(
        &self,
        normalized_name: &str,
        exclude: Option<i64>,
    ) -> anyhow::Result<bool> {
        let (taken,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                 WHERE LOWER(normalized_name) = LOWER($1)
                   AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(normalized_name)
        .bind(exclude)
        .fetch_one(&self.db)
        .await
        .context("check name uniqueness")?;
        Ok(taken)
    }

    async fn email_taken(&self, email: &str, exclude: Option<i64>) -> anyhow::Result<bool> {
        let (taken,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                 WHERE LOWER(email) = LOWER($1)
                   AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(email)
        .bind(exclude)
        .fetch_one(&self.db)
        .await
        .context("check email uniqueness")?;
        Ok(taken)
    }
}
