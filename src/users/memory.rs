use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

use crate::users::repo::UserStore;
use crate::users::repo_types::{UserChanges, UserRow};

/// In-process store with the same unique constraints as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: Vec<UserRow>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

fn same(a: &Option<String>, b: &str) -> bool {
    a.as_deref().is_some_and(|a| a.to_lowercase() == b.to_lowercase())
}

impl Inner {
    fn check_unique(&self, changes: &UserChanges, exclude: Option<i64>) -> anyhow::Result<()> {
        for row in self.rows.iter().filter(|r| Some(r.id) != exclude) {
            if let Some(name) = changes.normalized_name.as_deref() {
                anyhow::ensure!(
                    !same(&row.normalized_name, name),
                    "duplicate key value violates unique constraint \"users_normalized_name_lower_key\""
                );
            }
            if let Some(email) = changes.email.as_deref() {
                anyhow::ensure!(
                    !same(&row.email, email),
                    "duplicate key value violates unique constraint \"users_email_lower_key\""
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, changes: &UserChanges) -> anyhow::Result<UserRow> {
        let mut inner = self.lock()?;
        inner.check_unique(changes, None)?;
        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let row = UserRow {
            id: inner.next_id,
            display_name: changes.display_name.clone(),
            normalized_name: changes.normalized_name.clone(),
            email: changes.email.clone(),
            password_hash: changes.password_hash.clone(),
            remember_token: Some(changes.remember_token.clone()),
            verified: changes.verified,
            verification_pass: changes.verification_pass.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: i64, changes: &UserChanges) -> anyhow::Result<UserRow> {
        let mut inner = self.lock()?;
        inner.check_unique(changes, Some(id))?;
        let row = inner
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        row.display_name = changes.display_name.clone();
        row.normalized_name = changes.normalized_name.clone();
        row.email = changes.email.clone();
        row.password_hash = changes.password_hash.clone();
        row.remember_token = Some(changes.remember_token.clone());
        row.verified = changes.verified;
        row.verification_pass = changes.verification_pass.clone();
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<UserRow>> {
        Ok(self.lock()?.rows.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRow>> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .find(|r| same(&r.email, email))
            .cloned())
    }

    async fn find_by_remember_token(&self, token: &str) -> anyhow::Result<Option<UserRow>> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .find(|r| r.remember_token.as_deref() == Some(token))
            .cloned())
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        let before = inner.rows.len();
        inner.rows.retain(|r| r.id != id);
        Ok(inner.rows.len() < before)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        Ok(self.lock()?.rows.len() as i64)
    }

    async fn name_taken(
        &self,
        normalized_name: &str,
        exclude: Option<i64>,
    ) -> anyhow::Result<bool> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .any(|r| Some(r.id) != exclude && same(&r.normalized_name, normalized_name)))
    }

    async fn email_taken(&self, email: &str, exclude: Option<i64>) -> anyhow::Result<bool> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .any(|r| Some(r.id) != exclude && same(&r.email, email)))
    }
}
