use tracing::{debug, info, instrument, warn};

use crate::error::{AccountError, AccountResult};
use crate::users::{
    model::{Taken, UserAccount},
    password::PasswordHasher,
    repo::UserStore,
    token::generate_token,
    validation::is_blank,
};

/// Load/validate/save cycle for user accounts on top of a `UserStore`.
pub struct AccountService<S> {
    store: S,
    hasher: PasswordHasher,
}

impl<S: UserStore> AccountService<S> {
    pub fn new(store: S, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    async fn probe(&self, account: &UserAccount) -> AccountResult<Taken> {
        let exclude = account.id();
        let name = match account.normalized_name() {
            Some(name) => self
                .store
                .name_taken(name, exclude)
                .await
                .map_err(AccountError::Store)?,
            None => false,
        };
        let email = match account.email() {
            Some(email) if !is_blank(Some(email)) => self
                .store
                .email_taken(email, exclude)
                .await
                .map_err(AccountError::Store)?,
            _ => false,
        };
        Ok(Taken { name, email })
    }

    /// Normalizes the record and runs every rule, uniqueness included.
    pub async fn validate(&self, account: &mut UserAccount) -> AccountResult<()> {
        account.normalize();
        let taken = self.probe(account).await?;
        account.validate(taken)?;
        Ok(())
    }

    /// `validate` as a yes/no answer. Store failures are still errors.
    pub async fn is_valid(&self, account: &mut UserAccount) -> AccountResult<bool> {
        match self.validate(account).await {
            Ok(()) => Ok(true),
            Err(AccountError::Validation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Validates and writes the record. A fresh remember token is issued on
    /// every save; new records also get a verification pass and start
    /// unverified. `account` only changes (beyond normalization) once the
    /// store has accepted the write.
    #[instrument(skip(self, account), fields(user_id = ?account.id()))]
    pub async fn save(&self, account: &mut UserAccount) -> AccountResult<()> {
        if let Err(e) = self.validate(account).await {
            if let AccountError::Validation(errors) = &e {
                warn!(%errors, "user rejected");
            }
            return Err(e);
        }

        let password_hash = match account.password() {
            Some(plain) => Some(
                self.hasher
                    .hash_blocking(plain.to_owned())
                    .await
                    .map_err(AccountError::Hashing)?,
            ),
            None => None,
        };

        let remember_token = generate_token();
        let verification_pass = account.is_new().then(generate_token);
        let changes = account.changes(password_hash, remember_token, verification_pass);

        let created = account.is_new();
        let row = match account.id() {
            None => self.store.insert(&changes).await,
            Some(id) => self.store.update(id, &changes).await,
        }
        .map_err(AccountError::Store)?;

        debug!(user_id = row.id, "remember token refreshed");
        account.apply_row(row);
        if created {
            info!(user_id = ?account.id(), email = ?account.email(), "user created");
        } else {
            info!(user_id = ?account.id(), "user updated");
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> AccountResult<Option<UserAccount>> {
        let row = self.store.find_by_id(id).await.map_err(AccountError::Store)?;
        Ok(row.map(UserAccount::from_row))
    }

    pub async fn find_by_email(&self, email: &str) -> AccountResult<Option<UserAccount>> {
        let row = self
            .store
            .find_by_email(&email.trim().to_lowercase())
            .await
            .map_err(AccountError::Store)?;
        Ok(row.map(UserAccount::from_row))
    }

    pub async fn find_by_remember_token(&self, token: &str) -> AccountResult<Option<UserAccount>> {
        let row = self
            .store
            .find_by_remember_token(token)
            .await
            .map_err(AccountError::Store)?;
        Ok(row.map(UserAccount::from_row))
    }

    /// Looks the account up by email and checks the password.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> AccountResult<Option<UserAccount>> {
        let Some(account) = self.find_by_email(email).await? else {
            warn!("sign in for unknown email");
            return Ok(None);
        };

        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let found = tokio::task::spawn_blocking(move || {
            let ok = account.authenticate(&hasher, &password).is_some();
            ok.then_some(account)
        })
        .await
        .map_err(|e| AccountError::Hashing(anyhow::anyhow!("password check task failed: {e}")))?;

        if found.is_none() {
            warn!("sign in with invalid password");
        }
        Ok(found)
    }

    /// Removes a persisted record. Returns false for unsaved or already deleted ones.
    pub async fn delete(&self, account: &UserAccount) -> AccountResult<bool> {
        let Some(id) = account.id() else {
            return Ok(false);
        };
        let removed = self.store.delete(id).await.map_err(AccountError::Store)?;
        if removed {
            info!(user_id = id, "user deleted");
        }
        Ok(removed)
    }

    pub async fn count(&self) -> AccountResult<i64> {
        self.store.count().await.map_err(AccountError::Store)
    }
}
