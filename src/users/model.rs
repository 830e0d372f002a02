use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use super::password::PasswordHasher;
use super::repo_types::{UserChanges, UserRow};
use super::validation::{
    is_blank, is_valid_display_name, is_valid_email, Field, Rule, ValidationErrors,
    DISPLAY_NAME_MAX_LEN, PASSWORD_MIN_LEN,
};

/// Input for a brand new account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUserAccount {
    pub display_name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Result of the store's uniqueness probes for one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Taken {
    pub name: bool,
    pub email: bool,
}

/// A user account, persisted or not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserAccount {
    id: Option<i64>,
    display_name: Option<String>,
    normalized_name: Option<String>,
    email: Option<String>,
    #[serde(skip_serializing)]
    password_hash: Option<String>,
    remember_token: Option<String>,
    verified: bool,
    verification_pass: Option<String>,
    created_at: Option<OffsetDateTime>,
    updated_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    password: Option<String>,
    #[serde(skip_serializing)]
    password_confirmation: Option<String>,
}

impl UserAccount {
    pub fn new(input: NewUserAccount) -> Self {
        let mut account = Self {
            display_name: Some(input.display_name),
            email: Some(input.email),
            password: Some(input.password),
            password_confirmation: Some(input.password_confirmation),
            ..Self::default()
        };
        account.derive_normalized_name();
        account
    }

    pub(crate) fn from_row(row: UserRow) -> Self {
        let mut account = Self::default();
        account.apply_row(row);
        account
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn normalized_name(&self) -> Option<&str> {
        self.normalized_name.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn password_confirmation(&self) -> Option<&str> {
        self.password_confirmation.as_deref()
    }

    pub fn remember_token(&self) -> Option<&str> {
        self.remember_token.as_deref()
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn verification_pass(&self) -> Option<&str> {
        self.verification_pass.as_deref()
    }

    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<OffsetDateTime> {
        self.updated_at
    }

    /// Stores the name verbatim. `normalized_name` follows on the next
    /// `derive_normalized_name`, which every save runs.
    pub fn set_display_name(&mut self, value: Option<&str>) {
        self.display_name = value.map(str::to_owned);
    }

    pub fn set_email(&mut self, value: Option<&str>) {
        self.email = value.map(str::to_owned);
    }

    pub fn set_password(&mut self, value: Option<&str>) {
        self.password = value.map(str::to_owned);
    }

    pub fn set_password_confirmation(&mut self, value: Option<&str>) {
        self.password_confirmation = value.map(str::to_owned);
    }

    pub fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
    }

    /// A missing display name leaves `normalized_name` as it was.
    // NOTE: this can leave normalized_name stale after set_display_name(None);
    // validation still rejects the record because display_name is blank.
    pub fn derive_normalized_name(&mut self) {
        if let Some(name) = &self.display_name {
            self.normalized_name = Some(name.to_lowercase());
        }
    }

    /// Runs the derivations every save starts with.
    pub fn normalize(&mut self) {
        self.derive_normalized_name();
        if let Some(email) = self.email.as_mut() {
            *email = email.to_lowercase();
        }
    }

    /// True when the next save has to hash a new password.
    pub fn password_pending(&self) -> bool {
        self.password.is_some()
    }

    /// Checks every rule against the current field values and collects all
    /// failures. Uniqueness comes from `taken`, which the caller gets from the store.
    pub fn validate(&self, taken: Taken) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                if !is_valid_display_name(name) {
                    errors.add(Field::DisplayName, Rule::Format, "is invalid");
                }
                if name.chars().count() > DISPLAY_NAME_MAX_LEN {
                    errors.add(
                        Field::DisplayName,
                        Rule::Length,
                        format!("is too long (maximum is {DISPLAY_NAME_MAX_LEN} characters)"),
                    );
                }
            }
            _ => errors.add(Field::DisplayName, Rule::Presence, "can't be blank"),
        }

        if taken.name && self.normalized_name.is_some() {
            errors.add(Field::NormalizedName, Rule::Uniqueness, "has already been taken");
        }

        match self.email.as_deref() {
            Some(email) if !email.trim().is_empty() => {
                if !is_valid_email(email) {
                    errors.add(Field::Email, Rule::Format, "is invalid");
                }
                if taken.email {
                    errors.add(Field::Email, Rule::Uniqueness, "has already been taken");
                }
            }
            _ => errors.add(Field::Email, Rule::Presence, "can't be blank"),
        }

        match self.password.as_deref() {
            Some(password) => {
                if password.trim().is_empty() {
                    errors.add(Field::Password, Rule::Presence, "can't be blank");
                }
                if password.chars().count() < PASSWORD_MIN_LEN {
                    errors.add(
                        Field::Password,
                        Rule::Length,
                        format!("is too short (minimum is {PASSWORD_MIN_LEN} characters)"),
                    );
                }
                let confirmation = self.password_confirmation.as_deref();
                if is_blank(confirmation) {
                    errors.add(Field::PasswordConfirmation, Rule::Presence, "can't be blank");
                } else if confirmation != Some(password) {
                    errors.add(
                        Field::PasswordConfirmation,
                        Rule::Confirmation,
                        "doesn't match password",
                    );
                }
            }
            None if self.password_hash.is_none() => {
                errors.add(Field::Password, Rule::Presence, "can't be blank");
            }
            None => {}
        }

        errors.into_result()
    }

    /// Column values for the next write. Tokens and the hash are supplied by
    /// the save pipeline; nothing on `self` changes until the write succeeds.
    pub(crate) fn changes(
        &self,
        password_hash: Option<String>,
        remember_token: String,
        verification_pass: Option<String>,
    ) -> UserChanges {
        UserChanges {
            display_name: self.display_name.clone(),
            normalized_name: self.normalized_name.clone(),
            email: self.email.clone(),
            password_hash: password_hash.or_else(|| self.password_hash.clone()),
            remember_token,
            verified: if self.is_new() { false } else { self.verified },
            verification_pass: verification_pass.or_else(|| self.verification_pass.clone()),
        }
    }

    /// Takes the stored row as the new state and drops the plaintext password.
    pub(crate) fn apply_row(&mut self, row: UserRow) {
        self.id = Some(row.id);
        self.display_name = row.display_name;
        self.normalized_name = row.normalized_name;
        self.email = row.email;
        self.password_hash = row.password_hash;
        self.remember_token = row.remember_token;
        self.verified = row.verified;
        self.verification_pass = row.verification_pass;
        self.created_at = Some(row.created_at);
        self.updated_at = Some(row.updated_at);
        self.password = None;
        self.password_confirmation = None;
    }

    /// `Some(self)` when `candidate` matches the stored hash. Any failure,
    /// including a missing or unparsable hash, is `None`.
    pub fn authenticate(&self, hasher: &PasswordHasher, candidate: &str) -> Option<&Self> {
        let hash = self.password_hash.as_deref()?;
        match hasher.verify(candidate, hash) {
            Ok(true) => Some(self),
            Ok(false) => None,
            Err(e) => {
                debug!(error = %e, user_id = ?self.id, "authenticate failed on stored hash");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::password::cheap_hasher;

    fn valid_account() -> UserAccount {
        UserAccount::new(NewUserAccount {
            display_name: "kalmas".into(),
            email: "user@example.com".into(),
            password: "foobar".into(),
            password_confirmation: "foobar".into(),
        })
    }

    fn errors_of(account: &UserAccount) -> ValidationErrors {
        account.validate(Taken::default()).unwrap_err()
    }

    #[test]
    fn fresh_account_is_valid() {
        let account = valid_account();
        assert!(account.validate(Taken::default()).is_ok());
        assert!(account.is_new());
        assert!(!account.verified());
        assert_eq!(account.normalized_name(), Some("kalmas"));
    }

    #[test]
    fn constructor_derives_normalized_name() {
        let account = UserAccount::new(NewUserAccount {
            display_name: "Kyle.Almas".into(),
            email: "user@example.com".into(),
            password: "foobar".into(),
            password_confirmation: "foobar".into(),
        });
        assert_eq!(account.display_name(), Some("Kyle.Almas"));
        assert_eq!(account.normalized_name(), Some("kyle.almas"));
    }

    #[test]
    fn derivation_lowercases_display_name() {
        let mut account = valid_account();
        account.set_display_name(Some("Kalmas"));
        account.derive_normalized_name();
        assert_eq!(account.normalized_name(), Some("kalmas"));
    }

    #[test]
    fn missing_display_name_leaves_normalized_name() {
        let mut account = valid_account();
        account.set_display_name(None);
        account.derive_normalized_name();
        assert_eq!(account.display_name(), None);
        assert_eq!(account.normalized_name(), Some("kalmas"));
    }

    #[test]
    fn blank_display_name_is_invalid() {
        let mut account = valid_account();
        account.set_display_name(Some(" "));
        assert!(errors_of(&account).has(Field::DisplayName, Rule::Presence));
    }

    #[test]
    fn nil_display_name_is_invalid() {
        let mut account = valid_account();
        account.set_display_name(None);
        assert!(errors_of(&account).has(Field::DisplayName, Rule::Presence));
    }

    #[test]
    fn long_display_name_is_invalid() {
        let mut account = valid_account();
        account.set_display_name(Some(&"a".repeat(51)));
        assert!(errors_of(&account).has(Field::DisplayName, Rule::Length));

        account.set_display_name(Some(&"a".repeat(50)));
        assert!(account.validate(Taken::default()).is_ok());
    }

    #[test]
    fn display_name_format() {
        let mut account = valid_account();
        for bad in ["kyle almas", "kyle#"] {
            account.set_display_name(Some(bad));
            assert!(errors_of(&account).has(Field::DisplayName, Rule::Format), "{bad}");
        }
        for ok in ["kyle.almas", "KALMAS1", "kyle_almas"] {
            account.set_display_name(Some(ok));
            assert!(account.validate(Taken::default()).is_ok(), "{ok}");
        }
    }

    #[test]
    fn taken_name_is_invalid() {
        let account = valid_account();
        let errors = account
            .validate(Taken { name: true, email: false })
            .unwrap_err();
        assert!(errors.has(Field::NormalizedName, Rule::Uniqueness));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn blank_or_nil_email_is_invalid() {
        let mut account = valid_account();
        account.set_email(Some(" "));
        assert!(errors_of(&account).has(Field::Email, Rule::Presence));
        account.set_email(None);
        assert!(errors_of(&account).has(Field::Email, Rule::Presence));
    }

    #[test]
    fn email_format() {
        let mut account = valid_account();
        for bad in [
            "user@foo,com",
            "user_at_foo.org",
            "example.user@foo.",
            "foo@bar_baz.com",
            "foo@bar+baz.com",
        ] {
            account.set_email(Some(bad));
            assert!(errors_of(&account).has(Field::Email, Rule::Format), "{bad}");
        }
        for ok in ["user@foo.COM", "A_US-ER@f.b.org", "frst.lst@foo.jp", "a+b@baz.cn"] {
            account.set_email(Some(ok));
            assert!(account.validate(Taken::default()).is_ok(), "{ok}");
        }
    }

    #[test]
    fn normalize_lowercases_email() {
        let mut account = valid_account();
        account.set_email(Some("Foo@ExAMPle.CoM"));
        account.normalize();
        assert_eq!(account.email(), Some("foo@example.com"));
    }

    #[test]
    fn taken_email_is_invalid() {
        let errors = valid_account()
            .validate(Taken { name: false, email: true })
            .unwrap_err();
        assert!(errors.has(Field::Email, Rule::Uniqueness));
    }

    #[test]
    fn blank_password_is_invalid() {
        let mut account = valid_account();
        account.set_password(Some(" "));
        account.set_password_confirmation(Some(" "));
        let errors = errors_of(&account);
        assert!(errors.has(Field::Password, Rule::Presence));
        assert!(errors.has(Field::PasswordConfirmation, Rule::Presence));
    }

    #[test]
    fn whitespace_password_of_full_length_is_invalid() {
        let mut account = valid_account();
        account.set_password(Some("      "));
        account.set_password_confirmation(Some("      "));
        assert!(errors_of(&account).has(Field::Password, Rule::Presence));
    }

    #[test]
    fn short_password_is_invalid() {
        let mut account = valid_account();
        account.set_password(Some("aaaaa"));
        account.set_password_confirmation(Some("aaaaa"));
        let errors = errors_of(&account);
        assert!(errors.has(Field::Password, Rule::Length));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn mismatched_confirmation_is_invalid() {
        let mut account = valid_account();
        account.set_password_confirmation(Some("mismatch"));
        assert!(errors_of(&account).has(Field::PasswordConfirmation, Rule::Confirmation));
    }

    #[test]
    fn nil_confirmation_is_invalid() {
        let mut account = valid_account();
        account.set_password_confirmation(None);
        assert!(errors_of(&account).has(Field::PasswordConfirmation, Rule::Presence));
    }

    #[test]
    fn account_without_any_password_is_invalid() {
        let mut account = valid_account();
        account.set_password(None);
        account.set_password_confirmation(None);
        assert!(errors_of(&account).has(Field::Password, Rule::Presence));
    }

    #[test]
    fn all_failures_are_collected() {
        let account = UserAccount::default();
        let errors = account.validate(Taken::default()).unwrap_err();
        assert!(errors.has(Field::DisplayName, Rule::Presence));
        assert!(errors.has(Field::Email, Rule::Presence));
        assert!(errors.has(Field::Password, Rule::Presence));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn changes_for_new_account_force_unverified() {
        let mut account = valid_account();
        account.set_verified(true);
        let changes = account.changes(Some("hash".into()), "remember".into(), Some("pass".into()));
        assert!(!changes.verified);
        assert_eq!(changes.password_hash.as_deref(), Some("hash"));
        assert_eq!(changes.verification_pass.as_deref(), Some("pass"));
        // nothing is written back before the store accepts the row
        assert!(account.remember_token().is_none());
        assert!(account.password_hash().is_none());
    }

    #[test]
    fn authenticate_without_hash_is_none() {
        let account = valid_account();
        assert!(account.authenticate(&cheap_hasher(), "foobar").is_none());
    }

    #[test]
    fn authenticate_checks_stored_hash() {
        let hasher = cheap_hasher();
        let mut account = valid_account();
        account.password_hash = Some(hasher.hash("foobar").unwrap());
        let found = account.authenticate(&hasher, "foobar");
        assert!(std::ptr::eq(found.unwrap(), &account));
        assert!(account.authenticate(&hasher, "invalid").is_none());
    }

    #[test]
    fn authenticate_with_corrupt_hash_is_none() {
        let mut account = valid_account();
        account.password_hash = Some("not-a-valid-hash".into());
        assert!(account.authenticate(&cheap_hasher(), "foobar").is_none());
    }

    #[test]
    fn serialization_skips_password_material() {
        let mut account = valid_account();
        account.password_hash = Some("$argon2id$secret".into());
        let json = serde_json::to_string(&account).unwrap();
        assert!(json.contains("kalmas"));
        assert!(json.contains("user@example.com"));
        assert!(!json.contains("foobar"));
        assert!(!json.contains("argon2id"));
    }
}
