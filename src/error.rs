use thiserror::Error;

use crate::users::validation::ValidationErrors;

pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum AccountError {
    /// One or more field rules failed; nothing was written.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Passed through from the store as-is, including unique constraint races.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("password hashing failed: {0:#}")]
    Hashing(anyhow::Error),
}

impl From<ValidationErrors> for AccountError {
    fn from(errors: ValidationErrors) -> Self {
        AccountError::Validation(errors)
    }
}

impl AccountError {
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            AccountError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
