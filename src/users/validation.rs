use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

pub const DISPLAY_NAME_MAX_LEN: usize = 50;
pub const PASSWORD_MIN_LEN: usize = 6;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"\A[A-Za-z0-9_.]*\z").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"\A[A-Za-z0-9_+\-.]+@[A-Za-z0-9\-.]+\.[A-Za-z]+\z").unwrap();
}

pub(crate) fn is_valid_display_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DisplayName,
    NormalizedName,
    Email,
    Password,
    PasswordConfirmation,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Field::DisplayName => "display_name",
            Field::NormalizedName => "normalized_name",
            Field::Email => "email",
            Field::Password => "password",
            Field::PasswordConfirmation => "password_confirmation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Presence,
    Format,
    Length,
    Uniqueness,
    Confirmation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Field,
    pub rule: Rule,
    pub message: String,
}

/// Every failed rule from one validation pass, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: Field, rule: Rule, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            rule,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn on(&self, field: Field) -> impl Iterator<Item = &FieldError> {
        self.0.iter().filter(move |e| e.field == field)
    }

    pub fn has(&self, field: Field, rule: Rule) -> bool {
        self.0.iter().any(|e| e.field == field && e.rule == rule)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
