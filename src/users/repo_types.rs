use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub display_name: Option<String>,
    pub normalized_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>, // Argon2 PHC string
    pub remember_token: Option<String>,
    pub verified: bool,
    pub verification_pass: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Columns written by an insert or update; id and timestamps belong to the store.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub display_name: Option<String>,
    pub normalized_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub remember_token: String,
    pub verified: bool,
    pub verification_pass: Option<String>,
}
