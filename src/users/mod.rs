mod memory;
pub mod model;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod token;
pub mod validation;

pub use memory::MemoryUserStore;
pub use model::{NewUserAccount, Taken, UserAccount};
pub use repo::{PgUserStore, UserStore};
pub use services::AccountService;
pub use validation::{Field, FieldError, Rule, ValidationErrors};
