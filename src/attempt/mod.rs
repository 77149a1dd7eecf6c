pub mod models;
pub mod repository;

pub use models::Attempt;
pub use repository::{AttemptRepository, InMemoryAttemptRepository, PostgresAttemptRepository};
