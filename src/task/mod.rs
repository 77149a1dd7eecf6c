pub mod handlers;
pub mod models;
pub mod repository;
pub mod service;

pub use models::{TaskStatus, TaskToggle};
pub use repository::{InMemoryTaskRepository, PostgresTaskRepository, TaskRepository};
pub use service::{TaskError, TaskService, ToggleResult};
