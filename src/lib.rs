// Library crate for the N5 study server
// This file exposes the public API for the binary and integration tests

pub mod aggregate;
pub mod attempt;
pub mod auth;
pub mod clock;
pub mod config;
pub mod leaderboard;
pub mod practice;
pub mod review;
pub mod routes;
pub mod score;
pub mod scoring;
pub mod shared;
pub mod store;
pub mod task;
pub mod user;

// Re-export commonly used types for easier access in tests
pub use auth::{AuthUser, TokenConfig};
pub use clock::DateKey;
pub use config::AppConfig;
pub use routes::build_router;
pub use score::{CommitReceipt, CommitRequest, ScoreService};
pub use shared::{AppError, AppState};
pub use task::TaskService;
