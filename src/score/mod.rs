pub mod handlers;
pub mod service;
pub mod types;

pub use service::{ScoreService, ScoreServiceBuilder, DEFAULT_BOARD_LIMIT, MAX_BOARD_LIMIT};
pub use types::{
    CommitError, CommitReceipt, CommitRequest, DayTally, Progress, ProgressTotals, MAX_RUN_COUNT,
};
