pub mod feed;
pub mod handlers;
pub mod live;
pub mod models;
pub mod repository;

pub use feed::LeaderboardFeed;
pub use live::{LiveBoard, SocketError, SocketWrapper};
pub use models::{
    LeaderboardEntry, LeaderboardScope, LeaderboardSnapshot, MirrorOutcome, MirrorUpdate,
    OverallStrategy,
};
pub use repository::{
    InMemoryLeaderboardRepository, LeaderboardRepository, PostgresLeaderboardRepository,
};
