use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use n5study::{
    aggregate::InMemoryAggregateRepository,
    auth::generators::PetNameGenerator,
    clock::ManualClock,
    leaderboard::OverallStrategy,
    task::InMemoryTaskRepository,
    build_router, AppState, ScoreService, TaskService, TokenConfig,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub const TEST_SECRET: &str = "integration-secret";

/// 2024-05-01 10:00 in Tokyo, still 2024-05-01 in UTC
pub fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()
}

#[derive(Clone)]
pub struct TestSetup {
    pub app: Router,
    pub scores: Arc<ScoreService>,
    pub clock: Arc<ManualClock>,
}

pub struct TestSetupBuilder {
    start: DateTime<Utc>,
    overall: OverallStrategy,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            start: morning(),
            overall: OverallStrategy::Mirrored,
        }
    }

    #[allow(dead_code)]
    pub fn with_fan_in_overall(mut self) -> Self {
        self.overall = OverallStrategy::FanIn;
        self
    }

    pub fn build(self) -> TestSetup {
        let clock = Arc::new(ManualClock::new(self.start));
        let scores = Arc::new(
            ScoreService::builder(Arc::new(InMemoryAggregateRepository::new()))
                .with_clock(clock.clone())
                .with_overall_strategy(self.overall)
                .build(),
        );
        let tasks = Arc::new(TaskService::new(
            Arc::new(InMemoryTaskRepository::new()),
            scores.clone(),
        ));
        let state = AppState::new(
            TokenConfig::new(TEST_SECRET, 1),
            Arc::new(PetNameGenerator::new()),
            scores.clone(),
            tasks,
            None,
        );

        TestSetup {
            app: build_router(state),
            scores,
            clock,
        }
    }
}
