pub mod models;
pub mod repository;

pub use models::{
    AggregateTotals, AppliedAggregates, ApplyDeltas, ApplyPlan, DailyAggregate, OverallAggregate,
};
pub use repository::{
    AggregateRepository, InMemoryAggregateRepository, PostgresAggregateRepository,
};
