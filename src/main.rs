use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use n5study::aggregate::{InMemoryAggregateRepository, PostgresAggregateRepository};
use n5study::attempt::{InMemoryAttemptRepository, PostgresAttemptRepository};
use n5study::auth::generators::PetNameGenerator;
use n5study::leaderboard::{InMemoryLeaderboardRepository, PostgresLeaderboardRepository};
use n5study::review::{GrammarReviewer, OpenAiGrammarReviewer};
use n5study::store::RetryPolicy;
use n5study::task::{InMemoryTaskRepository, PostgresTaskRepository, TaskRepository};
use n5study::user::{InMemoryUserRepository, PostgresUserRepository};
use n5study::{build_router, AppConfig, AppState, ScoreService, TaskService, TokenConfig};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "n5study=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    info!(
        bind_address = %config.bind_address,
        persistent = config.database_url.is_some(),
        overall_board = %config.overall_board,
        "Starting N5 study server"
    );

    let retry = RetryPolicy::with_max_attempts(config.store_max_attempts);
    let (scores, tasks): (ScoreService, Arc<dyn TaskRepository>) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPool::connect(database_url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations applied");

            let scores = ScoreService::builder(Arc::new(PostgresAggregateRepository::with_retry(
                pool.clone(),
                retry,
            )))
            .with_leaderboard(Arc::new(PostgresLeaderboardRepository::new(pool.clone())))
            .with_users(Arc::new(PostgresUserRepository::new(pool.clone())))
            .with_attempts(Arc::new(PostgresAttemptRepository::new(pool.clone())));
            (
                scores
                    .with_overall_strategy(config.overall_board)
                    .with_board_limit(config.leaderboard_limit)
                    .build(),
                Arc::new(PostgresTaskRepository::new(pool)) as Arc<dyn TaskRepository>,
            )
        }
        None => {
            let scores =
                ScoreService::builder(Arc::new(InMemoryAggregateRepository::with_retry(retry)))
                    .with_leaderboard(Arc::new(InMemoryLeaderboardRepository::new()))
                    .with_users(Arc::new(InMemoryUserRepository::new()))
                    .with_attempts(Arc::new(InMemoryAttemptRepository::new()));
            (
                scores
                    .with_overall_strategy(config.overall_board)
                    .with_board_limit(config.leaderboard_limit)
                    .build(),
                Arc::new(InMemoryTaskRepository::new()) as Arc<dyn TaskRepository>,
            )
        }
    };

    let score_service = Arc::new(scores);
    let task_service = Arc::new(TaskService::new(tasks, score_service.clone()));
    let reviewer = config.openai_api_key.as_deref().map(|key| {
        Arc::new(OpenAiGrammarReviewer::from_api_key(key, &config.review_model))
            as Arc<dyn GrammarReviewer>
    });
    if reviewer.is_none() {
        info!("OPENAI_API_KEY not set, grammar review will answer 500");
    }

    let app_state = AppState::new(
        TokenConfig::new(config.jwt_secret.clone(), config.session_expiration_days),
        Arc::new(PetNameGenerator::new()),
        score_service,
        task_service,
        reviewer,
    );
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server running on http://{}", config.bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
