use library_circulation::{
    adapters::memory::membership::MembershipService as MockMembershipService,
    adapters::postgres::PostgresStore,
    api::{handlers::AppState, router::create_router},
    application::circulation::{ServiceDependencies, expire_reservations},
    domain::FinePolicy,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 失効バッチの実行間隔（秒）
const EXPIRY_SWEEP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "library_circulation=debug,tower_http=debug,axum=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection URL
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/circulation".into());

    tracing::info!("Database URL: {}", database_url);

    // Initialize database connection pool
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run pending migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Initialize adapters
    let store = Arc::new(PostgresStore::new(pool.clone()));
    let membership = Arc::new(MockMembershipService::new());

    // Create service dependencies
    let service_deps = ServiceDependencies {
        store,
        membership,
        fine_policy: FinePolicy::from_env(),
    };

    // 期限切れ予約を定期的に失効させるスケジューラ
    let sweep_deps = service_deps.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(EXPIRY_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match expire_reservations(&sweep_deps, chrono::Utc::now()).await {
                Ok(outcomes) if !outcomes.is_empty() => {
                    tracing::info!("expiry sweep processed {} reservations", outcomes.len());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("expiry sweep failed: {}", e);
                }
            }
        }
    });

    // Create application state
    let app_state = Arc::new(AppState { service_deps });

    // Create router
    let app = create_router(app_state);

    // Server configuration
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    // Start server
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
