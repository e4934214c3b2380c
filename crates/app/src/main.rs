mod auth;
mod awards;
mod badges;
mod forms;
mod problem;
mod router;
mod telemetry;
mod uploads;

use std::net::SocketAddr;

use tracing::info;

use badger_storage::Database;
use badger_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;
    if let Some(path) = env_file {
        info!(stage = "config", path = %path.display(), "loaded env file");
    }

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    tokio::fs::create_dir_all(&config.media_root).await?;

    let state = router::AppState::new(metrics, database, &config);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        creator_badge = %config.creator_badge_slug,
        tags = config.tags_enabled,
        cascade = config.prerequisite_cascade,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
