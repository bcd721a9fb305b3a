use std::sync::Arc;

use anyhow::Context;

use onboard_infra::{ApiConfig, DatabaseConfig, EntityStore, PostgresEntityStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    onboard_observability::init();

    let db = DatabaseConfig::from_env().context("database configuration")?;
    let api = ApiConfig::from_env().context("api configuration")?;

    let pool = db.connect().await.context("failed to connect to postgres")?;
    let store = PostgresEntityStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;

    let store: Arc<dyn EntityStore> = Arc::new(store);
    let app = onboard_api::app::build_app(store);

    let listener = tokio::net::TcpListener::bind(api.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", api.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
