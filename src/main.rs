use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use insight_agent::AppState;
use insight_agent::handlers::{ask_handler, health_check};
use insight_agent::init::app_init;

fn create_app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agent/ask", axum::routing::post(ask_handler))
        .route("/health", axum::routing::get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting tabular insight agent...");
    dotenv::dotenv().ok();

    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("🌐 Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
