//! The synchronization subsystem's HTTP shell (§6): auth, `/sync/push`,
//! `/sync/pull`, and the change-request moderation endpoints, wired the way
//! this codebase's existing server binary wires its own routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use sync_server::config::Config;
use sync_server::state::AppState;
use sync_server::{auth, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sync_server=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;

    info!("connecting to postgres");
    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    info!("postgres connected");

    let state = AppState::new(pool, config);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/sync/push", post(handlers::sync::push))
        .route("/sync/pull", get(handlers::sync::pull))
        .route("/changes", get(handlers::changes::list))
        .route("/changes/:id/apply", post(handlers::changes::apply))
        .route("/changes/:id/reject", post(handlers::changes::reject))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_actor));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    info!(addr = state.config.bind_addr.as_str(), "sync-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
