pub mod health;
pub mod probe;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/probe", get(probe::probe_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
