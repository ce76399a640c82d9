use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, tts};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/tts/convert", post(tts::convert))
        .route("/tts/providers", get(tts::list_providers))
        .route("/tts/jobs/{job_id}", get(tts::get_job).delete(tts::delete_job))
        .route("/tts/jobs/{job_id}/audio", get(tts::get_audio))
        .layer(TraceLayer::new_for_http())
}
