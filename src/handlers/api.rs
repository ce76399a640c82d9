use axum::response::Json;
use serde_json::{Value, json};

/// Liveness probe, also reports the running version
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
