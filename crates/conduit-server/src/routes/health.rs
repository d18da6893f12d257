//! `GET /health` — grounded in the teacher's `HealthResponse` shape.

use std::collections::HashMap;

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub features: HashMap<String, bool>,
}

pub async fn health() -> Json<HealthResponse> {
    let mut features = HashMap::new();
    features.insert("event_bus".to_string(), true);
    features.insert("approvals".to_string(), true);
    features.insert("transport_edge".to_string(), true);

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        features,
    })
}
