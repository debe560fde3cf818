//! Liveness and readiness endpoints.
//!
//! `/health` answers as long as the process is up and reports the database
//! separately; `/health/ready` fails with 503 when the database is down.

use std::{sync::Arc, time::SystemTime};

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// Basic health status
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: Arc<DatabaseConnection>,
    pub start_time: SystemTime,
}

impl HealthState {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self {
            db_pool,
            start_time: SystemTime::now(),
        }
    }

    pub fn uptime(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    async fn probe(&self) -> HealthInfo {
        let database = match crate::db::check_connection(&self.db_pool).await {
            Ok(()) => HealthStatus::Up,
            Err(e) => {
                error!("Database health check failed: {}", e);
                HealthStatus::Down
            }
        };
        HealthInfo {
            status: HealthStatus::Up,
            database,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime(),
            timestamp: Utc::now(),
        }
    }
}

/// Liveness with a database ping
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Process is alive", body = HealthInfo)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<Arc<HealthState>>) -> Json<HealthInfo> {
    Json(state.probe().await)
}

/// Readiness: the database must answer
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready to serve", body = HealthInfo),
        (status = 503, description = "Database unavailable", body = HealthInfo)
    ),
    tag = "Health"
)]
pub async fn readiness_check(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthInfo>) {
    let mut info = state.probe().await;
    if info.database == HealthStatus::Down {
        info.status = HealthStatus::Down;
        return (StatusCode::SERVICE_UNAVAILABLE, Json(info));
    }
    (StatusCode::OK, Json(info))
}

/// Creates router with health check endpoints
pub fn health_routes(db_pool: Arc<DatabaseConnection>) -> Router {
    let state = Arc::new(HealthState::new(db_pool));
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state)
}
