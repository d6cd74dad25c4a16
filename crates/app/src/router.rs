use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use staffbook_storage::Database;
use tracing::warn;

use crate::coordinator::Clock;
use crate::records::EmployeeRecordStore;
use crate::{api, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    records: EmployeeRecordStore,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let records = EmployeeRecordStore::new(storage.clone(), clock);
        Self {
            metrics,
            storage,
            records,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.records = EmployeeRecordStore::new(self.storage.clone(), clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn records(&self) -> &EmployeeRecordStore {
        &self.records
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/employees",
            get(api::list_employees).post(api::create_employee),
        )
        .route(
            "/api/employees/:id",
            get(api::get_employee)
                .put(api::update_employee)
                .delete(api::delete_employee),
        )
        .route(
            "/api/employees/:id/department-history",
            get(api::list_department_history),
        )
        .route("/api/departments", get(api::list_departments))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(state.storage().pool()).await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            warn!(stage = "app", error = %err, "health check could not reach database");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
