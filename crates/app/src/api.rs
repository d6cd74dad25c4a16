use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use staffbook_core::validation::{validate_employee, validate_id, validate_pagination};
use staffbook_core::{DeleteConfirmation, Department, Employee, EmployeePage, HistoryPage};

use crate::problem::ProblemResponse;
use crate::records::RecordError;
use crate::router::AppState;

type ApiResult<T> = Result<T, ProblemResponse>;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

pub async fn list_employees(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<EmployeePage>> {
    let pagination = validate_pagination(query.page.as_deref(), query.limit.as_deref())
        .map_err(RecordError::from)?;
    let page = state.records().list(pagination).await?;
    Ok(Json(page))
}

pub async fn get_employee(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Employee>> {
    let id = validate_id("id", &raw_id).map_err(RecordError::from)?;
    let employee = state.records().get_one(id).await?;
    Ok(Json(employee))
}

pub async fn create_employee(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Employee>)> {
    let Json(body) = payload.map_err(invalid_body)?;
    let fields = validate_employee(&body).map_err(RecordError::from)?;
    let employee = state.records().create(&fields).await?;
    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Employee>> {
    let id = validate_id("id", &raw_id).map_err(RecordError::from)?;
    let Json(body) = payload.map_err(invalid_body)?;
    let fields = validate_employee(&body).map_err(RecordError::from)?;
    let employee = state.records().update(id, &fields).await?;
    Ok(Json(employee))
}

pub async fn delete_employee(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<DeleteConfirmation>> {
    let id = validate_id("id", &raw_id).map_err(RecordError::from)?;
    let confirmation = state.records().delete(id).await?;
    Ok(Json(confirmation))
}

pub async fn list_department_history(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<HistoryPage>> {
    let employee_id = validate_id("employeeId", &raw_id).map_err(RecordError::from)?;
    let pagination = validate_pagination(query.page.as_deref(), query.limit.as_deref())
        .map_err(RecordError::from)?;
    let page = state
        .records()
        .list_department_history(employee_id, pagination)
        .await?;
    Ok(Json(page))
}

pub async fn list_departments(State(state): State<AppState>) -> ApiResult<Json<Vec<Department>>> {
    let departments = state.records().list_departments().await?;
    Ok(Json(departments))
}

fn invalid_body(rejection: JsonRejection) -> ProblemResponse {
    counter!("api_errors_total", "kind" => "invalid_body").increment(1);
    ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
}

impl From<RecordError> for ProblemResponse {
    fn from(err: RecordError) -> Self {
        counter!("api_errors_total", "kind" => err.kind()).increment(1);
        match err {
            RecordError::Validation(errors) => ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "validation_failed",
                "request failed validation",
            )
            .with_errors(errors.into_errors()),
            RecordError::NotFound { entity, id } => ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{entity} {id} not found"),
            ),
            RecordError::Internal(failure) => {
                error!(stage = "api", error = %failure, "request failed");
                ProblemResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error",
                )
            }
        }
    }
}
