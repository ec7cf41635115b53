use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{ApiResponse, CalculateRequest, CalculationSummary, EstimationView, FinalizeRequest};
use crate::error::EstimationError;
use crate::startup::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, EstimationError>;

#[tracing::instrument(skip(state, payload))]
pub async fn create_estimation(
    State(state): State<AppState>,
    payload: Result<Json<CalculateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<CalculationSummary>>), EstimationError> {
    let Json(request) = payload?;
    request.validate()?;

    let estimation = state.engine.calculate(&request).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(CalculationSummary::from(&estimation))),
    ))
}

#[tracing::instrument(skip(state, path))]
pub async fn get_estimation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<EstimationView> {
    let Path(estimation_id) = path?;
    let estimation = state.engine.get(estimation_id).await?;
    Ok(Json(ApiResponse::ok(EstimationView::from(&estimation))))
}

#[tracing::instrument(skip(state, path, payload))]
pub async fn finalize_estimation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> ApiResult<EstimationView> {
    let Path(estimation_id) = path?;
    let Json(request) = payload?;

    let estimation = state
        .engine
        .finalize(estimation_id, request.approved_by)
        .await?;
    Ok(Json(ApiResponse::ok(EstimationView::from(&estimation))))
}

#[tracing::instrument(skip(state, path))]
pub async fn recalculate_estimation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<CalculationSummary> {
    let Path(estimation_id) = path?;
    let estimation = state.engine.recalculate(estimation_id, None).await?;
    Ok(Json(ApiResponse::ok(CalculationSummary::from(&estimation))))
}

#[tracing::instrument(skip(state, path))]
pub async fn list_case_estimations(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Vec<EstimationView>> {
    let Path(case_id) = path?;
    let estimations = state.engine.list_for_case(case_id).await?;
    Ok(Json(ApiResponse::ok(
        estimations.iter().map(EstimationView::from).collect(),
    )))
}

/// `data` is null when the case has no estimations yet.
#[tracing::instrument(skip(state, path))]
pub async fn latest_case_estimation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Option<EstimationView>> {
    let Path(case_id) = path?;
    let latest = state.engine.latest_for_case(case_id).await?;
    Ok(Json(ApiResponse::ok(latest.as_ref().map(EstimationView::from))))
}
