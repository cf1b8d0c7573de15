use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::error::{ErrorKind, LibError};
use crate::identity::AuthenticatedCaller;
use crate::models::{
    CreateFlowPayload, ExportQuery, FlowId, HistoryQuery, ListFlowsQuery, UpdateFlowPayload,
};
use crate::operations::FlowOperations;
use crate::store::FlowStore;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::DuplicateVersion => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "flow api request failed");
        } else {
            tracing::warn!(kind = ?self.0.kind, error = %self.0.source, "flow api request rejected");
        }

        let mut error = json!({
            "code": self.0.code,
            "message": self.0.public,
        });
        if let Some(details) = &self.0.details {
            error["details"] = json!(details);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub trait HasFlowStore {
    type Store: FlowStore + 'static;

    fn store(&self) -> Arc<Self::Store>;
}

pub trait FlowApp: HasFlowStore {
    fn operations(&self) -> FlowOperations<Self::Store> {
        FlowOperations::new(self.store())
    }
}

async fn create_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Json(payload): Json<CreateFlowPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let flow = app.operations().create_flow(caller.id(), payload).await?;
    Ok((StatusCode::CREATED, Json(flow)))
}

async fn list_flows_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Query(query): Query<ListFlowsQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let page = app.operations().list_flows(caller.id(), query).await?;
    Ok(Json(page))
}

async fn get_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let flow = app.operations().get_flow(caller.id(), flow_id).await?;
    Ok(Json(flow))
}

async fn update_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
    Json(payload): Json<UpdateFlowPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let flow = app
        .operations()
        .update_flow(caller.id(), flow_id, payload)
        .await?;
    Ok(Json(flow))
}

async fn delete_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    app.operations().delete_flow(caller.id(), flow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let saved = app
        .operations()
        .save_flow(caller.id(), flow_id, payload)
        .await?;
    Ok(Json(saved))
}

async fn export_flow_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let exported = app
        .operations()
        .export_flow(caller.id(), flow_id, query)
        .await?;
    Ok(Json(exported))
}

async fn flow_history_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let page = app
        .operations()
        .history(caller.id(), flow_id, query)
        .await?;
    Ok(Json(page))
}

async fn latest_version_handler<S>(
    State(app): State<S>,
    caller: AuthenticatedCaller,
    Path(flow_id): Path<FlowId>,
) -> Result<impl IntoResponse, AppError>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    let snapshot = app
        .operations()
        .latest_version(caller.id(), flow_id)
        .await?;
    Ok(Json(snapshot))
}

pub fn routes<S>() -> Router<S>
where
    S: FlowApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /flow [GET,POST]");
    tracing::info!("Registering route /flow/{{flow_id}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /flow/{{flow_id}}/save [POST]");
    tracing::info!("Registering route /flow/{{flow_id}}/export [GET]");
    tracing::info!("Registering route /flow/{{flow_id}}/versions [GET]");
    tracing::info!("Registering route /flow/{{flow_id}}/versions/latest [GET]");

    Router::new()
        .route(
            "/flow",
            get(list_flows_handler::<S>).post(create_flow_handler::<S>),
        )
        .route(
            "/flow/{flow_id}",
            get(get_flow_handler::<S>)
                .put(update_flow_handler::<S>)
                .delete(delete_flow_handler::<S>),
        )
        .route("/flow/{flow_id}/save", post(save_flow_handler::<S>))
        .route("/flow/{flow_id}/export", get(export_flow_handler::<S>))
        .route("/flow/{flow_id}/versions", get(flow_history_handler::<S>))
        .route(
            "/flow/{flow_id}/versions/latest",
            get(latest_version_handler::<S>),
        )
}
