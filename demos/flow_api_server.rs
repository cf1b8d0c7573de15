use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use subseq_flow::api::{FlowApp, HasFlowStore};
use subseq_flow::db::{PgFlowStore, create_flow_tables};
use subseq_flow::identity::{AuthenticatedCaller, UserId};
use subseq_flow::memory::MemoryFlowStore;
use subseq_flow::store::FlowStore;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Clone)]
struct DevAuthConfig {
    default_user_id: Uuid,
    require_dev_header: bool,
}

struct ExampleApp<S> {
    store: Arc<S>,
    auth: DevAuthConfig,
}

impl<S> Clone for ExampleApp<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            auth: self.auth.clone(),
        }
    }
}

impl<S: FlowStore + 'static> HasFlowStore for ExampleApp<S> {
    type Store = S;

    fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }
}

impl<S: FlowStore + 'static> FlowApp for ExampleApp<S> {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("FLOW_EXAMPLE_BIND").unwrap_or_else(|_| "127.0.0.1:4010".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid FLOW_EXAMPLE_BIND '{}'", bind))?;

    let default_user_id = env::var("FLOW_EXAMPLE_DEFAULT_USER_ID")
        .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".to_string());
    let default_user_id = Uuid::parse_str(&default_user_id).with_context(|| {
        format!("invalid FLOW_EXAMPLE_DEFAULT_USER_ID '{}'", default_user_id)
    })?;
    let auth = DevAuthConfig {
        default_user_id,
        require_dev_header: env_flag("FLOW_EXAMPLE_REQUIRE_DEV_HEADER"),
    };

    match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await
                .context("failed to connect to postgres")?;
            create_flow_tables(&pool)
                .await
                .context("failed to run flow migrations")?;
            tracing::info!("using postgres flow store");
            serve(PgFlowStore::from_pool(&pool), auth, bind_addr).await
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, flows are kept in memory");
            serve(MemoryFlowStore::new(), auth, bind_addr).await
        }
    }
}

async fn serve<S: FlowStore + 'static>(
    store: S,
    auth: DevAuthConfig,
    bind_addr: SocketAddr,
) -> anyhow::Result<()> {
    let app_state = ExampleApp {
        store: Arc::new(store),
        auth,
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .route("/example/whoami", get(whoami_handler))
        .merge(subseq_flow::api::routes::<ExampleApp<S>>());

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .layer(from_fn_with_state(
            app_state.clone(),
            dev_identity_middleware::<S>,
        ))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    tracing::info!(%bind_addr, "subseq_flow example server listening");
    tracing::info!("api base path: /api/v1, auth shim header: x-dev-user-id");

    axum::serve(listener, app)
        .await
        .context("example server failed")
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

async fn whoami_handler(caller: AuthenticatedCaller) -> Json<serde_json::Value> {
    Json(json!({
        "userId": caller.id().to_string(),
    }))
}

async fn dev_identity_middleware<S: FlowStore + 'static>(
    State(app): State<ExampleApp<S>>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_id = match parse_user_id(req.headers(), &app.auth) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    req.extensions_mut().insert(user_id);
    next.run(req).await
}

fn parse_user_id(headers: &HeaderMap, auth: &DevAuthConfig) -> Result<UserId, Response> {
    let Some(raw_user_id) = headers
        .get("x-dev-user-id")
        .and_then(|value| value.to_str().ok())
    else {
        if auth.require_dev_header {
            return Err(json_error(
                StatusCode::UNAUTHORIZED,
                "missing_dev_user_id",
                "x-dev-user-id header is required",
            ));
        }
        return Ok(UserId(auth.default_user_id));
    };

    raw_user_id.trim().parse::<UserId>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_dev_user_id",
            "invalid UUID",
        )
    })
}

fn json_error(status: StatusCode, code: &'static str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        })),
    )
        .into_response()
}
