use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Extension, Path, Request},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::response::*;
use crate::service::{ServiceError, Wgadmin};

pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::PoolExhausted
            | ServiceError::NotInitialized
            | ServiceError::UserExists
            | ServiceError::ClientAlreadyExists => StatusCode::BAD_REQUEST,
            ServiceError::InvalidCredentials | ServiceError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// The authenticated username, stashed in request extensions by the
/// bearer middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

async fn require_auth(
    Extension(service): Extension<Arc<Wgadmin>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError(ServiceError::InvalidToken))?;

    let username = service.verify_token(token)?;
    req.extensions_mut().insert(CurrentUser(username));
    Ok(next.run(req).await)
}

async fn register(
    Extension(service): Extension<Arc<Wgadmin>>,
    Json(payload): Json<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = service.register(&payload.username, &payload.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

async fn login(
    Extension(service): Extension<Arc<Wgadmin>>,
    Json(payload): Json<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = service.login(&payload.username, &payload.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

async fn init_server(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<InitResult>, ApiError> {
    let identity = service.init_server().await?;
    Ok(Json(InitResult {
        message: "server initialized",
        public_key: identity.public_key,
    }))
}

async fn server_status(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<ServerState>, ApiError> {
    Ok(Json(service.server_status().await?.into()))
}

async fn start_server(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<Message>, ApiError> {
    service.start_server().await?;
    Ok(Json(Message {
        message: "server started",
    }))
}

async fn stop_server(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<Message>, ApiError> {
    service.stop_server().await?;
    Ok(Json(Message {
        message: "server stopped",
    }))
}

async fn restart_server(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<Message>, ApiError> {
    service.restart_server().await?;
    Ok(Json(Message {
        message: "server restarted",
    }))
}

async fn create_client(
    Extension(service): Extension<Arc<Wgadmin>>,
    Json(payload): Json<NewClient>,
) -> Result<Json<Client>, ApiError> {
    let client = service.new_client(payload.name, payload.os_info).await?;
    Ok(Json(client.into()))
}

async fn list_clients(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<Vec<Client>>, ApiError> {
    let clients = service.clients().await?;
    Ok(Json(clients.into_iter().map(Into::into).collect()))
}

async fn delete_client(
    Extension(service): Extension<Arc<Wgadmin>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, ApiError> {
    service.rm_client(id).await?;
    Ok(Json(Message {
        message: "client deleted",
    }))
}

async fn client_config(
    Extension(service): Extension<Arc<Wgadmin>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClientConfig>, ApiError> {
    let (config, filename) = service.client_config(id).await?;
    Ok(Json(ClientConfig { config, filename }))
}

async fn client_qrcode(
    Extension(service): Extension<Arc<Wgadmin>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Qr>, ApiError> {
    let qrcode = service.client_qrcode(id).await?;
    Ok(Json(Qr { qrcode }))
}

async fn stats(
    Extension(service): Extension<Arc<Wgadmin>>,
) -> Result<Json<StatsView>, ApiError> {
    Ok(Json(service.stats().await?.into()))
}

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, env = "LISTEN_ADDR")]
    pub listen_addr: SocketAddr,
}

pub fn router(service: Arc<Wgadmin>) -> Router {
    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login));

    let protected = Router::new()
        .route("/wg/server/init", post(init_server))
        .route("/wg/server/status", get(server_status))
        .route("/wg/server/start", post(start_server))
        .route("/wg/server/stop", post(stop_server))
        .route("/wg/server/restart", post(restart_server))
        .route("/wg/clients", post(create_client).get(list_clients))
        .route("/wg/clients/:id", delete(delete_client))
        .route("/wg/clients/:id/config", get(client_config))
        .route("/wg/clients/:id/qrcode", get(client_qrcode))
        .route("/wg/stats", get(stats))
        .route_layer(middleware::from_fn(require_auth));

    Router::new()
        .nest("/api", public.merge(protected))
        .layer(Extension(service))
        .layer(CorsLayer::permissive())
}

pub async fn start(
    config: Config,
    service: Wgadmin,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
