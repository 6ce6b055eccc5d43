use anyhow::Result;
use axum::{
    async_trait,
    extract::{FromRequest, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pushaas_models::{BindAppForm, BindUnitForm, ErrorResponse, InstanceForm, InstanceStatus};
use pushaas_orchestrations::error::ServiceError;
use pushaas_orchestrations::service::InstanceService;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Credentials;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub service: InstanceService,
    pub credentials: Option<Arc<Credentials>>,
}

/// Create the broker API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let resources = Router::new()
        .route("/resources", post(create_instance))
        .route("/resources/plans", get(list_plans))
        .route("/resources/instances", get(list_instances))
        .route(
            "/resources/:name",
            get(get_instance).put(update_instance).delete(delete_instance),
        )
        .route("/resources/:name/status", get(instance_status))
        .route("/resources/:name/bind-app", post(bind_app).delete(unbind_app))
        .route("/resources/:name/bind", post(bind_unit).delete(unbind_unit))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/health", get(health_check))
        .merge(resources)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn start_server(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("✓ API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

// ============================================================================
// Authentication
// ============================================================================

fn is_authorized(headers: &HeaderMap, credentials: &Credentials) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Some(decoded) = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };

    match decoded.split_once(':') {
        Some((username, password)) => {
            username == credentials.username && password == credentials.password
        }
        None => false,
    }
}

async fn basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(credentials) = &state.credentials else {
        return next.run(req).await;
    };
    if is_authorized(req.headers(), credentials) {
        return next.run(req).await;
    }

    tracing::warn!(path = %req.uri().path(), "rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"pushaas\"")],
        Json(ErrorResponse {
            code: "unauthorized".to_string(),
            message: "authentication required".to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Request bodies
// ============================================================================

/// Accepts `application/json` bodies and falls back to url-encoded forms
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()).into_response())?;
            Ok(FormOrJson(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()).into_response())?;
            Ok(FormOrJson(value))
        }
    }
}

// ============================================================================
// Health Check
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pushaas",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============================================================================
// Instances
// ============================================================================

async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.plans())
}

async fn list_instances(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.service.list().await?))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.service.get(&name).await?))
}

async fn create_instance(
    State(state): State<AppState>,
    FormOrJson(form): FormOrJson<InstanceForm>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.service.create(&form).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// Plan changes are not supported
async fn update_instance(Path(name): Path<String>) -> AppError {
    AppError::NotFound(format!("updating instance '{}' is not supported", name))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.service.delete(&name).await?;
    Ok(StatusCode::OK)
}

async fn instance_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let status = state.service.status(&name).await?;
    let response = match status {
        InstanceStatus::Pending => StatusCode::ACCEPTED.into_response(),
        InstanceStatus::Running => StatusCode::NO_CONTENT.into_response(),
        InstanceStatus::Failed => AppError::from(ServiceError::Failed(name)).into_response(),
    };
    Ok(response)
}

// ============================================================================
// Bindings
// ============================================================================

async fn bind_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
    FormOrJson(form): FormOrJson<BindAppForm>,
) -> Result<impl IntoResponse, AppError> {
    let variables = state.service.bind_app(&name, &form).await?;
    Ok((StatusCode::CREATED, Json(variables)))
}

async fn unbind_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
    FormOrJson(form): FormOrJson<BindAppForm>,
) -> Result<impl IntoResponse, AppError> {
    state.service.unbind_app(&name, &form).await?;
    Ok(StatusCode::OK)
}

async fn bind_unit(
    State(state): State<AppState>,
    Path(name): Path<String>,
    FormOrJson(form): FormOrJson<BindUnitForm>,
) -> Result<impl IntoResponse, AppError> {
    state.service.bind_unit(&name, &form).await?;
    Ok(StatusCode::CREATED)
}

async fn unbind_unit(
    State(state): State<AppState>,
    Path(name): Path<String>,
    FormOrJson(form): FormOrJson<BindUnitForm>,
) -> Result<impl IntoResponse, AppError> {
    state.service.unbind_unit(&name, &form).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PreconditionFailed(String),
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e {
            ServiceError::Invalid(_) => AppError::BadRequest(message),
            ServiceError::NotFound(_) | ServiceError::NotBound { .. } => AppError::NotFound(message),
            ServiceError::AlreadyExists(_) | ServiceError::AlreadyBound { .. } => {
                AppError::Conflict(message)
            }
            ServiceError::Pending(_) => AppError::PreconditionFailed(message),
            ServiceError::Failed(_) => AppError::Internal(message),
            ServiceError::Store(_) | ServiceError::Queue(_) => {
                tracing::error!(error = %message, "instance operation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::PreconditionFailed(msg) => {
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        let body = Json(ErrorResponse {
            code: code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use pushaas_models::CompletionPolicy;
    use pushaas_orchestrations::queue::MemoryJobQueue;
    use pushaas_orchestrations::store::{InstanceStore, MemoryInstanceStore};
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    const AUTH: &str = "Basic YWRtaW46c2VjcmV0"; // admin:secret

    struct Fixture {
        router: Router,
        store: Arc<MemoryInstanceStore>,
        queue: Arc<MemoryJobQueue>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryInstanceStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let state = AppState {
            service: InstanceService::new(store.clone(), queue.clone()),
            credentials: Some(Arc::new(Credentials {
                username: "admin".to_string(),
                password: "secret".to_string(),
            })),
        };
        Fixture {
            router: create_router(state),
            store,
            queue,
        }
    }

    fn request(method: &str, uri: &str, form: Option<&str>) -> Request {
        let builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, AUTH);
        match form {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, req: Request) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    async fn mark_running(store: &MemoryInstanceStore, name: &str) {
        let mut instance = store.get(name).await.unwrap();
        instance
            .apply_completion(
                InstanceStatus::Running,
                BTreeMap::from([("PUSHAAS_ENDPOINT".to_string(), "http://api:8080".to_string())]),
                CompletionPolicy::LastWriteWins,
            )
            .unwrap();
        store.save(&instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let f = fixture();
        let req = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&f.router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_resources_require_basic_auth() {
        let f = fixture();
        let req = axum::http::Request::builder()
            .uri("/resources/plans")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&f.router, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let req = axum::http::Request::builder()
            .uri("/resources/plans")
            .header(header::AUTHORIZATION, "Basic YWRtaW46d3Jvbmc=") // admin:wrong
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&f.router, req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_plans() {
        let f = fixture();
        let (status, body) = send(&f.router, request("GET", "/resources/plans", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([{"name": "small", "description": "The only plan"}]));
    }

    #[tokio::test]
    async fn test_create_instance_status_codes() {
        let f = fixture();
        let form = Some("name=acme&plan=small&team=core&user=dev");

        let (status, body) = send(&f.router, request("POST", "/resources", form)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(f.queue.pending().len(), 1);

        let (status, _) = send(&f.router, request("POST", "/resources", form)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            send(&f.router, request("POST", "/resources", Some("name=zeta&plan=large"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, _) =
            send(&f.router, request("POST", "/resources", Some("name=Acme_Prod&plan=small"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(f.queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_create_accepts_json() {
        let f = fixture();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/resources")
            .header(header::AUTHORIZATION, AUTH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"acme","plan":"small"}"#))
            .unwrap();
        assert_eq!(send(&f.router, req).await.0, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_status_follows_lifecycle() {
        let f = fixture();
        let (status, _) = send(&f.router, request("GET", "/resources/acme/status", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&f.router, request("POST", "/resources", Some("name=acme&plan=small"))).await;
        let (status, _) = send(&f.router, request("GET", "/resources/acme/status", None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        mark_running(&f.store, "acme").await;
        let (status, _) = send(&f.router, request("GET", "/resources/acme/status", None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_bind_app_status_codes() {
        let f = fixture();
        let bind = Some("app-name=web&app-host=web.example.com");

        let (status, _) = send(&f.router, request("POST", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&f.router, request("POST", "/resources", Some("name=acme&plan=small"))).await;
        let (status, _) = send(&f.router, request("POST", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        mark_running(&f.store, "acme").await;
        let (status, body) =
            send(&f.router, request("POST", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["PUSHAAS_ENDPOINT"], "http://api:8080");

        let (status, _) = send(&f.router, request("POST", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let unit = Some("app-name=web&app-host=web.example.com&unit-host=10.0.0.1");
        let (status, _) = send(&f.router, request("POST", "/resources/acme/bind", unit)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&f.router, request("DELETE", "/resources/acme/bind", unit)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&f.router, request("DELETE", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&f.router, request("DELETE", "/resources/acme/bind-app", bind)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_and_update() {
        let f = fixture();
        let (status, _) = send(&f.router, request("DELETE", "/resources/acme", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&f.router, request("POST", "/resources", Some("name=acme&plan=small"))).await;
        let (status, _) = send(&f.router, request("DELETE", "/resources/acme", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f.queue.pending()[1].kind, "pushaas::job::deprovision");

        let (status, _) = send(&f.router, request("PUT", "/resources/acme", Some("plan=small"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_basic_auth_header_parsing() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "pa:ss".to_string(),
        };
        let mut headers = HeaderMap::new();
        assert!(!is_authorized(&headers, &credentials));

        let encoded = STANDARD.encode("admin:pa:ss");
        headers.insert(header::AUTHORIZATION, format!("Basic {}", encoded).parse().unwrap());
        assert!(is_authorized(&headers, &credentials));

        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert!(!is_authorized(&headers, &credentials));
    }
}
