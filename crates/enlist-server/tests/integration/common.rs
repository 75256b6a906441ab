use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use enlist_client::GatewayOptions;
use enlist_core::config::EngineConfig;
use enlist_core::pool::WorkerPool;
use enlist_server::routes;
use enlist_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Target name the stub gateway refuses to resolve.
pub const MISSING_TARGET: &str = "missing";
/// Username the stub gateway reports as not occupied.
pub const GHOST_USER: &str = "ghost";
/// Username whose privacy settings block invites.
pub const PRIVATE_USER: &str = "private";

// ---------------------------------------------------------------------------
// Stub gateway
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct GatewayLog {
    /// `"{target}:{identity}"` for every accepted invite.
    pub invited: Arc<Mutex<Vec<String>>>,
    /// Bearer tokens presented to the gateway.
    pub tokens: Arc<Mutex<Vec<String>>>,
}

impl GatewayLog {
    pub fn invited(&self) -> Vec<String> {
        let mut invited = self.invited.lock().unwrap().clone();
        invited.sort();
        invited
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    fn record_token(&self, headers: &HeaderMap) {
        if let Some(token) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            self.tokens.lock().unwrap().push(token.to_string());
        }
    }
}

pub struct StubGateway {
    pub url: String,
    pub log: GatewayLog,
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn resolve_target(
    State(log): State<GatewayLog>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    log.record_token(&headers);
    if body["name"] == MISSING_TARGET {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": "CHANNEL_INVALID", "message": "no such group"})),
        );
    }
    (StatusCode::OK, axum::Json(json!({"id": 777})))
}

async fn resolve_identity(
    State(log): State<GatewayLog>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    log.record_token(&headers);
    if body["username"] == GHOST_USER {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "USERNAME_NOT_OCCUPIED"})),
        );
    }
    let id = if body["username"].is_string() {
        body["username"].clone()
    } else {
        body["id"].clone()
    };
    (StatusCode::OK, axum::Json(json!({"id": id})))
}

async fn invite(
    State(log): State<GatewayLog>,
    Path(target): Path<String>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    log.record_token(&headers);
    let identity = id_text(&body["identity"]);
    if identity == PRIVATE_USER {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": "USER_PRIVACY_RESTRICTED"})),
        );
    }
    log.invited.lock().unwrap().push(format!("{target}:{identity}"));
    (StatusCode::OK, axum::Json(json!({})))
}

/// Serve a scripted gateway on an ephemeral local port.
pub async fn spawn_gateway() -> StubGateway {
    let log = GatewayLog::default();
    let app = Router::new()
        .route("/v1/targets/resolve", post(resolve_target))
        .route("/v1/identities/resolve", post(resolve_identity))
        .route("/v1/targets/{target}/invites", post(invite))
        .with_state(log.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub gateway");
    let addr = listener.local_addr().expect("Failed to read stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Stub gateway failed");
    });

    StubGateway {
        url: format!("http://{addr}"),
        log,
    }
}

// ---------------------------------------------------------------------------
// Test app
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub gateway: StubGateway,
}

impl TestApp {
    /// Send a request with the test API key and decode the JSON body (Null when empty).
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {TEST_API_KEY}"));
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn register_worker(&self, account_key: &str, session_token: &str) -> StatusCode {
        let (status, _) = self
            .send(
                "POST",
                "/v1/workers",
                Some(json!({"account_key": account_key, "session_token": session_token})),
            )
            .await;
        status
    }

    pub async fn wait_for_completion(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.state.pool.wait_for_completion())
            .await
            .expect("run should complete");
    }
}

/// Engine settings that keep runs fast: no pacing, short cooldown.
pub fn fast_engine() -> EngineConfig {
    EngineConfig::default()
        .with_pacing_delay(Duration::ZERO)
        .with_flood_cooldown(Duration::from_millis(100))
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(fast_engine(), true).await
}

pub async fn setup_test_app_with(engine: EngineConfig, default_gateway: bool) -> TestApp {
    let gateway = spawn_gateway().await;
    let state = Arc::new(AppState {
        pool: WorkerPool::new(&engine),
        api_key: TEST_API_KEY.to_string(),
        default_gateway: default_gateway.then(|| gateway.url.clone()),
        gateway: GatewayOptions::new(Duration::from_secs(5)),
    });

    TestApp {
        router: routes::router(state.clone()),
        state,
        gateway,
    }
}
