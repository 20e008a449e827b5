//! Test harness for the Audon service.
//!
//! `TestEnv` wires a real `RoomCoordinator` and router to in-memory
//! collaborators. `TestAudonServer` serves that router on a random local
//! port for tests that want a real socket.

use crate::fixtures::{remote_account, test_config};
use audon_service::cache::EphemeralStore;
use audon_service::config::Config;
use audon_service::models::AudonUser;
use audon_service::observability::metrics::init_metrics_recorder;
use audon_service::repositories::rooms::mock::MockRoomRepository;
use audon_service::repositories::users::mock::MockUserRepository;
use audon_service::routes::{self, AppState};
use audon_service::services::livekit::mock::MockLiveDirectory;
use audon_service::services::mastodon::mock::{MockIdentityGateway, MockProfileClient};
use audon_service::services::session_store::mock::MockSessionStore;
use audon_service::services::{Collaborators, CoordinatorSettings, RoomCoordinator};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tower::ServiceExt;

static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics handle shared by every router built in this process.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// A coordinator over in-memory collaborators, with handles to each.
pub struct TestEnv {
    pub config: Config,
    pub rooms: Arc<MockRoomRepository>,
    pub users: Arc<MockUserRepository>,
    pub live: Arc<MockLiveDirectory>,
    pub identity: Arc<MockIdentityGateway>,
    pub profiles: Arc<MockProfileClient>,
    pub sessions: Arc<MockSessionStore>,
    pub store: Arc<EphemeralStore>,
    pub coordinator: Arc<RoomCoordinator>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Build with adjusted coordinator settings.
    pub fn with_settings(tweak: impl FnOnce(&mut CoordinatorSettings)) -> Self {
        let config = test_config();
        let mut settings = CoordinatorSettings::from_config(&config);
        tweak(&mut settings);

        let rooms = Arc::new(MockRoomRepository::new());
        let users = Arc::new(MockUserRepository::new());
        let live = Arc::new(MockLiveDirectory::new());
        let identity = Arc::new(MockIdentityGateway::new());
        let profiles = Arc::new(MockProfileClient::new());
        let store = Arc::new(EphemeralStore::new(
            config.session_cache_ttl(),
            config.disconnect_grace(),
            config.orphan_grace(),
        ));

        let coordinator = RoomCoordinator::new(
            Collaborators {
                rooms: rooms.clone(),
                users: users.clone(),
                live: live.clone(),
                identity: identity.clone(),
                profiles: profiles.clone(),
            },
            settings,
            Arc::clone(&store),
        );

        Self {
            config,
            rooms,
            users,
            live,
            identity,
            profiles,
            sessions: Arc::new(MockSessionStore::new()),
            store,
            coordinator,
        }
    }

    /// Seed `user` as registered, with a matching home-server account.
    pub async fn register_user(&self, user: AudonUser) -> AudonUser {
        self.users.seed(user.clone()).await;
        self.identity
            .set_account(&user.audon_id, remote_account(&user))
            .await;
        user
    }

    /// Register the fixture user `name`.
    pub async fn register(&self, name: &str) -> AudonUser {
        self.register_user(crate::fixtures::user(name)).await
    }

    /// Create a login session for `user` and return its id.
    pub async fn sign_in(&self, user: &AudonUser) -> String {
        let id = format!("sess-{}", user.audon_id);
        self.sessions
            .insert(&id, crate::fixtures::session(user))
            .await;
        id
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            config: self.config.clone(),
            coordinator: Arc::clone(&self.coordinator),
            sessions: self.sessions.clone(),
        })
    }

    pub fn router(&self) -> Router {
        routes::build_routes(self.state(), test_metrics_handle())
    }

    /// Send one request through the router.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        session: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {session}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request builder should succeed");
        send(self.router(), request).await
    }
}

/// Status and body of a routed request.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("response body should be JSON")
    }

    /// The `error.message` of an error response.
    pub fn error_message(&self) -> String {
        self.json()["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }
}

/// Run `request` through `router` and collect the response.
pub async fn send(router: Router, request: Request<Body>) -> TestResponse {
    let response = router
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    TestResponse {
        status,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// Test harness serving the Audon router on a random local port.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_over_http() -> anyhow::Result<()> {
///     let env = TestEnv::new();
///     let server = TestAudonServer::spawn(&env).await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestAudonServer {
    addr: SocketAddr,
    _handle: JoinHandle<()>,
}

impl TestAudonServer {
    /// Bind to 127.0.0.1:0 and serve `env`'s router in the background.
    pub async fn spawn(env: &TestEnv) -> Result<Self, anyhow::Error> {
        let app = env.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TestAudonServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
