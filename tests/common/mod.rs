#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use webui_bridge::auth::TokenCache;
use webui_bridge::container::{
    CONTAINER_NAME, ContainerEngine, ContainerFilter, EngineContainer, ExecOutput,
    PublishedPort, RunSpec, ServiceConfig,
};
use webui_bridge::error::{BridgeError, BridgeResult};
use webui_bridge::http::{ClientSettings, ServiceClient};
use webui_bridge::retry::BackoffSchedule;

// ---------------------------------------------------------------------------
// Container engine
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeState {
    pub containers: Vec<EngineContainer>,
    /// Mutating calls and execs, in order, e.g. `pull:img`, `stop:<id>`.
    pub calls: Vec<String>,
    pub runs: Vec<RunSpec>,
    pub execs: Vec<Vec<String>>,
    pub run_delay: Duration,
    pub stop_fails: bool,
    pub start_fails: bool,
    /// Containers that show up only from the given listing call onward.
    pub hidden: Vec<(usize, EngineContainer)>,
    pub lists: usize,
    pub run_errors: VecDeque<BridgeError>,
    pub exec_responses: VecDeque<BridgeResult<ExecOutput>>,
    next_id: usize,
}

/// In-memory engine that records what it is asked to do.
#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_containers(containers: Vec<EngineContainer>) -> Arc<Self> {
        let engine = Self::default();
        engine.state.lock().unwrap().containers = containers;
        Arc::new(engine)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn set_run_delay(&self, delay: Duration) {
        self.state.lock().unwrap().run_delay = delay;
    }

    pub fn fail_stops(&self) {
        self.state.lock().unwrap().stop_fails = true;
    }

    pub fn fail_starts(&self) {
        self.state.lock().unwrap().start_fails = true;
    }

    /// Makes `container` visible from the `nth` listing call (1-based) on.
    pub fn reveal_at_list(&self, nth: usize, container: EngineContainer) {
        self.state.lock().unwrap().hidden.push((nth, container));
    }

    pub fn push_run_error(&self, err: BridgeError) {
        self.state.lock().unwrap().run_errors.push_back(err);
    }

    pub fn push_exec(&self, response: BridgeResult<ExecOutput>) {
        self.state.lock().unwrap().exec_responses.push_back(response);
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn set_state(&self, id: &str, new_state: &str) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        match state
            .containers
            .iter_mut()
            .find(|c| !id.is_empty() && c.id.starts_with(id))
        {
            Some(container) => {
                container.state = new_state.to_string();
                Ok(())
            }
            None => Err(BridgeError::engine("start", format!("No such container: {id}"))),
        }
    }
}

pub fn container(id: &str, name: &str, state: &str, host_port: u16, managed: bool) -> EngineContainer {
    let mut labels = HashMap::new();
    if managed {
        labels.insert("com.webui-bridge.managed".to_string(), "true".to_string());
        labels.insert("com.webui-bridge.service".to_string(), CONTAINER_NAME.to_string());
    }
    EngineContainer {
        id: id.to_string(),
        names: vec![format!("/{name}")],
        image: "example/openwebui:main".to_string(),
        state: state.to_string(),
        ports: vec![PublishedPort {
            container_port: 8080,
            host_port: Some(host_port),
        }],
        labels,
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_containers(&self, filter: &ContainerFilter) -> BridgeResult<Vec<EngineContainer>> {
        let mut state = self.state.lock().unwrap();
        state.lists += 1;
        let lists = state.lists;
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.hidden).into_iter().partition(|(nth, _)| *nth <= lists);
        state.hidden = pending;
        state.containers.extend(due.into_iter().map(|(_, c)| c));

        let containers = match filter {
            ContainerFilter::All => state.containers.clone(),
            ContainerFilter::Labels(labels) => state
                .containers
                .iter()
                .filter(|c| labels.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
                .cloned()
                .collect(),
        };
        Ok(containers)
    }

    async fn pull_image(&self, image: &str) -> BridgeResult<()> {
        self.record(format!("pull:{image}"));
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> BridgeResult<String> {
        let delay = self.state.lock().unwrap().run_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push("run".to_string());
        state.runs.push(spec.clone());
        if let Some(err) = state.run_errors.pop_front() {
            return Err(err);
        }

        state.next_id += 1;
        let id = format!("{:0>64}", state.next_id);
        state.containers.push(EngineContainer {
            id: id.clone(),
            names: vec![format!("/{}", spec.name)],
            image: spec.image.clone(),
            state: "running".to_string(),
            ports: vec![PublishedPort {
                container_port: spec.container_port,
                host_port: Some(spec.host_port),
            }],
            labels: spec.labels.iter().cloned().collect(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> BridgeResult<()> {
        self.record(format!("start:{id}"));
        {
            let state = self.state.lock().unwrap();
            if state.start_fails {
                return Err(BridgeError::engine("start", "OCI runtime create failed (status 500)"));
            }
            if state.containers.iter().any(|c| c.id == id && c.state == "paused") {
                return Err(BridgeError::engine(
                    "start",
                    "cannot start a paused container, try unpause instead (status 409)",
                ));
            }
        }
        self.set_state(id, "running")
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> BridgeResult<()> {
        self.record(format!("stop:{id}"));
        if self.state.lock().unwrap().stop_fails {
            return Err(BridgeError::engine("stop", "container did not stop in time"));
        }
        self.set_state(id, "exited")
    }

    async fn kill_container(&self, id: &str) -> BridgeResult<()> {
        self.record(format!("kill:{id}"));
        self.set_state(id, "exited")
    }

    async fn unpause_container(&self, id: &str) -> BridgeResult<()> {
        self.record(format!("unpause:{id}"));
        self.set_state(id, "running")
    }

    async fn restart_container(&self, id: &str) -> BridgeResult<()> {
        self.record(format!("restart:{id}"));
        self.set_state(id, "running")
    }

    async fn remove_container(&self, id: &str, _force: bool) -> BridgeResult<()> {
        self.record(format!("remove:{id}"));
        self.state.lock().unwrap().containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn exec(&self, _container: &str, cmd: &[String]) -> BridgeResult<ExecOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("exec:{}", cmd.first().cloned().unwrap_or_default()));
        state.execs.push(cmd.to_vec());
        state.exec_responses.pop_front().unwrap_or_else(|| {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: "{\"data\":[]}".to_string(),
                stderr: String::new(),
            })
        })
    }
}

pub fn exec_ok(stdout: &str) -> BridgeResult<ExecOutput> {
    Ok(ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn exec_failed(code: i64, stderr: &str) -> BridgeResult<ExecOutput> {
    Ok(ExecOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Service REST API
// ---------------------------------------------------------------------------

/// Stand-in for the service's REST API with per-endpoint hit counters.
pub struct MockService {
    pub token: Mutex<String>,
    pub always_unauthorized: AtomicBool,
    pub signin_fails: AtomicBool,
    pub functions: Mutex<Vec<Value>>,
    pub create_response: Mutex<Option<(u16, String)>>,
    pub signins: AtomicUsize,
    pub exports: AtomicUsize,
    pub creates: AtomicUsize,
    pub local_toggles: AtomicUsize,
    pub global_toggles: AtomicUsize,
    /// Toggle calls acknowledged without flipping anything.
    pub toggles_ignored: AtomicBool,
    /// Only the global toggle is acknowledged without effect.
    pub global_toggles_ignored: AtomicBool,
    /// Replaces the `exp` field of the sign-in response.
    pub signin_exp: Mutex<Option<Value>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new("fresh-token".to_string()),
            always_unauthorized: AtomicBool::new(false),
            signin_fails: AtomicBool::new(false),
            functions: Mutex::new(Vec::new()),
            create_response: Mutex::new(None),
            signins: AtomicUsize::new(0),
            exports: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            local_toggles: AtomicUsize::new(0),
            global_toggles: AtomicUsize::new(0),
            toggles_ignored: AtomicBool::new(false),
            global_toggles_ignored: AtomicBool::new(false),
            signin_exp: Mutex::new(None),
        })
    }

    pub fn with_function(self: Arc<Self>, function: Value) -> Arc<Self> {
        self.functions.lock().unwrap().push(function);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.always_unauthorized.load(Ordering::SeqCst) {
            return false;
        }
        let expected = format!("Bearer {}", self.token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }

    fn flip(&self, id: &str, field: &str) -> bool {
        let mut functions = self.functions.lock().unwrap();
        let Some(function) = functions.iter_mut().find(|f| f["id"] == id) else {
            return false;
        };
        let ignored = self.toggles_ignored.load(Ordering::SeqCst)
            || (field == "is_global" && self.global_toggles_ignored.load(Ordering::SeqCst));
        if !ignored {
            let current = function[field].as_bool().unwrap_or(false);
            function[field] = Value::Bool(!current);
        }
        true
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Not authenticated" }))).into_response()
}

async fn signin(State(mock): State<Arc<MockService>>) -> Response {
    mock.signins.fetch_add(1, Ordering::SeqCst);
    if mock.signin_fails.load(Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, "sign-in disabled").into_response();
    }
    let token = mock.token.lock().unwrap().clone();
    let exp = mock
        .signin_exp
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| json!(chrono::Utc::now().timestamp() + 3600));
    Json(json!({ "token": token, "token_type": "Bearer", "exp": exp })).into_response()
}

async fn export(State(mock): State<Arc<MockService>>, headers: HeaderMap) -> Response {
    mock.exports.fetch_add(1, Ordering::SeqCst);
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    let functions = mock.functions.lock().unwrap().clone();
    Json(Value::Array(functions)).into_response()
}

async fn create(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.creates.fetch_add(1, Ordering::SeqCst);
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    if let Some((status, body)) = mock.create_response.lock().unwrap().clone() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        return (status, body).into_response();
    }
    let id = body["id"].clone();
    mock.functions.lock().unwrap().push(json!({
        "id": id,
        "name": body["name"],
        "type": body["type"],
        "is_active": false,
        "is_global": false,
    }));
    Json(json!({ "id": id, "name": body["name"] })).into_response()
}

async fn toggle(
    State(mock): State<Arc<MockService>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.local_toggles.fetch_add(1, Ordering::SeqCst);
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    if mock.flip(&id, "is_active") {
        Json(json!({ "id": id })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn toggle_global(
    State(mock): State<Arc<MockService>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.global_toggles.fetch_add(1, Ordering::SeqCst);
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    if mock.flip(&id, "is_global") {
        Json(json!({ "id": id })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": true }))
}

/// Serves `mock` on an ephemeral local port and returns that port.
pub async fn spawn_service(mock: Arc<MockService>) -> u16 {
    let app = Router::new()
        .route("/api/v1/auths/signin", post(signin))
        .route("/api/v1/functions/export", get(export))
        .route("/api/v1/functions/create", post(create))
        .route("/api/v1/functions/id/{id}/toggle", post(toggle))
        .route("/api/v1/functions/id/{id}/toggle/global", post(toggle_global))
        .route("/health", get(health))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Client settings with short waits so failing paths finish quickly.
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        schedule: BackoffSchedule::from(vec![Duration::from_millis(10), Duration::from_millis(20)]),
        request_timeout: Duration::from_secs(2),
        ready_initial: Duration::from_millis(10),
        ready_max: Duration::from_millis(40),
        ..ClientSettings::default()
    }
}

pub fn service_config(port: u16) -> ServiceConfig {
    ServiceConfig {
        image: "example/openwebui:main".to_string(),
        external_port: port.to_string(),
        auto_start: true,
    }
}

pub fn client_for(port: u16, engine: Arc<dyn ContainerEngine>) -> Arc<ServiceClient> {
    Arc::new(ServiceClient::with_settings(
        &service_config(port),
        Arc::new(TokenCache::in_memory()),
        engine,
        fast_settings(),
    ))
}
