//! End-to-end scenarios over [`EngineManager`] against a fake runner
//! backend and a real HTTP server (`wiremock`) standing in for the
//! engine's own `/health` and `/load` endpoints — covers the lifecycle
//! invariants unit tests on `manager.rs` don't reach because they need a
//! server that actually answers health checks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forge_common::settings::MemorySettingsRepository;
use forge_common::{EngineVariantId, Settings, SettingsRepository};
use forge_engine::runner::{EngineRunner, ProcessRef, RunnerHandle};
use forge_engine::{EngineCapabilities, EngineKind, EngineManager, EngineVariant, PortRegistry, RunnerKind, VariantRegistry};
use forge_events::EventBus;

/// Single runner backend shared by every variant in a test, the way one
/// real `LocalProcessRunner` backs every `local_process` variant. Tracks
/// which variant id each start/stop call was for by smuggling it through
/// `ProcessRef::Container`, since `RunnerHandle` itself carries no
/// variant identity back to `stop`.
struct FakeRunner {
    base_url: String,
    start_calls: Mutex<Vec<String>>,
    stop_calls: Mutex<Vec<String>>,
    start_count: AtomicUsize,
}

impl FakeRunner {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            start_calls: Mutex::new(Vec::new()),
            stop_calls: Mutex::new(Vec::new()),
            start_count: AtomicUsize::new(0),
        }
    }

    fn stopped(&self, id: &str) -> bool {
        self.stop_calls.lock().iter().any(|c| c == id)
    }
}

#[async_trait]
impl EngineRunner for FakeRunner {
    async fn start(&self, variant: &EngineVariant, _port: u16) -> Result<RunnerHandle, forge_engine::EngineError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.start_calls.lock().push(variant.id.as_str().to_owned());
        Ok(RunnerHandle {
            base_url: self.base_url.clone(),
            process: ProcessRef::Container(variant.id.as_str().to_owned()),
        })
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<(), forge_engine::EngineError> {
        if let ProcessRef::Container(id) = &handle.process {
            self.stop_calls.lock().push(id.clone());
        }
        Ok(())
    }

    async fn is_alive(&self, _handle: &RunnerHandle) -> bool {
        true
    }
}

fn variant(id: &str, kind: EngineKind, capabilities: EngineCapabilities) -> EngineVariant {
    EngineVariant {
        id: EngineVariantId::new(id),
        kind,
        runner: RunnerKind::LocalProcess,
        target: "noop".to_owned(),
        default_model: None,
        capabilities,
        enabled: true,
    }
}

async fn mock_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
    server
}

/// Mounts a `/load` responder that only matches a POST body naming this
/// exact model, expected to be hit exactly once — lets a test tell two
/// sequential loads against the same engine apart.
async fn expect_one_load(server: &MockServer, model: &str) {
    Mock::given(method("POST"))
        .and(path("/load"))
        .and(body_string_contains(model))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

async fn make_manager(runner: Arc<FakeRunner>, settings_repo: Arc<MemorySettingsRepository>) -> (Arc<EngineManager>, Arc<VariantRegistry>, Arc<PortRegistry>) {
    let registry = Arc::new(VariantRegistry::new());
    let ports = Arc::new(PortRegistry::new());
    let mut runners: HashMap<RunnerKind, Arc<dyn EngineRunner>> = HashMap::new();
    runners.insert(RunnerKind::LocalProcess, runner);
    let settings = Arc::new(Settings::new(settings_repo));
    let events = EventBus::spawn().await.unwrap();
    let manager = Arc::new(EngineManager::new(registry.clone(), ports.clone(), runners, settings, events));
    (manager, registry, ports)
}

/// Happy path: start, load the requested model, and the base URL handed
/// back is the one the fake runner produced.
#[tokio::test]
async fn ensure_ready_starts_and_loads_a_model() {
    let server = mock_server().await;
    let runner = Arc::new(FakeRunner::new(server.uri()));
    let settings_repo = Arc::new(MemorySettingsRepository::default());
    settings_repo.set("engines.portBase", serde_json::Value::from(20000)).await.unwrap();
    settings_repo.set("engines.portMax", serde_json::Value::from(20099)).await.unwrap();
    let (manager, registry, _ports) = make_manager(runner.clone(), settings_repo).await;
    let id = EngineVariantId::new("xtts");
    registry.register(variant("xtts", EngineKind::Synthesis, EngineCapabilities::default()));

    expect_one_load(&server, "model-a").await;

    let base_url = manager.ensure_ready(&id, Some("model-a")).await.unwrap();
    assert_eq!(base_url, server.uri());
    assert!(manager.is_running(&id));

    // `server` drops here; wiremock checks every `.expect(n)`-annotated
    // mock was matched the right number of times and panics if not.
}

/// Single-active-per-kind: starting a second synthesis variant stops the
/// first one, but never touches variants of a different kind.
#[tokio::test]
async fn single_active_for_kind_stops_the_other_variant_of_the_same_kind() {
    let server = mock_server().await;
    let runner = Arc::new(FakeRunner::new(server.uri()));
    let settings_repo = Arc::new(MemorySettingsRepository::default());
    settings_repo.set("engines.synthesis.singleActive", serde_json::Value::Bool(true)).await.unwrap();
    settings_repo.set("engines.portBase", serde_json::Value::from(20100)).await.unwrap();
    settings_repo.set("engines.portMax", serde_json::Value::from(20199)).await.unwrap();
    let (manager, registry, _ports) = make_manager(runner.clone(), settings_repo).await;

    let a = EngineVariantId::new("xtts-a");
    let b = EngineVariantId::new("xtts-b");
    let whisper = EngineVariantId::new("whisper");
    registry.register(variant("xtts-a", EngineKind::Synthesis, EngineCapabilities::default()));
    registry.register(variant("xtts-b", EngineKind::Synthesis, EngineCapabilities::default()));
    registry.register(variant("whisper", EngineKind::Transcription, EngineCapabilities::default()));

    manager.ensure_ready(&a, None).await.unwrap();
    manager.ensure_ready(&whisper, None).await.unwrap();
    assert!(manager.is_running(&a), "different-kind variant must not stop synthesis's active one");

    manager.ensure_ready(&b, None).await.unwrap();
    assert!(!manager.is_running(&a), "starting another synthesis variant stops the previous one");
    assert!(manager.is_running(&b));
    assert!(manager.is_running(&whisper), "transcription variant is untouched by the synthesis swap");
    assert!(runner.stopped("xtts-a"));
    assert!(!runner.stopped("whisper"));
}

/// Idle engines are stopped by `check_idle_engines`, except variants
/// named in `engines.keepWarm`, which are never auto-stopped regardless
/// of how long they've sat idle.
#[tokio::test]
async fn idle_engines_are_stopped_unless_kept_warm() {
    let server = mock_server().await;
    let runner = Arc::new(FakeRunner::new(server.uri()));
    let settings_repo = Arc::new(MemorySettingsRepository::default());
    settings_repo.set("engines.inactivityTimeoutMinutes", serde_json::Value::from(0)).await.unwrap();
    settings_repo.set("engines.keepWarm", serde_json::json!(["xtts-warm"])).await.unwrap();
    // Single-active-per-kind is orthogonal to this test; disable it so
    // starting the second variant doesn't stop the first one early.
    settings_repo.set("engines.synthesis.singleActive", serde_json::Value::Bool(false)).await.unwrap();
    // Exactly two ports available: with both variants running they're
    // fully exhausted, so a reservation only succeeds again once the
    // idle sweep actually releases one back to the pool.
    settings_repo.set("engines.portBase", serde_json::Value::from(20300)).await.unwrap();
    settings_repo.set("engines.portMax", serde_json::Value::from(20301)).await.unwrap();
    let (manager, registry, ports) = make_manager(runner.clone(), settings_repo).await;

    let idle = EngineVariantId::new("xtts-idle");
    let warm = EngineVariantId::new("xtts-warm");
    registry.register(variant("xtts-idle", EngineKind::Synthesis, EngineCapabilities::default()));
    registry.register(variant("xtts-warm", EngineKind::Synthesis, EngineCapabilities { supports_model_hotswap: false, ..Default::default() }));

    // Distinct ports so stopping one never frees a port the other holds.
    manager.ensure_ready(&idle, None).await.unwrap();
    manager.ensure_ready(&warm, None).await.unwrap();
    assert!(manager.is_running(&idle));
    assert!(manager.is_running(&warm));

    assert!(ports.find_free_port(20300, 20301).is_err(), "both of the two available ports are held before the sweep");

    manager.check_idle_engines().await;

    assert!(!manager.is_running(&idle), "idle, non-keep-warm variant must be stopped");
    assert!(manager.is_running(&warm), "keep-warm variant must survive the idle sweep");
    assert!(ports.find_free_port(20300, 20301).is_ok(), "stopping the idle engine must release its port back to the pool");
}

/// A variant that supports model hotswap reuses the already-running
/// process across model changes instead of restarting.
#[tokio::test]
async fn hotswap_capable_variant_reuses_the_running_engine_across_model_changes() {
    let server = mock_server().await;
    let runner = Arc::new(FakeRunner::new(server.uri()));
    let settings_repo = Arc::new(MemorySettingsRepository::default());
    settings_repo.set("engines.portBase", serde_json::Value::from(20400)).await.unwrap();
    settings_repo.set("engines.portMax", serde_json::Value::from(20499)).await.unwrap();
    let (manager, registry, _ports) = make_manager(runner.clone(), settings_repo).await;

    let id = EngineVariantId::new("xtts");
    registry.register(variant("xtts", EngineKind::Synthesis, EngineCapabilities { supports_model_hotswap: true, ..Default::default() }));

    expect_one_load(&server, "model-a").await;
    expect_one_load(&server, "model-b").await;

    manager.ensure_ready(&id, Some("model-a")).await.unwrap();
    manager.ensure_ready(&id, Some("model-b")).await.unwrap();

    assert_eq!(runner.start_count.load(Ordering::SeqCst), 1, "hotswap never restarts the process");
}

/// A variant that cannot hotswap gets a clean stop/start cycle when the
/// requested model differs from what's loaded.
#[tokio::test]
async fn non_hotswap_variant_restarts_on_a_model_change() {
    let server = mock_server().await;
    let runner = Arc::new(FakeRunner::new(server.uri()));
    let settings_repo = Arc::new(MemorySettingsRepository::default());
    settings_repo.set("engines.portBase", serde_json::Value::from(20500)).await.unwrap();
    settings_repo.set("engines.portMax", serde_json::Value::from(20599)).await.unwrap();
    let (manager, registry, _ports) = make_manager(runner.clone(), settings_repo).await;

    let id = EngineVariantId::new("piper");
    registry.register(variant("piper", EngineKind::Synthesis, EngineCapabilities { supports_model_hotswap: false, ..Default::default() }));

    expect_one_load(&server, "model-a").await;
    expect_one_load(&server, "model-b").await;

    manager.ensure_ready(&id, Some("model-a")).await.unwrap();
    manager.ensure_ready(&id, Some("model-b")).await.unwrap();

    assert_eq!(runner.start_count.load(Ordering::SeqCst), 2, "a model switch without hotswap support restarts the process");
    assert!(runner.stopped("piper"));
    assert!(manager.is_running(&id), "the restarted engine ends up running again with the new model");
}
