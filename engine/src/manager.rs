//! Engine lifecycle manager: the `ensure_ready` decision tree, auto-stop
//! on inactivity, and the start/stop/health/discover_models operations
//! everything else in this crate is built on top of.
//!
//! Grounded on `original_source/backend/core/base_engine_manager.py`'s
//! `EngineManager` / `ensure_engine_ready` for the decision tree and idle
//! check, and on `engine/src/actors/scheduler.rs`'s plain state-holding
//! shape — like [`forge_store::Worker`], this is deliberately not a
//! `ractor::Actor`: there's no mailbox worth serving here, just a shared
//! map behind a lock and a background tick, so the actor machinery would
//! only add ceremony over what a `parking_lot::RwLock` already gives us.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use forge_common::{EngineVariantId, Settings};
use forge_events::{Channel, Event, EventBus};

use crate::error::EngineError;
use crate::retry;
use crate::runner::{EngineRunner, RunnerHandle};
use crate::variant::{EngineKind, EngineVariant, RunnerKind, VariantRegistry};

struct RunningEngine {
    handle: RunnerHandle,
    port: u16,
    loaded_model: Option<String>,
    last_activity: Instant,
    /// Started via `start_engine_for_discovery` — no model loaded, and
    /// subject to the shorter discovery timeout rather than the normal
    /// inactivity timeout.
    discovery_only: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadRequest<'a> {
    engine_model_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<String>,
}

pub struct EngineManager {
    registry: Arc<VariantRegistry>,
    ports: Arc<crate::port::PortRegistry>,
    runners: HashMap<RunnerKind, Arc<dyn EngineRunner>>,
    running: RwLock<HashMap<EngineVariantId, RunningEngine>>,
    settings: Arc<Settings>,
    events: EventBus,
    http: Client,
}

impl EngineManager {
    pub fn new(
        registry: Arc<VariantRegistry>,
        ports: Arc<crate::port::PortRegistry>,
        runners: HashMap<RunnerKind, Arc<dyn EngineRunner>>,
        settings: Arc<Settings>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            ports,
            runners,
            running: RwLock::new(HashMap::new()),
            settings,
            events,
            http: retry::build_client(Duration::from_secs(30)),
        }
    }

    pub fn registry(&self) -> &Arc<VariantRegistry> {
        &self.registry
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.http
    }

    /// Step through the decision tree from spec.md's engine manager
    /// section: stop any other single-active variant of the same kind,
    /// start if nothing is running, no-op if the right model is already
    /// loaded, hotswap or restart otherwise. Returns the base URL to send
    /// generation requests to.
    #[instrument(skip(self), fields(variant = %variant_id))]
    pub async fn ensure_ready(&self, variant_id: &EngineVariantId, model: Option<&str>) -> Result<String, EngineError> {
        let variant = self.registry.get(variant_id).ok_or_else(|| EngineError::VariantNotFound(variant_id.clone()))?;
        if !variant.enabled {
            return Err(EngineError::VariantDisabled(variant_id.clone()));
        }

        if self.single_active_for_kind(variant.kind).await {
            self.stop_other_variants_of_kind(variant.kind, variant_id).await;
        }

        let already_running = self.running.read().contains_key(variant_id);
        if !already_running {
            self.start(&variant).await?;
        }

        let current_model = self.running.read().get(variant_id).and_then(|e| e.loaded_model.clone());
        match (model, current_model) {
            (None, _) => {}
            (Some(_), None) => {
                self.load_model(&variant, model.unwrap()).await?;
            }
            (Some(wanted), Some(ref loaded)) if loaded == wanted => {}
            (Some(wanted), Some(_)) if variant.capabilities.supports_model_hotswap => {
                self.load_model(&variant, wanted).await?;
            }
            (Some(wanted), Some(_)) => {
                // A different model is loaded and this variant can't
                // hotswap: restart clean, then load the requested model.
                self.stop(variant_id, "manual").await?;
                self.start(&variant).await?;
                self.load_model(&variant, wanted).await?;
            }
        }

        let mut running = self.running.write();
        let entry = running.get_mut(variant_id).expect("just ensured running above");
        entry.last_activity = Instant::now();
        entry.discovery_only = false;
        Ok(entry.handle.base_url.clone())
    }

    /// Start a variant without loading a model, for the `/models` catalog
    /// endpoint — mirrors `start_engine_for_discovery`.
    pub async fn ensure_ready_for_discovery(&self, variant_id: &EngineVariantId) -> Result<String, EngineError> {
        let variant = self.registry.get(variant_id).ok_or_else(|| EngineError::VariantNotFound(variant_id.clone()))?;
        if self.running.read().contains_key(variant_id) {
            return Ok(self.running.read().get(variant_id).unwrap().handle.base_url.clone());
        }
        self.start(&variant).await?;
        let mut running = self.running.write();
        let entry = running.get_mut(variant_id).expect("just started above");
        entry.discovery_only = true;
        Ok(entry.handle.base_url.clone())
    }

    async fn single_active_for_kind(&self, kind: EngineKind) -> bool {
        let key = match kind {
            EngineKind::Synthesis => "engines.synthesis.singleActive",
            EngineKind::Transcription => "engines.transcription.singleActive",
            EngineKind::Analysis => "engines.analysis.singleActive",
        };
        self.settings.get::<bool>(key).await.unwrap_or(true)
    }

    async fn stop_other_variants_of_kind(&self, kind: EngineKind, keep: &EngineVariantId) {
        let others: Vec<EngineVariantId> = {
            let running = self.running.read();
            self.registry
                .list_for_kind(kind)
                .into_iter()
                .map(|v| v.id)
                .filter(|id| id != keep && running.contains_key(id))
                .collect()
        };
        for id in others {
            if let Err(e) = self.stop(&id, "manual").await {
                warn!(variant = %id, error = %e, "failed to stop other single-active variant");
            }
        }
    }

    #[instrument(skip(self, variant), fields(variant = %variant.id))]
    async fn start(&self, variant: &EngineVariant) -> Result<(), EngineError> {
        let runner = self
            .runners
            .get(&variant.runner)
            .cloned()
            .ok_or_else(|| EngineError::Spawn(variant.id.clone(), format!("no runner backend registered for {:?}", variant.runner)))?;

        let port_base: u16 = self.settings.get("engines.portBase").await.unwrap_or(8766);
        let port_max: u16 = self.settings.get("engines.portMax").await.unwrap_or(9766);
        let port = self.ports.find_free_port(port_base, port_max)?;

        self.events.publish(Event::new(
            Channel::Engines,
            "engine.starting",
            json!({"variantId": variant.id.as_str(), "port": port}),
        ));

        let handle = match runner.start(variant, port).await {
            Ok(h) => h,
            Err(e) => {
                self.ports.release(port);
                self.events.publish(Event::new(
                    Channel::Engines,
                    "engine.error",
                    json!({"variantId": variant.id.as_str(), "error": e.to_string()}),
                ));
                return Err(e);
            }
        };

        self.wait_for_health(variant, &handle).await?;

        self.running.write().insert(
            variant.id.clone(),
            RunningEngine {
                handle,
                port,
                loaded_model: None,
                last_activity: Instant::now(),
                discovery_only: false,
            },
        );
        info!(variant = %variant.id, port, "engine ready");
        self.events.publish(Event::new(
            Channel::Engines,
            "engine.started",
            json!({"variantId": variant.id.as_str(), "port": port}),
        ));
        Ok(())
    }

    async fn wait_for_health(&self, variant: &EngineVariant, handle: &RunnerHandle) -> Result<(), EngineError> {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            if self.http.get(format!("{}/health", handle.base_url)).send().await.map(|r| r.status().is_success()).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Spawn(variant.id.clone(), "engine never became healthy".to_owned()));
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn load_model(&self, variant: &EngineVariant, model: &str) -> Result<(), EngineError> {
        let base_url = self
            .running
            .read()
            .get(&variant.id)
            .map(|e| e.handle.base_url.clone())
            .ok_or_else(|| EngineError::NotRunning(variant.id.clone()))?;

        self.http
            .post(format!("{base_url}/load"))
            .json(&LoadRequest { engine_model_name: model })
            .send()
            .await?
            .error_for_status()?;

        if let Some(entry) = self.running.write().get_mut(&variant.id) {
            entry.loaded_model = Some(model.to_owned());
        }
        Ok(())
    }

    /// `reason` is carried on the `engine.stopped` event (`manual`,
    /// `inactivity`, or `error`, per spec.md's engine manager section).
    #[instrument(skip(self), fields(variant = %variant_id))]
    pub async fn stop(&self, variant_id: &EngineVariantId, reason: &'static str) -> Result<(), EngineError> {
        let removed = self.running.write().remove(variant_id);
        let Some(entry) = removed else { return Ok(()) };

        self.events.publish(Event::new(
            Channel::Engines,
            "engine.stopping",
            json!({"variantId": variant_id.as_str()}),
        ));

        let runner = self
            .registry
            .get(variant_id)
            .and_then(|v| self.runners.get(&v.runner).cloned());
        if let Some(runner) = runner {
            runner.stop(&entry.handle).await?;
        }
        self.ports.release(entry.port);
        info!(variant = %variant_id, reason, "engine stopped");
        self.events.publish(Event::new(
            Channel::Engines,
            "engine.stopped",
            json!({"variantId": variant_id.as_str(), "reason": reason}),
        ));
        Ok(())
    }

    /// Stop and relaunch a variant, reloading `model` if given. Used by
    /// the dispatch retry loop's server-error recovery (spec.md §4.4:
    /// "between attempts, stop and restart the engine"). Returns the new
    /// base URL, since the restarted engine can land on a different port
    /// than the one that just failed.
    pub async fn restart(&self, variant_id: &EngineVariantId, model: Option<&str>) -> Result<String, EngineError> {
        self.stop(variant_id, "error").await?;
        self.ensure_ready(variant_id, model).await
    }

    pub async fn health(&self, variant_id: &EngineVariantId) -> bool {
        let Some(base_url) = self.running.read().get(variant_id).map(|e| e.handle.base_url.clone()) else {
            return false;
        };
        self.http
            .get(format!("{base_url}/health"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn discover_models(&self, variant_id: &EngineVariantId) -> Result<Vec<String>, EngineError> {
        let base_url = self.ensure_ready_for_discovery(variant_id).await?;
        let response: ModelsResponse = retry::get_json(&self.http, &format!("{base_url}/models"))
            .await
            .map_err(|e| EngineError::Spawn(variant_id.clone(), e.to_string()))?;
        Ok(response.models)
    }

    pub fn is_running(&self, variant_id: &EngineVariantId) -> bool {
        self.running.read().contains_key(variant_id)
    }

    /// Stop anything idle past its timeout, skipping keep-warm variants.
    /// Grounded on `check_idle_engines`: a separate, shorter timeout
    /// applies to engines started purely for model discovery.
    pub async fn check_idle_engines(&self) {
        let inactivity_minutes: u64 = self.settings.get("engines.inactivityTimeoutMinutes").await.unwrap_or(5);
        let discovery_seconds: u64 = self.settings.get("engines.discoveryTimeoutSeconds").await.unwrap_or(30);
        let keep_warm: HashSet<String> = self
            .settings
            .get::<Vec<String>>("engines.keepWarm")
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let idle: Vec<EngineVariantId> = {
            let running = self.running.read();
            running
                .iter()
                .filter(|(id, entry)| {
                    if keep_warm.contains(id.as_str()) {
                        return false;
                    }
                    let timeout = if entry.discovery_only {
                        Duration::from_secs(discovery_seconds)
                    } else {
                        Duration::from_secs(inactivity_minutes * 60)
                    };
                    entry.last_activity.elapsed() >= timeout
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in idle {
            info!(variant = %id, "stopping idle engine");
            if let Err(e) = self.stop(&id, "inactivity").await {
                warn!(variant = %id, error = %e, "failed to stop idle engine");
            }
        }
    }

    /// Spawn the periodic idle check. Returns a handle the caller can
    /// abort on shutdown.
    pub fn spawn_auto_stop_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                manager.check_idle_engines().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ProcessRef;
    use crate::variant::EngineCapabilities;
    use async_trait::async_trait;
    use forge_common::settings::MemorySettingsRepository;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeRunner {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EngineRunner for FakeRunner {
        async fn start(&self, _variant: &EngineVariant, port: u16) -> Result<RunnerHandle, EngineError> {
            Ok(RunnerHandle {
                base_url: format!("http://127.0.0.1:{port}"),
                process: ProcessRef::LocalProcess(1),
            })
        }
        async fn stop(&self, _handle: &RunnerHandle) -> Result<(), EngineError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn is_alive(&self, _handle: &RunnerHandle) -> bool {
            !self.stopped.load(Ordering::SeqCst)
        }
    }

    fn variant(id: &str) -> EngineVariant {
        EngineVariant {
            id: EngineVariantId::new(id),
            kind: EngineKind::Synthesis,
            runner: RunnerKind::LocalProcess,
            target: "noop".to_owned(),
            default_model: None,
            capabilities: EngineCapabilities::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn stop_on_a_variant_that_never_started_is_a_no_op() {
        let registry = Arc::new(VariantRegistry::new());
        registry.register(variant("xtts"));
        let ports = Arc::new(crate::port::PortRegistry::new());
        let settings = Arc::new(Settings::new(Arc::new(MemorySettingsRepository::default())));
        let events = EventBus::spawn().await.unwrap();
        let manager = EngineManager::new(registry, ports, HashMap::new(), settings, events);
        assert!(manager.stop(&EngineVariantId::new("xtts"), "manual").await.is_ok());
        assert!(!manager.is_running(&EngineVariantId::new("xtts")));
    }

    #[tokio::test]
    async fn disabled_variant_is_rejected() {
        let registry = Arc::new(VariantRegistry::new());
        let mut v = variant("xtts");
        v.enabled = false;
        registry.register(v);
        let ports = Arc::new(crate::port::PortRegistry::new());
        let settings = Arc::new(Settings::new(Arc::new(MemorySettingsRepository::default())));
        let events = EventBus::spawn().await.unwrap();
        let manager = EngineManager::new(registry, ports, HashMap::new(), settings, events);
        let err = manager.ensure_ready(&EngineVariantId::new("xtts"), None).await.unwrap_err();
        assert!(matches!(err, EngineError::VariantDisabled(_)));
    }
}
