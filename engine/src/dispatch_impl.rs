//! Implements [`forge_store::EngineDispatch`] against [`EngineManager`] —
//! the one place this crate is allowed to know about `forge-store`'s
//! job-facing types, keeping the dependency edge pointing from here to
//! there and not back.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use forge_common::EngineVariantId;
use forge_store::{DispatchError, EngineDispatch, GenerateOutcome, GenerateRequest, JobKind};

use crate::error::EngineError;
use crate::manager::EngineManager;
use crate::retry;
use crate::variant::EngineKind;

/// spec.md §4.4: "500 / connect error ... up to 3 attempts; between
/// attempts, stop and restart the engine".
const MAX_SERVER_ERROR_ATTEMPTS: u32 = 3;
/// spec.md §4.4: "503 ... wait 1 s and retry without restart".
const LOADING_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// spec.md §4.4: "cumulative wait cap 300 s".
const LOADING_CUMULATIVE_CAP: Duration = Duration::from_secs(300);

fn job_kind_to_engine_kind(kind: JobKind) -> EngineKind {
    match kind {
        JobKind::Synthesis => EngineKind::Synthesis,
        JobKind::Analysis => EngineKind::Analysis,
    }
}

fn engine_error_to_dispatch_error(err: EngineError) -> DispatchError {
    match err {
        EngineError::VariantNotFound(id) | EngineError::VariantDisabled(id) => {
            DispatchError::ClientError(format!("{id} is not an available engine variant"))
        }
        EngineError::NoDefaultVariant(kind) => DispatchError::ClientError(format!("no default variant for {kind:?}")),
        EngineError::CannotDisableDefaultTts(_) => DispatchError::ClientError(err.to_string()),
        EngineError::PortExhausted | EngineError::Spawn(..) | EngineError::Docker(_) | EngineError::NotRunning(_) => {
            DispatchError::ServerError(err.to_string())
        }
        EngineError::Http(e) => DispatchError::Unreachable(e.to_string()),
        EngineError::Settings(e) => DispatchError::ClientError(e.to_string()),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
    speaker: Option<&'a str>,
    pause_ms: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_path: String,
    duration_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    text: &'a str,
    audio_path: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    score: f32,
    #[serde(default)]
    issues: Vec<String>,
}

/// Drives one segment's call through spec.md §4.4's retry table: a 503
/// waits 1 s and retries without restarting, up to a 300 s cumulative
/// wait; a server error or transport failure restarts the engine between
/// attempts, up to 3 attempts total; anything else (client error) returns
/// immediately. `base_url` is re-resolved after every restart since the
/// relaunched engine can land on a different port.
async fn post_with_retry<Req: Serialize, Resp: DeserializeOwned>(
    manager: &EngineManager,
    variant_id: &EngineVariantId,
    model: Option<&str>,
    mut base_url: String,
    path: &str,
    body: &Req,
) -> Result<Resp, DispatchError> {
    let mut server_error_attempts = 0u32;
    let mut loading_wait = Duration::ZERO;
    loop {
        let url = format!("{base_url}{path}");
        match retry::post_json(manager.http_client(), &url, body).await {
            Ok(resp) => return Ok(resp),
            Err(DispatchError::Loading) => {
                loading_wait += LOADING_RETRY_INTERVAL;
                if loading_wait > LOADING_CUMULATIVE_CAP {
                    return Err(DispatchError::Loading);
                }
                tokio::time::sleep(LOADING_RETRY_INTERVAL).await;
            }
            Err(e) if e.requires_restart() => {
                server_error_attempts += 1;
                if server_error_attempts >= MAX_SERVER_ERROR_ATTEMPTS {
                    return Err(e);
                }
                match manager.restart(variant_id, model).await {
                    Ok(new_base_url) => base_url = new_base_url,
                    Err(restart_err) => {
                        warn!(variant = %variant_id, error = %restart_err, "engine restart failed during retry");
                        return Err(e);
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl EngineDispatch for EngineManager {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateOutcome, DispatchError> {
        let base_url = self
            .ensure_ready(&request.engine_variant_id, request.model.as_deref())
            .await
            .map_err(engine_error_to_dispatch_error)?;
        let model = request.model.as_deref();

        match request.kind {
            JobKind::Synthesis => {
                let body = SynthesizeRequest {
                    text: &request.segment.text,
                    language: &request.segment.language,
                    speaker: request.segment.speaker.as_deref(),
                    pause_ms: request.segment.pause_ms,
                };
                let response: SynthesizeResponse =
                    post_with_retry(self, &request.engine_variant_id, model, base_url, "/synthesize", &body).await?;
                Ok(GenerateOutcome::Synthesis {
                    audio_path: response.audio_path,
                    duration_ms: response.duration_ms,
                })
            }
            JobKind::Analysis => {
                let body = AnalyzeRequest {
                    text: &request.segment.text,
                    audio_path: None,
                };
                let response: AnalyzeResponse =
                    post_with_retry(self, &request.engine_variant_id, model, base_url, "/analyze", &body).await?;
                Ok(GenerateOutcome::Analysis {
                    score: response.score,
                    issues: response.issues,
                })
            }
        }
    }

    async fn has_variant_for(&self, kind: JobKind) -> bool {
        let engine_kind = job_kind_to_engine_kind(kind);
        self.registry()
            .list_for_kind(engine_kind)
            .into_iter()
            .any(|v| v.enabled)
    }
}
