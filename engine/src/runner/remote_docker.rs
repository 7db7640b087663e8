//! Runs an engine variant on a remote Docker daemon.
//!
//! Grounded on `original_source/backend/core/remote_docker_runner.py`'s
//! architecture note that the runner never owns the connection itself —
//! here that means taking a `Docker` handle the caller already connected
//! (e.g. over an SSH-forwarded local port) rather than dialing out on
//! every call. The actual SSH tunnel setup is a deployment concern
//! outside this crate; `forged`'s config loading is expected to open the
//! tunnel and pass the resulting `tcp://127.0.0.1:<port>` endpoint in.

use async_trait::async_trait;
use bollard::Docker;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::runner::local_docker::DockerVolumes;
use crate::runner::{EngineRunner, ProcessRef, RunnerHandle};
use crate::variant::EngineVariant;

pub struct RemoteDockerRunner {
    docker: Docker,
    host_label: String,
    reachable_host: String,
    volumes: DockerVolumes,
}

impl RemoteDockerRunner {
    /// `endpoint` is the already-tunneled Docker API address (e.g.
    /// `tcp://127.0.0.1:23750`); `reachable_host` is how *this* process
    /// should address containers on that host (often the same tunnel
    /// endpoint's hostname, sometimes a separate public IP).
    pub fn connect(endpoint: &str, host_label: impl Into<String>, reachable_host: impl Into<String>, volumes: DockerVolumes) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| EngineError::Docker(e.to_string()))?;
        Ok(Self {
            docker,
            host_label: host_label.into(),
            reachable_host: reachable_host.into(),
            volumes,
        })
    }

    fn container_name(variant: &EngineVariant) -> String {
        format!("forge-{}", variant.id.as_str().replace(':', "-"))
    }
}

#[async_trait]
impl EngineRunner for RemoteDockerRunner {
    async fn start(&self, variant: &EngineVariant, port: u16) -> Result<RunnerHandle, EngineError> {
        // Delegate the actual container lifecycle to the same logic local
        // docker uses, just against a different daemon connection — the
        // host-reachability and naming differ, the Docker API calls don't.
        let local = crate::runner::local_docker::LocalDockerRunner::from_parts(
            self.docker.clone(),
            self.reachable_host.clone(),
            self.volumes.clone(),
        );
        info!(variant = %variant.id, host = %self.host_label, "starting engine on remote docker host");
        local.start(variant, port).await
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<(), EngineError> {
        let ProcessRef::Container(id) = &handle.process else {
            return Ok(());
        };
        if let Err(e) = self
            .docker
            .stop_container(id, Some(bollard::container::StopContainerOptions { t: 10 }))
            .await
        {
            warn!(container = %id, host = %self.host_label, error = %e, "failed to stop remote container");
        }
        Ok(())
    }

    async fn is_alive(&self, handle: &RunnerHandle) -> bool {
        let ProcessRef::Container(id) = &handle.process else {
            return false;
        };
        matches!(
            self.docker.inspect_container(id, None).await,
            Ok(c) if c.state.and_then(|s| s.running).unwrap_or(false)
        )
    }
}
