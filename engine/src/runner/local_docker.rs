//! Runs an engine variant as a container on the local Docker daemon.
//!
//! Grounded on `original_source/backend/core/docker_runner.py`: pull the
//! image if it's not present locally, mount the samples/models volumes,
//! request a GPU device when the variant calls for one, and name the
//! container deterministically so a restart of this process can adopt a
//! container still running from before.

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceRequest, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::runner::{EngineRunner, ProcessRef, RunnerHandle};
use crate::variant::EngineVariant;

/// Host-side mount points threaded into every container, mirroring the
/// `docker_volumes` config block the Python runner reads per-engine.
#[derive(Clone, Debug, Default)]
pub struct DockerVolumes {
    pub samples: Option<String>,
    pub models: Option<String>,
}

pub struct LocalDockerRunner {
    docker: Docker,
    engine_host: String,
    volumes: DockerVolumes,
}

impl LocalDockerRunner {
    pub fn connect(volumes: DockerVolumes) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| EngineError::Docker(e.to_string()))?;
        let engine_host = std::env::var("DOCKER_ENGINE_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        Ok(Self {
            docker,
            engine_host,
            volumes,
        })
    }

    /// Build directly from an already-established `Docker` connection —
    /// used by [`crate::runner::remote_docker::RemoteDockerRunner`], which
    /// shares this runner's container lifecycle logic against a
    /// different daemon endpoint.
    pub(crate) fn from_parts(docker: Docker, engine_host: String, volumes: DockerVolumes) -> Self {
        Self {
            docker,
            engine_host,
            volumes,
        }
    }

    fn container_name(variant: &EngineVariant) -> String {
        format!("forge-{}", variant.id.as_str().replace(':', "-"))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "image already present locally");
            return Ok(());
        }
        info!(image, "pulling engine image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| EngineError::Docker(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EngineRunner for LocalDockerRunner {
    async fn start(&self, variant: &EngineVariant, port: u16) -> Result<RunnerHandle, EngineError> {
        let image = &variant.target;
        self.ensure_image(image).await?;

        let name = Self::container_name(variant);
        if let Ok(existing) = self.docker.inspect_container(&name, None).await {
            if existing.state.and_then(|s| s.running).unwrap_or(false) {
                if let Some(id) = existing.id {
                    info!(variant = %variant.id, container = %id, "reusing already-running container");
                    return Ok(RunnerHandle {
                        base_url: format!("http://{}:{port}", self.engine_host),
                        process: ProcessRef::Container(id),
                    });
                }
            }
            let _ = self
                .docker
                .remove_container(&name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                .await;
        }

        let port_key = format!("{port}/tcp");
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_owned()),
                host_port: Some(port.to_string()),
            }]),
        );

        let mut binds = Vec::new();
        if let Some(samples) = &self.volumes.samples {
            binds.push(format!("{samples}:/app/samples:rw"));
        }
        if let Some(models) = &self.volumes.models {
            binds.push(format!("{models}/{}:/app/external_models:rw", variant.id.as_str()));
        }

        let device_requests = if variant.capabilities.supports_gpu {
            Some(vec![DeviceRequest {
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_owned()]]),
                ..Default::default()
            }])
        } else {
            None
        };

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            device_requests,
            auto_remove: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.clone()),
            env: Some(vec![format!("PORT={port}")]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), config)
            .await
            .map_err(|e| EngineError::Spawn(variant.id.clone(), e.to_string()))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| EngineError::Spawn(variant.id.clone(), e.to_string()))?;

        info!(variant = %variant.id, container = %created.id, port, "started docker engine");
        Ok(RunnerHandle {
            base_url: format!("http://{}:{port}", self.engine_host),
            process: ProcessRef::Container(created.id),
        })
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<(), EngineError> {
        let ProcessRef::Container(id) = &handle.process else {
            return Ok(());
        };
        if let Err(e) = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            warn!(container = %id, error = %e, "failed to stop container (may already be gone)");
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
