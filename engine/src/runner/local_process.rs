//! Runs an engine variant as a plain subprocess on this host.
//!
//! No direct teacher precedent — the closest thing `sources` does is
//! shell out to `curl` inside an access module. Grounded on idiomatic
//! `tokio::process::Command` supervision: spawn, keep the `Child` handle
//! around (keyed by variant), `kill` on stop.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::runner::{EngineRunner, ProcessRef, RunnerHandle};
use crate::variant::EngineVariant;

/// `target` on the variant is a shell command template; `{port}` is
/// substituted with the allocated port before spawning.
pub struct LocalProcessRunner {
    host: String,
    children: Mutex<HashMap<u32, Child>>,
}

impl LocalProcessRunner {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            children: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

#[async_trait]
impl EngineRunner for LocalProcessRunner {
    async fn start(&self, variant: &EngineVariant, port: u16) -> Result<RunnerHandle, EngineError> {
        let command_line = variant.target.replace("{port}", &port.to_string());
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| EngineError::Spawn(variant.id.clone(), "empty command".to_owned()))?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Spawn(variant.id.clone(), e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::Spawn(variant.id.clone(), "process exited immediately".to_owned()))?;
        info!(variant = %variant.id, pid, port, "started local process engine");
        self.children.lock().insert(pid, child);

        Ok(RunnerHandle {
            base_url: format!("http://{}:{port}", self.host),
            process: ProcessRef::LocalProcess(pid),
        })
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<(), EngineError> {
        let ProcessRef::LocalProcess(pid) = &handle.process else {
            return Ok(());
        };
        if let Some(mut child) = self.children.lock().remove(pid) {
            if let Err(e) = child.kill().await {
                warn!(pid, error = %e, "failed to kill local process engine");
            }
        }
        Ok(())
    }

    async fn is_alive(&self, handle: &RunnerHandle) -> bool {
        let ProcessRef::LocalProcess(pid) = &handle.process else {
            return false;
        };
        let mut children = self.children.lock();
        match children.get_mut(pid) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
