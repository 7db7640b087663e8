//! Daemon configuration: where the database lives, which engine variants
//! are installed at boot, and the port range the engine manager scans.
//!
//! Grounded on `fetiched/src/config.rs::default_workdir` for the
//! environment-variable-with-platform-default pattern, adapted from HCL
//! to JSON since nothing in this workspace pulls in `hcl-rs`.

use std::fs;
use std::path::PathBuf;

use eyre::{Context, Result};
use serde::Deserialize;

use forge_engine::{EngineCapabilities, EngineKind, EngineVariant, RunnerKind};

#[cfg(unix)]
const DEFAULT_WORKDIR: &str = "/var/lib/forged";

/// Resolves the directory the daemon keeps its database and any local
/// state in. `FORGE_WORKDIR` overrides the platform default; the
/// directory is created if it does not already exist.
#[cfg(unix)]
#[tracing::instrument]
pub fn default_workdir() -> Result<PathBuf> {
    let dir = match std::env::var("FORGE_WORKDIR") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from(DEFAULT_WORKDIR),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).wrap_err_with(|| format!("creating workdir {}", dir.display()))?;
    }
    Ok(dir)
}

#[cfg(windows)]
#[tracing::instrument]
pub fn default_workdir() -> Result<PathBuf> {
    let dir = match std::env::var("FORGE_WORKDIR") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let local = std::env::var("LOCALAPPDATA").wrap_err("LOCALAPPDATA not set")?;
            PathBuf::from(local).join("forged")
        }
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).wrap_err_with(|| format!("creating workdir {}", dir.display()))?;
    }
    Ok(dir)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    pub samples_volume: Option<String>,
    pub models_volume: Option<String>,
    /// SSH-reachable Docker endpoints, e.g. `ssh://user@gpu-box`, each
    /// wired up as a `RunnerKind::RemoteDocker` backend in addition to
    /// the always-present local process and local Docker runners.
    #[serde(default)]
    pub remote_endpoints: Vec<RemoteDockerEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDockerEndpoint {
    pub endpoint: String,
    pub host_label: String,
    pub reachable_host: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding `catalog.sqlite`. Defaults to
    /// [`default_workdir`] when unset.
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
    /// Engine variants to register on first boot (subsequent boots load
    /// the persisted catalog instead, per SPEC_FULL §4.9 — this list is
    /// only consulted when the catalog table is empty).
    #[serde(default)]
    pub seed_variants: Vec<EngineVariant>,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(&path).wrap_err_with(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).wrap_err_with(|| format!("parsing config file {}", path.display()))
    }

    pub fn resolved_workdir(&self) -> Result<PathBuf> {
        match &self.workdir {
            Some(dir) => {
                if !dir.exists() {
                    fs::create_dir_all(dir).wrap_err_with(|| format!("creating workdir {}", dir.display()))?;
                }
                Ok(dir.clone())
            }
            None => default_workdir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: None,
            docker: None,
            seed_variants: default_seed_variants(),
        }
    }
}

/// A single local-process TTS variant, enough to make `forged` runnable
/// out of the box with no config file at all.
fn default_seed_variants() -> Vec<EngineVariant> {
    vec![EngineVariant {
        id: forge_common::EngineVariantId::new("default-tts"),
        kind: EngineKind::Synthesis,
        runner: RunnerKind::LocalProcess,
        target: "tts-server --port {port}".to_owned(),
        default_model: None,
        capabilities: EngineCapabilities::default(),
        enabled: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_config_file_falls_back_to_a_default_with_one_seed_variant() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.seed_variants.len(), 1);
        assert_eq!(cfg.seed_variants[0].id, forge_common::EngineVariantId::new("default-tts"));
    }

    #[test]
    fn explicit_workdir_is_used_as_is_and_created() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("nested");
        let cfg = Config {
            workdir: Some(workdir.clone()),
            docker: None,
            seed_variants: vec![],
        };
        let resolved = cfg.resolved_workdir().unwrap();
        assert_eq!(resolved, workdir);
        assert!(workdir.exists());
    }

    #[test]
    fn load_parses_a_json_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forged.json");
        std::fs::write(&path, r#"{"workdir": null, "seedVariants": []}"#).unwrap();

        let cfg = Config::load(Some(path)).unwrap();
        assert!(cfg.seed_variants.is_empty());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Config::load(Some(missing)).is_err());
    }
}
