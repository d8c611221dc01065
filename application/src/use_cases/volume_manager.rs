//! Persistent volume lifecycle.
//!
//! Volumes carry durable tool state between executions. Every managed
//! volume is named `<prefix>-…` and labelled so the garbage collector can
//! find it again:
//!
//! | Label | Value |
//! |-------|-------|
//! | `toolcell.managed` | `true` |
//! | `toolcell.created-at` | RFC 3339 creation time |
//! | `toolcell.tool-id` | owning tool (per-tool volumes only) |
//!
//! Per-tool volumes are named `<prefix>-tool-<sanitized id>-<digest>`, where
//! the digest is taken over the raw tool ID, so IDs that sanitize alike
//! never share state. First use of a per-tool volume is serialized per tool.
//!
//! Seeding stages files into a scratch directory, copies the tree into the
//! volume through the runtime, and removes the scratch directory whether or
//! not the copy succeeded.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use toolcell_domain::util::sanitize_name;

use crate::config::VolumeConfig;
use crate::ports::container_runtime::{ContainerRuntime, RuntimeError, VolumeInfo};

pub const LABEL_MANAGED: &str = "toolcell.managed";
pub const LABEL_CREATED_AT: &str = "toolcell.created-at";
pub const LABEL_TOOL_ID: &str = "toolcell.tool-id";

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to stage volume files at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid volume file path '{0}'")]
    InvalidPath(String),
}

/// Volume handed to a sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredVolume {
    pub name: String,
    /// Created (and seeded) by this call
    pub created: bool,
    /// Survives the execution
    pub persistent: bool,
}

/// Outcome of a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct VolumeManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: VolumeConfig,
    /// One lock per persistent volume name, held across inspect/create/seed
    first_use: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VolumeManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: VolumeConfig) -> Self {
        Self {
            runtime,
            config,
            first_use: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Create a fresh, uniquely named volume.
    pub async fn create_volume(&self) -> Result<String, VolumeError> {
        let name = format!("{}-{}", self.config.prefix, uuid::Uuid::new_v4().simple());
        self.create_named(&name, None).await?;
        Ok(name)
    }

    async fn create_named(&self, name: &str, tool_id: Option<&str>) -> Result<(), VolumeError> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_CREATED_AT.to_string(), Utc::now().to_rfc3339());
        if let Some(tool_id) = tool_id {
            labels.insert(LABEL_TOOL_ID.to_string(), tool_id.to_string());
        }
        self.runtime.create_volume(name, &labels).await?;
        debug!(volume = name, "Volume created");
        Ok(())
    }

    /// Seed a volume with `files` (relative path → content).
    pub async fn initialize_volume(&self, name: &str, files: &BTreeMap<String, String>) -> Result<(), VolumeError> {
        if files.is_empty() {
            return Ok(());
        }
        // Dropped at the end of this function on every path.
        let scratch = tempfile::Builder::new()
            .prefix("toolcell-seed-")
            .tempdir()
            .map_err(|source| VolumeError::Staging {
                path: std::env::temp_dir(),
                source,
            })?;

        for (relative, content) in files {
            let target = scratch.path().join(checked_relative(relative)?);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| VolumeError::Staging {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|source| VolumeError::Staging { path: target.clone(), source })?;
        }

        self.runtime.copy_into_volume(name, scratch.path()).await?;
        debug!(volume = name, files = files.len(), "Volume seeded");
        Ok(())
    }

    /// Copy a volume's contents to `dest` for postmortem inspection.
    pub async fn extract_from_volume(&self, name: &str, dest: &Path) -> Result<(), VolumeError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|source| VolumeError::Staging {
                path: dest.to_path_buf(),
                source,
            })?;
        self.runtime.copy_from_volume(name, dest).await?;
        Ok(())
    }

    /// Volume for one execution of `tool_id`.
    ///
    /// With persistence enabled the name is deterministic per tool and the
    /// files are seeded only when the volume is first created. Otherwise a
    /// fresh volume is created and seeded, and the caller removes it.
    pub async fn acquire_tool_volume(
        &self,
        tool_id: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<AcquiredVolume, VolumeError> {
        if !self.config.persistent {
            let name = self.create_volume().await?;
            if let Err(e) = self.initialize_volume(&name, files).await {
                self.discard(&name).await;
                return Err(e);
            }
            return Ok(AcquiredVolume {
                name,
                created: true,
                persistent: false,
            });
        }

        let name = self.tool_volume_name(tool_id);
        let lock = self.first_use_lock(&name);
        let _guard = lock.lock().await;
        match self.runtime.inspect_volume(&name).await {
            Ok(_) => Ok(AcquiredVolume {
                name,
                created: false,
                persistent: true,
            }),
            Err(e) if e.is_not_found() => {
                self.create_named(&name, Some(tool_id)).await?;
                if let Err(e) = self.initialize_volume(&name, files).await {
                    // A half-seeded volume would never be seeded again.
                    self.discard(&name).await;
                    return Err(e);
                }
                info!(volume = %name, tool_id, "Persistent tool volume created");
                Ok(AcquiredVolume {
                    name,
                    created: true,
                    persistent: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn tool_volume_name(&self, tool_id: &str) -> String {
        let digest = hex::encode(Sha256::digest(tool_id.as_bytes()));
        format!("{}-tool-{}-{}", self.config.prefix, sanitize_name(tool_id), &digest[..8])
    }

    fn first_use_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.first_use.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    pub async fn remove_volume(&self, name: &str) -> Result<(), VolumeError> {
        self.runtime.remove_volume(name).await?;
        debug!(volume = name, "Volume removed");
        Ok(())
    }

    async fn discard(&self, name: &str) {
        if let Err(e) = self.runtime.remove_volume(name).await {
            warn!(volume = name, error = %e, "Failed to remove volume after seeding failure");
        }
    }

    /// Managed volumes with their creation times, oldest first. Volumes
    /// whose metadata cannot be read sort first with no timestamp.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, VolumeError> {
        let names = self.runtime.list_volumes(&self.config.prefix).await?;
        let mut infos = join_all(names.iter().map(|name| self.describe(name))).await;
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(infos)
    }

    async fn describe(&self, name: &str) -> VolumeInfo {
        match self.runtime.inspect_volume(name).await {
            Ok(mut info) => {
                if info.created_at.is_none() {
                    info.created_at = info
                        .labels
                        .get(LABEL_CREATED_AT)
                        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                        .map(|t| t.with_timezone(&Utc));
                }
                info
            }
            Err(e) => {
                debug!(volume = name, error = %e, "Volume metadata unavailable");
                VolumeInfo {
                    name: name.to_string(),
                    created_at: None,
                    labels: BTreeMap::new(),
                }
            }
        }
    }

    /// Evict the oldest managed volumes until at most `max_volumes` remain.
    ///
    /// Individual removal failures are reported, not propagated; only a
    /// failure to list volumes is an error.
    pub async fn cleanup_old_volumes(&self) -> Result<CleanupReport, VolumeError> {
        let volumes = self.list_volumes().await?;
        let mut report = CleanupReport {
            examined: volumes.len(),
            ..Default::default()
        };
        if volumes.len() <= self.config.max_volumes {
            return Ok(report);
        }

        let excess = volumes.len() - self.config.max_volumes;
        let victims: Vec<String> = volumes.into_iter().take(excess).map(|v| v.name).collect();
        let results = join_all(victims.iter().map(|name| self.runtime.remove_volume(name))).await;

        for (name, result) in victims.into_iter().zip(results) {
            match result {
                Ok(()) => report.removed.push(name),
                Err(e) => {
                    warn!(volume = %name, error = %e, "Failed to evict volume");
                    report.failed.push(name);
                }
            }
        }
        info!(
            examined = report.examined,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Volume cleanup finished"
        );
        Ok(report)
    }
}

fn checked_relative(path: &str) -> Result<&Path, VolumeError> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.trim().is_empty() || escapes {
        return Err(VolumeError::InvalidPath(path.to_string()));
    }
    Ok(p)
}
