//! [`ContainerRuntime`] backed by the `docker` command-line client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use toolcell_application::{
    CapturedOutput, ContainerRuntime, ContainerState, LaunchSpec, RuntimeError, VolumeInfo,
};
use toolcell_domain::ContainerStats;
use toolcell_domain::util::bounded_output;

use super::args::{helper_args, run_args};
use super::units::parse_stats_line;

/// Adapter settings.
#[derive(Debug, Clone)]
pub struct DockerSettings {
    /// Client binary; resolved on `PATH` when relative
    pub binary: String,
    /// Image for the short-lived containers that copy files in and out of volumes
    pub helper_image: String,
    /// `uid:gid` applied to files copied into a volume
    pub volume_owner: Option<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            helper_image: "alpine:3".to_string(),
            volume_owner: Some("65534:65534".to_string()),
        }
    }
}

pub struct DockerCliRuntime {
    binary: PathBuf,
    settings: DockerSettings,
}

impl DockerCliRuntime {
    /// Locate the client binary.
    ///
    /// Fails with [`RuntimeError::Unavailable`] when it is not installed; the
    /// daemon itself is only contacted by [`ContainerRuntime::ping`].
    pub fn new(settings: DockerSettings) -> Result<Self, RuntimeError> {
        let binary = which::which(&settings.binary).map_err(|e| {
            RuntimeError::Unavailable(format!("'{}' not found on PATH: {}", settings.binary, e))
        })?;
        Ok(Self { binary, settings })
    }

    /// Check if the docker client is installed
    pub fn is_available() -> bool {
        which::which("docker").is_ok()
    }

    /// Run a client command and return its stdout.
    async fn exec<I, S>(&self, args: I) -> Result<String, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let label = args
            .iter()
            .take(2)
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(command = %label, "docker");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("failed to run {}: {}", self.binary.display(), e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&label, stderr))
    }
}

/// Map a failed client invocation to a [`RuntimeError`].
fn classify_failure(command: &str, stderr: String) -> RuntimeError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no such container") || lower.contains("no such volume") || lower.contains("no such object")
    {
        let kind = if command.starts_with("volume") { "volume" } else { "container" };
        return RuntimeError::NotFound {
            kind,
            id: stderr,
        };
    }
    if lower.contains("cannot connect to the docker daemon") || lower.contains("is the docker daemon running") {
        return RuntimeError::Unavailable(stderr);
    }
    RuntimeError::CommandFailed {
        command: command.to_string(),
        message: if stderr.is_empty() { "exited with non-zero status".to_string() } else { stderr },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    exit_code: Option<i64>,
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectVolume {
    name: String,
    created_at: Option<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Keep at most `limit` bytes of a stream and discard the rest, so the
/// writer never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: u64) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    (&mut reader).take(limit).read_to_end(&mut kept).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(kept)
}

fn parse_state(raw: &str) -> Result<ContainerState, RuntimeError> {
    let state: InspectState =
        serde_json::from_str(raw.trim()).map_err(|e| RuntimeError::Parse(format!("inspect: {}", e)))?;
    Ok(ContainerState {
        running: state.running,
        exit_code: if state.running { None } else { state.exit_code },
        health: state.health.map(|h| h.status),
    })
}

fn parse_volume(raw: &str) -> Result<VolumeInfo, RuntimeError> {
    let vol: InspectVolume =
        serde_json::from_str(raw.trim()).map_err(|e| RuntimeError::Parse(format!("volume inspect: {}", e)))?;
    let created_at = vol
        .created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    Ok(VolumeInfo {
        name: vol.name,
        created_at,
        labels: vol.labels.unwrap_or_default(),
    })
}

fn path_arg(path: &Path) -> Result<String, RuntimeError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::Io(format!("non UTF-8 path: {}", path.display())))
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    fn backend_name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<String, RuntimeError> {
        let version = self.exec(["version", "--format", "{{.Server.Version}}"]).await?;
        Ok(version.trim().to_string())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let id = self.exec(run_args(spec)).await?;
        let id = id.trim();
        if id.is_empty() {
            return Err(RuntimeError::Parse("docker run printed no container ID".to_string()));
        }
        Ok(id.to_string())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let out = self.exec(["wait", id]).await?;
        out.trim()
            .parse()
            .map_err(|_| RuntimeError::Parse(format!("wait: unexpected exit code '{}'", out.trim())))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let out = self.exec(["inspect", "--type", "container", "--format", "{{json .State}}", id]).await?;
        parse_state(&out)
    }

    async fn stats(&self, id: &str) -> Result<ContainerStats, RuntimeError> {
        let out = self.exec(["stats", "--no-stream", "--format", "{{json .}}", id]).await?;
        let line = out
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| RuntimeError::Parse("stats: empty output".to_string()))?;
        parse_stats_line(line)
    }

    async fn logs(&self, id: &str, max_bytes: usize) -> Result<CapturedOutput, RuntimeError> {
        let mut child = Command::new(&self.binary)
            .args(["logs", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Io(e.to_string()))?;

        // One byte past the cap so truncation still shows
        let limit = max_bytes as u64 + 1;
        let (stdout, stderr) = tokio::try_join!(
            read_capped(child.stdout.take(), limit),
            read_capped(child.stderr.take(), limit),
        )
        .map_err(|e| RuntimeError::Io(e.to_string()))?;

        let status = child.wait().await.map_err(|e| RuntimeError::Io(e.to_string()))?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(classify_failure("logs", stderr));
        }
        Ok(CapturedOutput {
            stdout: bounded_output(&stdout, max_bytes),
            stderr: bounded_output(&stderr, max_bytes),
        })
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        match self.exec(["kill", id]).await {
            Ok(_) => Ok(()),
            // Already exited
            Err(RuntimeError::CommandFailed { message, .. }) if message.contains("is not running") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(["rm", "-f", "-v", id]).await.map(|_| ())
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), RuntimeError> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(name.to_string());
        self.exec(args).await.map(|_| ())
    }

    async fn list_volumes(&self, prefix: &str) -> Result<Vec<String>, RuntimeError> {
        let filter = format!("name={}", prefix);
        let out = self.exec(["volume", "ls", "--filter", &filter, "--format", "{{.Name}}"]).await?;
        // The name filter matches substrings
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|n| n.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, RuntimeError> {
        let out = self.exec(["volume", "inspect", "--format", "{{json .}}", name]).await?;
        parse_volume(&out)
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.exec(["volume", "rm", "-f", name]).await.map(|_| ())
    }

    async fn copy_into_volume(&self, volume: &str, src_dir: &Path) -> Result<(), RuntimeError> {
        let mut script = "cp -a /host/. /volume/".to_string();
        if let Some(owner) = &self.settings.volume_owner {
            script.push_str(&format!(" && chown -R {} /volume", owner));
        }
        let args = helper_args(&self.settings.helper_image, volume, &path_arg(src_dir)?, true, &script);
        self.exec(args).await.map(|_| ())
    }

    async fn copy_from_volume(&self, volume: &str, dest_dir: &Path) -> Result<(), RuntimeError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
        let args = helper_args(
            &self.settings.helper_image,
            volume,
            &path_arg(dest_dir)?,
            false,
            "cp -a /volume/. /host/",
        );
        self.exec(args).await.map(|_| ()).inspect_err(|e| {
            warn!(volume, error = %e, "Copy out of volume failed");
        })
    }
}
