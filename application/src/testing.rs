//! In-memory container runtime for tests.
//!
//! Containers are records in a map; launching one runs a per-image handler
//! synchronously against the mounted host directories, so a handler can
//! read `input.json` and write `output.json` exactly like a real tool.
//! Volumes are in-memory file trees.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use toolcell_domain::ContainerStats;
use toolcell_domain::util::bounded_output;

use crate::ports::container_runtime::{
    CapturedOutput, ContainerRuntime, ContainerState, LaunchSpec, MountSource, RuntimeError, VolumeInfo,
};

/// What a launched fake container does.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Exit immediately
    Exit { code: i64, stdout: String, stderr: String },
    /// Exit after a delay (tokio time)
    ExitAfter { delay: Duration, code: i64 },
    /// Run until killed
    Hang,
}

impl FakeBehavior {
    pub fn exit(code: i64) -> Self {
        FakeBehavior::Exit {
            code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// View of a launch handed to a handler.
pub struct FakeInvocation<'a> {
    pub spec: &'a LaunchSpec,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl FakeInvocation<'_> {
    pub fn input(&self) -> serde_json::Value {
        self.input_dir
            .as_ref()
            .and_then(|dir| std::fs::read_to_string(dir.join("input.json")).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn write_output(&self, file: &str, value: &serde_json::Value) {
        let dir = self.output_dir.as_ref().expect("no output mount");
        std::fs::write(dir.join(file), serde_json::to_vec(value).unwrap()).unwrap();
    }
}

type Handler = Arc<dyn Fn(&FakeInvocation<'_>) -> FakeBehavior + Send + Sync>;

struct FakeContainer {
    running: bool,
    exit_code: Option<i64>,
    health: Option<String>,
    stats: ContainerStats,
    stdout: String,
    stderr: String,
    notify: Arc<Notify>,
}

struct FakeVolume {
    files: BTreeMap<String, Vec<u8>>,
    labels: BTreeMap<String, String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    volumes: HashMap<String, FakeVolume>,
    handlers: HashMap<String, Handler>,
    launched: Vec<LaunchSpec>,
    removed: Vec<String>,
    killed: Vec<String>,
    default_health: Option<String>,
    fail_launch: bool,
    fail_stats: bool,
    fail_volume_listing: bool,
    inspect_delay: Option<Duration>,
    panic_on_wait: bool,
    running_now: usize,
    max_running: usize,
}

impl State {
    fn exit(&mut self, id: &str, code: i64) {
        if let Some(c) = self.containers.get_mut(id)
            && c.running
        {
            c.running = false;
            c.exit_code = Some(code);
            c.notify.notify_one();
            self.running_now = self.running_now.saturating_sub(1);
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<State>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behaviour of containers started from `image`.
    pub fn on_image<F>(&self, image: &str, handler: F)
    where
        F: Fn(&FakeInvocation<'_>) -> FakeBehavior + Send + Sync + 'static,
    {
        self.state.lock().unwrap().handlers.insert(image.to_string(), Arc::new(handler));
    }

    pub fn set_default_health(&self, health: Option<&str>) {
        self.state.lock().unwrap().default_health = health.map(str::to_string);
    }

    pub fn fail_launch(&self, fail: bool) {
        self.state.lock().unwrap().fail_launch = fail;
    }

    pub fn fail_stats(&self, fail: bool) {
        self.state.lock().unwrap().fail_stats = fail;
    }

    pub fn fail_volume_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_volume_listing = fail;
    }

    /// Make every `inspect` take `delay` (tokio time) before answering.
    pub fn delay_inspect(&self, delay: Duration) {
        self.state.lock().unwrap().inspect_delay = Some(delay);
    }

    /// Make `wait` panic, as a bug in a runtime adapter would.
    pub fn panic_on_wait(&self, panic: bool) {
        self.state.lock().unwrap().panic_on_wait = panic;
    }

    /// Insert a running container without launching anything.
    pub fn insert_running(&self, name: &str) -> String {
        let mut st = self.state.lock().unwrap();
        st.containers.insert(name.to_string(), new_container(None));
        st.running_now += 1;
        name.to_string()
    }

    pub fn set_health(&self, id: &str, health: Option<&str>) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.health = health.map(str::to_string);
        }
    }

    pub fn set_stats(&self, id: &str, stats: ContainerStats) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.stats = stats;
        }
    }

    pub fn finish(&self, id: &str, code: i64) {
        self.state.lock().unwrap().exit(id, code);
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Highest number of simultaneously running containers observed.
    pub fn max_running(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    pub fn add_volume(&self, name: &str, created_at: Option<DateTime<Utc>>) {
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            FakeVolume {
                files: BTreeMap::new(),
                labels: BTreeMap::new(),
                created_at,
            },
        );
    }

    pub fn volume_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().unwrap().volumes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn volume_file(&self, volume: &str, path: &str) -> Option<String> {
        let st = self.state.lock().unwrap();
        let bytes = st.volumes.get(volume)?.files.get(path)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn write_volume_file(&self, volume: &str, path: &str, content: &str) {
        if let Some(v) = self.state.lock().unwrap().volumes.get_mut(volume) {
            v.files.insert(path.to_string(), content.as_bytes().to_vec());
        }
    }
}

fn new_container(health: Option<String>) -> FakeContainer {
    FakeContainer {
        running: true,
        exit_code: None,
        health,
        stats: ContainerStats::default(),
        stdout: String::new(),
        stderr: String::new(),
        notify: Arc::new(Notify::new()),
    }
}

fn host_mount(spec: &LaunchSpec, target: &str) -> Option<PathBuf> {
    spec.mounts.iter().find_map(|m| match &m.source {
        MountSource::HostPath(p) if m.target == target => Some(p.clone()),
        _ => None,
    })
}

fn not_found(kind: &'static str, id: &str) -> RuntimeError {
    RuntimeError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(std::io::Error::other)?
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel, std::fs::read(&path)?);
        }
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn backend_name(&self) -> &str {
        "fake"
    }

    async fn ping(&self) -> Result<String, RuntimeError> {
        Ok("fake 1.0".to_string())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let (id, handler) = {
            let mut st = self.state.lock().unwrap();
            if st.fail_launch {
                return Err(RuntimeError::CommandFailed {
                    command: "run".to_string(),
                    message: "image not found".to_string(),
                });
            }
            st.next_id += 1;
            let id = format!("fake-{}", st.next_id);
            st.launched.push(spec.clone());
            (id, st.handlers.get(&spec.image).cloned())
        };

        let invocation = FakeInvocation {
            spec,
            input_dir: host_mount(spec, "/sandbox/input"),
            output_dir: host_mount(spec, "/sandbox/output"),
        };
        let behavior = handler.map(|h| h(&invocation)).unwrap_or(FakeBehavior::exit(0));

        let mut st = self.state.lock().unwrap();
        let health = st.default_health.clone();
        st.containers.insert(id.clone(), new_container(health));
        st.running_now += 1;
        st.max_running = st.max_running.max(st.running_now);
        match behavior {
            FakeBehavior::Exit { code, stdout, stderr } => {
                if let Some(c) = st.containers.get_mut(&id) {
                    c.stdout = stdout;
                    c.stderr = stderr;
                }
                st.exit(&id, code);
            }
            FakeBehavior::ExitAfter { delay, code } => {
                let state = self.state.clone();
                let cid = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.lock().unwrap().exit(&cid, code);
                });
            }
            FakeBehavior::Hang => {}
        }
        Ok(id)
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let panic = self.state.lock().unwrap().panic_on_wait;
        if panic {
            panic!("fake runtime: wait failed for {}", id);
        }
        loop {
            let notify = {
                let st = self.state.lock().unwrap();
                let c = st.containers.get(id).ok_or_else(|| not_found("container", id))?;
                if let Some(code) = c.exit_code {
                    return Ok(code);
                }
                c.notify.clone()
            };
            notify.notified().await;
        }
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let delay = self.state.lock().unwrap().inspect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let st = self.state.lock().unwrap();
        let c = st.containers.get(id).ok_or_else(|| not_found("container", id))?;
        Ok(ContainerState {
            running: c.running,
            exit_code: c.exit_code,
            health: c.health.clone(),
        })
    }

    async fn stats(&self, id: &str) -> Result<ContainerStats, RuntimeError> {
        let st = self.state.lock().unwrap();
        if st.fail_stats {
            return Err(RuntimeError::CommandFailed {
                command: "stats".to_string(),
                message: "daemon hiccup".to_string(),
            });
        }
        let c = st.containers.get(id).ok_or_else(|| not_found("container", id))?;
        Ok(c.stats)
    }

    async fn logs(&self, id: &str, max_bytes: usize) -> Result<CapturedOutput, RuntimeError> {
        let st = self.state.lock().unwrap();
        let c = st.containers.get(id).ok_or_else(|| not_found("container", id))?;
        Ok(CapturedOutput {
            stdout: bounded_output(c.stdout.as_bytes(), max_bytes),
            stderr: bounded_output(c.stderr.as_bytes(), max_bytes),
        })
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        let mut st = self.state.lock().unwrap();
        if !st.containers.contains_key(id) {
            return Err(not_found("container", id));
        }
        st.killed.push(id.to_string());
        st.exit(id, 137);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let mut st = self.state.lock().unwrap();
        st.exit(id, 137);
        st.containers.remove(id).ok_or_else(|| not_found("container", id))?;
        st.removed.push(id.to_string());
        Ok(())
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| FakeVolume {
                files: BTreeMap::new(),
                labels: labels.clone(),
                created_at: Some(Utc::now()),
            });
        Ok(())
    }

    async fn list_volumes(&self, prefix: &str) -> Result<Vec<String>, RuntimeError> {
        let st = self.state.lock().unwrap();
        if st.fail_volume_listing {
            return Err(RuntimeError::CommandFailed {
                command: "volume ls".to_string(),
                message: "daemon unavailable".to_string(),
            });
        }
        Ok(st.volumes.keys().filter(|n| n.starts_with(prefix)).cloned().collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, RuntimeError> {
        let st = self.state.lock().unwrap();
        let v = st.volumes.get(name).ok_or_else(|| not_found("volume", name))?;
        Ok(VolumeInfo {
            name: name.to_string(),
            created_at: v.created_at,
            labels: v.labels.clone(),
        })
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("volume", name))
    }

    async fn copy_into_volume(&self, volume: &str, src_dir: &Path) -> Result<(), RuntimeError> {
        let mut files = BTreeMap::new();
        collect_files(src_dir, src_dir, &mut files).map_err(|e| RuntimeError::Io(e.to_string()))?;
        let mut st = self.state.lock().unwrap();
        let v = st.volumes.get_mut(volume).ok_or_else(|| not_found("volume", volume))?;
        v.files.extend(files);
        Ok(())
    }

    async fn copy_from_volume(&self, volume: &str, dest_dir: &Path) -> Result<(), RuntimeError> {
        let files = {
            let st = self.state.lock().unwrap();
            st.volumes
                .get(volume)
                .ok_or_else(|| not_found("volume", volume))?
                .files
                .clone()
        };
        for (rel, bytes) in files {
            let target = dest_dir.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Io(e.to_string()))?;
            }
            std::fs::write(&target, bytes).map_err(|e| RuntimeError::Io(e.to_string()))?;
        }
        Ok(())
    }
}
