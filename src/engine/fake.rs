//! In-memory engine and clock for tests. Time only moves when something
//! sleeps on the [`ManualClock`], so timeout paths run instantly.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::EngineClient;
use crate::error::{Error, Result};
use crate::models::{
    BuildOutput, BuildRequest, ContainerAttrs, ContainerHandle, ContainerSpec, ContainerState,
    ImageAttrs, Phase, PruneReport,
};
use crate::orchestrator::Clock;

#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Give concurrently joined futures a turn, as a real sleep would.
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageGet(String),
    ContainerGet(String),
    CreateAndStart,
    Reload,
    Logs,
    Remove { id: String, force: bool },
    Kill { id: String, signal: String },
    ImageRemove(String),
    Build,
    Pull(String),
}

/// How the single container this engine creates behaves.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub runtime: Duration,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    /// Log lines with the time (since start) at which each is written.
    pub logs: Vec<(Duration, String)>,
    pub create_error: Option<String>,
    pub reload_error: Option<String>,
    /// Reload never answers, like an engine stuck on a request.
    pub reload_hangs: bool,
    pub remove_error: Option<String>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            runtime: Duration::from_secs(1),
            exit_code: Some(0),
            error: None,
            logs: Vec::new(),
            create_error: None,
            reload_error: None,
            reload_hangs: false,
            remove_error: None,
        }
    }
}

pub const CONTAINER_ID: &str = "f00dfeed";

pub struct FakeEngine {
    clock: Arc<ManualClock>,
    images: Vec<String>,
    containers: Vec<String>,
    info: Value,
    behaviour: Behaviour,
    calls: Mutex<Vec<Call>>,
    started_at: Mutex<Option<Duration>>,
    killed: Mutex<Option<String>>,
    last_spec: Mutex<Option<ContainerSpec>>,
}

impl FakeEngine {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            images: Vec::new(),
            containers: Vec::new(),
            info: json!({"OSType": "linux", "Architecture": "x86_64"}),
            behaviour: Behaviour::default(),
            calls: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            killed: Mutex::new(None),
            last_spec: Mutex::new(None),
        }
    }

    pub fn with_image(mut self, reference: &str) -> Self {
        self.images.push(reference.to_string());
        self
    }

    pub fn with_container(mut self, name: &str) -> Self {
        self.containers.push(name.to_string());
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    pub fn with_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| wanted(c)).count()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.last_spec.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn elapsed(&self) -> Option<Duration> {
        let started = (*self.started_at.lock().unwrap())?;
        Some(self.clock.now().saturating_sub(started))
    }

    fn is_ours(&self, id_or_name: &str) -> bool {
        self.started_at.lock().unwrap().is_some()
            && (id_or_name == CONTAINER_ID || id_or_name == "fake-job")
    }

    fn image(reference: &str) -> ImageAttrs {
        ImageAttrs {
            id: format!("sha256:{}", reference.len()),
            tags: vec![reference.to_string()],
            size: 1024,
            created: String::new(),
            digest: String::new(),
            attrs: json!({"RepoTags": [reference]}),
        }
    }

    fn container(id: &str, name: &str, status: &str) -> ContainerAttrs {
        ContainerAttrs {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            image: "alpine:3".to_string(),
            created: String::new(),
            attrs: json!({
                "Id": id,
                "Name": format!("/{}", name),
                "State": {"Status": status, "ExitCode": 0},
                "Config": {"Image": "alpine:3", "Labels": {"tier": "batch"}}
            }),
        }
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn version(&self) -> Result<String> {
        Ok("5.0.0".to_string())
    }

    async fn engine_info(&self) -> Result<Value> {
        Ok(self.info.clone())
    }

    async fn image_get(&self, reference: &str) -> Result<Option<ImageAttrs>> {
        self.record(Call::ImageGet(reference.to_string()));
        Ok(self
            .images
            .iter()
            .find(|i| i.as_str() == reference)
            .map(|i| Self::image(i)))
    }

    async fn image_list(&self, _all: bool) -> Result<Vec<ImageAttrs>> {
        Ok(self.images.iter().map(|i| Self::image(i)).collect())
    }

    async fn image_build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        self.record(Call::Build);
        Ok(BuildOutput {
            image_id: "sha256:built".to_string(),
            tags: request.tag.iter().cloned().collect(),
            platform: request.platform.clone(),
            logs: vec!["STEP 1/1: FROM alpine".to_string()],
        })
    }

    async fn image_pull(&self, repository: &str, tag: &str) -> Result<()> {
        self.record(Call::Pull(format!("{}:{}", repository, tag)));
        Ok(())
    }

    async fn image_remove(&self, reference: &str, _force: bool) -> Result<()> {
        self.record(Call::ImageRemove(reference.to_string()));
        Ok(())
    }

    async fn image_prune(&self) -> Result<PruneReport> {
        Ok(PruneReport {
            images_deleted: vec![json!({"Deleted": "sha256:old"})],
            space_reclaimed: 4096,
        })
    }

    async fn container_get(&self, id_or_name: &str) -> Result<Option<ContainerAttrs>> {
        self.record(Call::ContainerGet(id_or_name.to_string()));
        if self.containers.iter().any(|c| c == id_or_name) {
            return Ok(Some(Self::container(id_or_name, id_or_name, "exited")));
        }
        if self.is_ours(id_or_name) {
            return Ok(Some(Self::container(CONTAINER_ID, "fake-job", "running")));
        }
        Ok(None)
    }

    async fn container_list(&self, _all: bool) -> Result<Vec<ContainerAttrs>> {
        Ok(self
            .containers
            .iter()
            .map(|c| Self::container(c, c, "exited"))
            .collect())
    }

    async fn container_create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.record(Call::CreateAndStart);
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        if let Some(message) = &self.behaviour.create_error {
            return Err(Error::engine(message.clone()));
        }
        *self.started_at.lock().unwrap() = Some(self.clock.now());
        Ok(ContainerHandle {
            id: CONTAINER_ID.to_string(),
            name: spec.name.clone().unwrap_or_else(|| "fake-job".to_string()),
        })
    }

    async fn container_reload(&self, _handle: &ContainerHandle) -> Result<ContainerState> {
        self.record(Call::Reload);
        if self.behaviour.reload_hangs {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.behaviour.reload_error {
            return Err(Error::engine(message.clone()));
        }
        if self.killed.lock().unwrap().is_some() {
            return Ok(ContainerState {
                phase: Phase::Exited,
                exit_code: Some(137),
                error: None,
            });
        }
        let elapsed = self.elapsed().unwrap_or_default();
        if elapsed >= self.behaviour.runtime {
            Ok(ContainerState {
                phase: Phase::Exited,
                exit_code: self.behaviour.exit_code,
                error: self.behaviour.error.clone(),
            })
        } else {
            Ok(ContainerState {
                phase: Phase::Running,
                exit_code: None,
                error: None,
            })
        }
    }

    async fn container_logs(&self, _handle: &ContainerHandle) -> Result<Vec<String>> {
        self.record(Call::Logs);
        let elapsed = self.elapsed().unwrap_or_default();
        Ok(self
            .behaviour
            .logs
            .iter()
            .filter(|(at, _)| *at <= elapsed)
            .map(|(_, line)| line.clone())
            .collect())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<()> {
        self.record(Call::Remove {
            id: id.to_string(),
            force,
        });
        match &self.behaviour.remove_error {
            Some(message) => Err(Error::engine(message.clone())),
            None => Ok(()),
        }
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        self.record(Call::Kill {
            id: id.to_string(),
            signal: signal.to_string(),
        });
        *self.killed.lock().unwrap() = Some(signal.to_string());
        Ok(())
    }
}
