use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config;
use crate::error::Error;

// ---- Run request ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Ro,
    Rw,
}

impl FromStr for MountMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" => Ok(MountMode::Ro),
            "rw" => Ok(MountMode::Rw),
            other => Err(Error::InvalidArgument(format!(
                "volume mode must be 'ro' or 'rw', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountMode::Ro => f.write_str("ro"),
            MountMode::Rw => f.write_str("rw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub bind: String,
    pub mode: MountMode,
}

/// Everything needed to run one container to completion. Built once per
/// invocation and never mutated by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub detach: bool,
    /// container port -> host port
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// host path -> mount
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeMount>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    pub auto_remove: bool,
    pub network: String,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub memory_swap: Option<String>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub storage_opt: Option<BTreeMap<String, String>>,
    /// Zero means wait for as long as the container runs.
    #[serde(default)]
    pub timeout: Duration,
}

impl RunRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            detach: true,
            ports: BTreeMap::new(),
            environment: BTreeMap::new(),
            volumes: BTreeMap::new(),
            command: None,
            entrypoint: None,
            working_dir: None,
            auto_remove: true,
            network: config::DEFAULT_NETWORK.to_string(),
            memory: Some(config::DEFAULT_MEMORY.to_string()),
            memory_swap: Some(config::DEFAULT_MEMORY_SWAP.to_string()),
            cpus: Some(config::DEFAULT_CPUS),
            storage_opt: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

// ---- Engine-side containers ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Stopped,
    Dead,
}

impl Phase {
    /// Maps the status word an engine reports. Podman's "configured" and
    /// "initialized" both mean the container exists but never started.
    pub fn from_status(status: &str) -> Option<Self> {
        let phase = match status.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => Phase::Created,
            "running" => Phase::Running,
            "paused" => Phase::Paused,
            "restarting" => Phase::Restarting,
            "removing" => Phase::Removing,
            "exited" => Phase::Exited,
            "stopped" => Phase::Stopped,
            "dead" => Phase::Dead,
            _ => return None,
        };
        Some(phase)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Exited | Phase::Stopped | Phase::Dead)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Restarting => "restarting",
            Phase::Removing => "removing",
            Phase::Exited => "exited",
            Phase::Stopped => "stopped",
            Phase::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Opaque reference to a container the orchestrator created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Observed state from one reload. `exit_code` is only meaningful once the
/// phase is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub phase: Phase,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

/// Exactly the fields of a [`RunRequest`] that were present, plus the
/// translated resource limits. Absent options stay `None` all the way to the
/// wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub attach: bool,
    pub ports: Option<BTreeMap<u16, u16>>,
    pub environment: Option<BTreeMap<String, String>>,
    pub volumes: Option<BTreeMap<String, VolumeMount>>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub network_mode: String,
    pub limits: crate::constraints::ResourceLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageAttrs {
    pub id: String,
    pub tags: Vec<String>,
    pub size: i64,
    pub created: String,
    pub digest: String,
    #[serde(skip)]
    pub attrs: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerAttrs {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub created: String,
    #[serde(skip)]
    pub attrs: Value,
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub context: std::path::PathBuf,
    pub dockerfile: String,
    pub tag: Option<String>,
    pub build_args: BTreeMap<String, String>,
    pub platform: String,
    pub no_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutput {
    pub image_id: String,
    pub tags: Vec<String>,
    pub platform: String,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub images_deleted: Vec<Value>,
    pub space_reclaimed: i64,
}

// ---- Outcome ----

/// The single terminal result of one orchestrated run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed {
        container_id: String,
        name: String,
        exit_code: i64,
        logs: Vec<String>,
    },
    Failed {
        container_id: String,
        name: String,
        exit_code: i64,
        logs: Vec<String>,
        engine_error: Option<String>,
    },
    TimedOut {
        container_id: String,
        name: String,
        elapsed: Duration,
        partial_logs: Vec<String>,
    },
    PreconditionFailed {
        reason: String,
    },
    EngineError {
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Completed { container_id, .. }
            | ExecutionOutcome::Failed { container_id, .. }
            | ExecutionOutcome::TimedOut { container_id, .. } => Some(container_id),
            _ => None,
        }
    }

    /// Process exit code the calling shell should see.
    pub fn exit_status(&self) -> i32 {
        match self {
            ExecutionOutcome::Completed { .. } => 0,
            ExecutionOutcome::Failed { .. } => 1,
            ExecutionOutcome::PreconditionFailed { .. } => 2,
            ExecutionOutcome::TimedOut { .. } => 124,
            ExecutionOutcome::EngineError { .. } => 125,
        }
    }
}
