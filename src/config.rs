use std::time::Duration;

// Engine connection
pub const DEFAULT_SOCKET_PATH: &str = "/run/podman/podman.sock";
pub const SOCKET_ENV_VAR: &str = "PODCTL_SOCKET";
pub const LOG_ENV_VAR: &str = "PODCTL_LOG";
pub const CONNECT_TIMEOUT_SECS: u64 = 120;

// Run defaults
pub const DEFAULT_MEMORY: &str = "20m";
pub const DEFAULT_MEMORY_SWAP: &str = "20m";
pub const DEFAULT_CPUS: f64 = 0.5;
pub const DEFAULT_NETWORK: &str = "none";
pub const DEFAULT_SIGNAL: &str = "SIGKILL";
pub const DEFAULT_SHELL: &str = "/bin/sh";

// Build defaults
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// How often the orchestrator re-reads container state while waiting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on reading partial logs from a container that timed out.
pub const LOG_GRACE: Duration = Duration::from_secs(5);
