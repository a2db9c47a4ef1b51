use clap::Args;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::config;
use crate::engine::EngineClient;
use crate::error::{Error, Result};
use crate::format::{self, FormatTemplate};
use crate::models::{BuildRequest, MountMode, RunRequest, VolumeMount};
use crate::orchestrator::{self, Clock, Orchestrator};
use crate::report::{run_report, Report};

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image name or ID
    pub image: String,
    /// Container name
    #[arg(long)]
    pub name: Option<String>,
    /// Run container in background
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    pub detach: bool,
    /// Port mapping (format: HOST:CONTAINER)
    #[arg(short, long = "port")]
    pub ports: Vec<String>,
    /// Environment variables (format: KEY=VALUE)
    #[arg(short, long = "env")]
    pub env: Vec<String>,
    /// Volume mapping (format: HOST:CONTAINER[:ro|rw])
    #[arg(short, long = "volume")]
    pub volumes: Vec<String>,
    /// Command to run in container; a single argument runs through the shell
    #[arg(short = 'c', long = "run-command", num_args = 0..)]
    pub run_command: Vec<String>,
    /// Override the image entrypoint
    #[arg(long)]
    pub entrypoint: Option<String>,
    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,
    /// Do not remove the container once it has finished
    #[arg(long)]
    pub no_auto_remove: bool,
    /// Network mode
    #[arg(long, default_value = config::DEFAULT_NETWORK)]
    pub network: String,
    /// Memory limit
    #[arg(long, default_value = config::DEFAULT_MEMORY)]
    pub memory: String,
    /// Memory plus swap limit
    #[arg(long, default_value = config::DEFAULT_MEMORY_SWAP)]
    pub memory_swap: String,
    /// Number of CPUs
    #[arg(long, default_value_t = config::DEFAULT_CPUS)]
    pub cpus: f64,
    /// Storage driver options (format: KEY=VALUE)
    #[arg(long = "storage-opt")]
    pub storage_opt: Vec<String>,
    /// Seconds to wait for the container to exit (0 waits forever)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,
}

impl RunArgs {
    pub fn into_request(self) -> Result<RunRequest> {
        let mut ports = BTreeMap::new();
        for spec in &self.ports {
            let (container, host) = parse_port(spec)?;
            ports.insert(container, host);
        }
        let mut volumes = BTreeMap::new();
        for spec in &self.volumes {
            let (host, mount) = parse_volume(spec)?;
            volumes.insert(host, mount);
        }
        let storage_opt = parse_pairs(&self.storage_opt)?;

        Ok(RunRequest {
            image: self.image,
            name: self.name,
            detach: self.detach,
            ports,
            environment: parse_pairs(&self.env)?,
            volumes,
            command: shell_command(self.run_command),
            entrypoint: self.entrypoint.map(|e| vec![e]),
            working_dir: self.workdir,
            auto_remove: !self.no_auto_remove,
            network: self.network,
            memory: Some(self.memory),
            memory_swap: Some(self.memory_swap),
            cpus: Some(self.cpus),
            storage_opt: (!storage_opt.is_empty()).then_some(storage_opt),
            timeout: Duration::from_secs(self.timeout),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Build context path
    pub context: PathBuf,
    /// Image tag (e.g., myapp:latest)
    #[arg(short, long)]
    pub tag: Option<String>,
    /// Dockerfile name
    #[arg(short, long = "file", default_value = config::DEFAULT_DOCKERFILE)]
    pub file: String,
    /// Build arguments (format: KEY=VALUE)
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,
    /// Target platform (e.g., linux/amd64, linux/arm64)
    #[arg(long)]
    pub platform: Option<String>,
    /// Do not use cache when building
    #[arg(long)]
    pub no_cache: bool,
    /// Force rebuild even if image exists
    #[arg(long)]
    pub force: bool,
}

// ============================================================================
// PARSING HELPERS
// ============================================================================

fn invalid(message: String) -> Error {
    Error::InvalidArgument(message)
}

/// `HOST:CONTAINER` -> (container port, host port)
pub fn parse_port(spec: &str) -> Result<(u16, u16)> {
    let (host, container) = spec
        .split_once(':')
        .ok_or_else(|| invalid(format!("port mapping '{}' must be HOST:CONTAINER", spec)))?;
    let port = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| invalid(format!("'{}' in '{}' is not a port number", s, spec)))
    };
    Ok((port(container)?, port(host)?))
}

pub fn parse_key_value(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(invalid(format!("'{}' must be KEY=VALUE", spec))),
    }
}

fn parse_pairs(specs: &[String]) -> Result<BTreeMap<String, String>> {
    specs.iter().map(|s| parse_key_value(s)).collect()
}

/// `HOST:CONTAINER[:MODE]`, mode defaulting to read-write.
pub fn parse_volume(spec: &str) -> Result<(String, VolumeMount)> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (host, bind, mode) = match parts.as_slice() {
        [host, bind] => (*host, *bind, MountMode::Rw),
        [host, bind, mode] => (*host, *bind, mode.parse()?),
        _ => {
            return Err(invalid(format!(
                "volume '{}' must be HOST:CONTAINER[:ro|rw]",
                spec
            )))
        }
    };
    if host.is_empty() || bind.is_empty() {
        return Err(invalid(format!("volume '{}' has an empty path", spec)));
    }
    Ok((
        host.to_string(),
        VolumeMount {
            bind: bind.to_string(),
            mode,
        },
    ))
}

/// A lone argument is a shell snippet; several are an argv.
pub fn shell_command(mut args: Vec<String>) -> Option<Vec<String>> {
    match args.len() {
        0 => None,
        1 => args.pop().map(|snippet| {
            vec![config::DEFAULT_SHELL.to_string(), "-c".to_string(), snippet]
        }),
        _ => Some(args),
    }
}

/// Splits `repo[:tag]`, leaving registry ports alone.
pub fn split_image_ref(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

/// `os/arch` of the engine host, in the form build platforms use.
pub fn detect_platform(info: &Value) -> String {
    let pick = |paths: [&str; 2]| {
        paths
            .iter()
            .find_map(|p| format::resolve(info, p).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    };
    let os = pick(["host.os", "OSType"]).unwrap_or("linux");
    let arch = match pick(["host.arch", "Architecture"]) {
        Some("x86_64") | None => "amd64",
        Some("aarch64") => "arm64",
        Some(other) => other,
    };
    format!("{}/{}", os, arch)
}

fn render_or_data(data: Value, template: Option<&str>) -> Report {
    match template {
        Some(template) => Report::success(FormatTemplate::parse(template).render(&data)),
        None => Report::success(data),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// `None` when the engine answers; otherwise the report to print.
pub async fn connect(engine: &dyn EngineClient) -> Option<Report> {
    match engine.ping().await {
        Ok(true) => None,
        Ok(false) => Some(Report::error(
            "Failed to connect to engine socket: unexpected ping reply",
        )),
        Err(err) => Some(Report::failed("Failed to connect to engine socket", &err)),
    }
}

pub async fn images(engine: &dyn EngineClient, all: bool) -> Report {
    match engine.image_list(all).await {
        Ok(images) => Report::success(images),
        Err(err) => Report::failed("Failed to list images", &err),
    }
}

pub async fn ps(engine: &dyn EngineClient, all: bool) -> Report {
    match engine.container_list(all).await {
        Ok(containers) => Report::success(containers),
        Err(err) => Report::failed("Failed to list containers", &err),
    }
}

pub async fn pull(engine: &dyn EngineClient, image: &str) -> Report {
    let (repository, tag) = split_image_ref(image);
    match engine.image_pull(repository, tag).await {
        Ok(()) => Report::success(json!({
            "image": image,
            "message": "Image pulled successfully",
        })),
        Err(err) => Report::failed("Failed to pull image", &err),
    }
}

pub async fn build(engine: &dyn EngineClient, args: BuildArgs) -> Report {
    if !args.context.is_dir() {
        return Report::error(format!(
            "Build context '{}' is not a directory",
            args.context.display()
        ));
    }
    let build_args = match parse_pairs(&args.build_arg) {
        Ok(pairs) => pairs,
        Err(err) => return Report::error(err.to_string()),
    };

    if let Some(tag) = args.tag.as_deref() {
        let exists = match engine.image_exists(tag).await {
            Ok(exists) => exists,
            Err(err) => return Report::failed("Failed to build image", &err),
        };
        if exists && !args.force {
            return Report::error(format!(
                "Image '{}' already exists. Use --force to rebuild or choose a different tag.",
                tag
            ));
        }
        if exists {
            info!("removing existing image {} before rebuild", tag);
            if let Err(err) = engine.image_remove(tag, true).await {
                return Report::failed("Failed to delete image", &err);
            }
        }
    }

    let platform = match args.platform {
        Some(platform) => platform,
        None => match engine.engine_info().await {
            Ok(info) => detect_platform(&info),
            Err(err) => {
                debug!("platform detection failed: {}", err);
                config::DEFAULT_PLATFORM.to_string()
            }
        },
    };

    let request = BuildRequest {
        context: args.context,
        dockerfile: args.file,
        tag: args.tag,
        build_args,
        platform,
        no_cache: args.no_cache,
    };
    match engine.image_build(&request).await {
        Ok(output) => Report::success(output),
        Err(err) => Report::failed("Failed to build image", &err),
    }
}

pub async fn run(engine: &dyn EngineClient, clock: &dyn Clock, args: RunArgs) -> Report {
    let request = match args.into_request() {
        Ok(request) => request,
        Err(err) => return Report::error(err.to_string()).with_exit_code(2),
    };
    let outcome = Orchestrator::new(engine, clock).run(&request).await;
    run_report(&request, &outcome)
}

pub async fn kill(engine: &dyn EngineClient, id: &str, signal: &str) -> Report {
    match orchestrator::kill(engine, id, signal).await {
        Ok(()) => Report::success(json!({
            "container_id": id,
            "message": format!("Container killed with signal {}", signal),
        })),
        Err(Error::PreconditionFailed(reason)) => Report::error(reason),
        Err(err) => Report::failed("Failed to kill container", &err),
    }
}

pub async fn rm(engine: &dyn EngineClient, id: &str, force: bool) -> Report {
    match engine.container_get(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Report::error(format!("Container '{}' does not exist.", id)),
        Err(err) => return Report::failed("Failed to delete container", &err),
    }
    match engine.container_remove(id, force).await {
        Ok(()) => Report::success(json!({
            "container_id": id,
            "message": "Container deleted successfully",
        })),
        Err(err) => Report::failed("Failed to delete container", &err),
    }
}

pub async fn rmi(engine: &dyn EngineClient, image: &str, force: bool) -> Report {
    match engine.image_exists(image).await {
        Ok(true) => {}
        Ok(false) => return Report::error(format!("Image '{}' does not exist.", image)),
        Err(err) => return Report::failed("Failed to delete image", &err),
    }
    match engine.image_remove(image, force).await {
        Ok(()) => Report::success(json!({
            "image": image,
            "message": "Image deleted successfully",
        })),
        Err(err) => Report::failed("Failed to delete image", &err),
    }
}

pub async fn prune(engine: &dyn EngineClient) -> Report {
    match engine.image_prune().await {
        Ok(pruned) => Report::success(json!({
            "images_deleted": pruned.images_deleted,
            "space_reclaimed": pruned.space_reclaimed,
            "message": "Images pruned successfully",
        })),
        Err(err) => Report::failed("Failed to prune images", &err),
    }
}

pub async fn info(engine: &dyn EngineClient, template: Option<&str>) -> Report {
    match engine.engine_info().await {
        Ok(info) => render_or_data(info, template),
        Err(err) => Report::failed("Failed to get engine info", &err),
    }
}

pub async fn version(engine: &dyn EngineClient, template: Option<&str>) -> Report {
    match engine.version().await {
        Ok(version) => render_or_data(json!({ "Version": version }), template),
        Err(err) => Report::failed("Failed to get engine version", &err),
    }
}

pub async fn inspect(engine: &dyn EngineClient, id: &str, template: Option<&str>) -> Report {
    match engine.container_get(id).await {
        Ok(Some(container)) => render_or_data(container.attrs, template),
        Ok(None) => Report::error(format!("Container '{}' does not exist.", id)),
        Err(err) => Report::failed("Failed to inspect container", &err),
    }
}
