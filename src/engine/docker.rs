use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    BuildImageOptions, CreateImageOptions, ListImagesOptions, PruneImagesOptions,
    RemoveImageOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig, ImageInspect, PortBinding};
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use super::EngineClient;
use crate::config;
use crate::error::{Error, Result};
use crate::models::{
    BuildOutput, BuildRequest, ContainerAttrs, ContainerHandle, ContainerSpec, ContainerState,
    ImageAttrs, Phase, PruneReport, VolumeMount,
};

/// Engine client backed by bollard, talking to a Docker-compatible API on a
/// unix socket.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn connect(socket_path: &str) -> Result<Self> {
        debug!("connecting to engine socket {}", socket_path);
        let docker = Docker::connect_with_unix(
            socket_path,
            config::CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?;
        Ok(Self { docker })
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInspectResponse>> {
        found(
            self.docker
                .inspect_container(id_or_name, None::<InspectContainerOptions>)
                .await,
        )
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Lookup misses become `None`; every other failure stays an error.
fn found<T>(result: std::result::Result<T, DockerError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_not_found(&err) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn image_attrs(image: ImageInspect) -> ImageAttrs {
    let attrs = serde_json::to_value(&image).unwrap_or(Value::Null);
    ImageAttrs {
        id: image.id.unwrap_or_default(),
        tags: image.repo_tags.unwrap_or_default(),
        size: image.size.unwrap_or_default(),
        created: image.created.unwrap_or_default(),
        digest: image
            .repo_digests
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default(),
        attrs,
    }
}

fn container_attrs(container: ContainerInspectResponse) -> ContainerAttrs {
    let attrs = serde_json::to_value(&container).unwrap_or(Value::Null);
    let status = container
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| s.to_string())
        .unwrap_or_default();
    ContainerAttrs {
        id: container.id.unwrap_or_default(),
        name: container
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        status,
        image: container
            .config
            .and_then(|c| c.image)
            .or(container.image)
            .unwrap_or_default(),
        created: container.created.unwrap_or_default(),
        attrs,
    }
}

fn port_key(container_port: u16) -> String {
    format!("{}/tcp", container_port)
}

fn exposed_ports(ports: &BTreeMap<u16, u16>) -> HashMap<String, HashMap<(), ()>> {
    ports
        .keys()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect()
}

fn port_bindings(ports: &BTreeMap<u16, u16>) -> HashMap<String, Option<Vec<PortBinding>>> {
    ports
        .iter()
        .map(|(container, host)| {
            let binding = PortBinding {
                host_ip: None,
                host_port: Some(host.to_string()),
            };
            (port_key(*container), Some(vec![binding]))
        })
        .collect()
}

fn binds(volumes: &BTreeMap<String, VolumeMount>) -> Vec<String> {
    volumes
        .iter()
        .map(|(host, mount)| format!("{}:{}:{}", host, mount.bind, mount.mode))
        .collect()
}

fn archive_context(dir: &Path) -> Result<Vec<u8>> {
    let archive_err = |e: std::io::Error| {
        Error::InvalidArgument(format!(
            "cannot archive build context {}: {}",
            dir.display(),
            e
        ))
    };
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir).map_err(archive_err)?;
    builder.into_inner().map_err(archive_err)
}

/// Create request for `spec`. Fields the spec leaves unset stay unset.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let limits = &spec.limits;
    let host_config = HostConfig {
        memory: limits.memory,
        memory_swap: limits.memory_swap,
        memory_swappiness: limits.memory_swappiness,
        nano_cpus: limits.nano_cpus,
        storage_opt: limits
            .storage_opt
            .as_ref()
            .map(|opts| opts.clone().into_iter().collect()),
        network_mode: Some(spec.network_mode.clone()),
        port_bindings: spec.ports.as_ref().map(port_bindings),
        binds: spec.volumes.as_ref().map(binds),
        ..Default::default()
    };
    Config {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        working_dir: spec.working_dir.clone(),
        env: spec.environment.as_ref().map(|env| {
            env.iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect()
        }),
        exposed_ports: spec.ports.as_ref().map(exposed_ports),
        attach_stdout: Some(spec.attach),
        attach_stderr: Some(spec.attach),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl EngineClient for BollardEngine {
    async fn ping(&self) -> Result<bool> {
        let reply = self.docker.ping().await?;
        Ok(reply.trim().eq_ignore_ascii_case("ok"))
    }

    async fn version(&self) -> Result<String> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_default())
    }

    async fn engine_info(&self) -> Result<Value> {
        let info = self.docker.info().await?;
        serde_json::to_value(info).map_err(|e| Error::engine(e.to_string()))
    }

    async fn image_get(&self, reference: &str) -> Result<Option<ImageAttrs>> {
        Ok(found(self.docker.inspect_image(reference).await)?.map(image_attrs))
    }

    async fn image_list(&self, all: bool) -> Result<Vec<ImageAttrs>> {
        let options = ListImagesOptions::<String> {
            all,
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        Ok(images
            .into_iter()
            .map(|image| ImageAttrs {
                attrs: serde_json::to_value(&image).unwrap_or(Value::Null),
                digest: image.repo_digests.first().cloned().unwrap_or_default(),
                created: timestamp(image.created),
                id: image.id,
                tags: image.repo_tags,
                size: image.size,
            })
            .collect())
    }

    async fn image_build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        let body = archive_context(&request.context)?;
        let options = BuildImageOptions::<String> {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone().unwrap_or_default(),
            buildargs: request.build_args.clone().into_iter().collect(),
            platform: request.platform.clone(),
            nocache: request.no_cache,
            rm: true,
            ..Default::default()
        };
        info!(
            "building {} from {} ({} byte context)",
            request.tag.as_deref().unwrap_or("<untagged>"),
            request.context.display(),
            body.len()
        );

        let mut logs = Vec::new();
        let mut built_id = None;
        let mut stream = Box::pin(self.docker.build_image(options, None, Some(body.into())));
        while let Some(item) = stream.next().await {
            let step = item?;
            if let Some(err) = step.error {
                return Err(Error::engine(format!("Build failed: {}", err)));
            }
            if let Some(line) = step.stream {
                let line = line.trim();
                if !line.is_empty() {
                    debug!("build: {}", line);
                    logs.push(line.to_string());
                }
            }
            if let Some(id) = step.aux.and_then(|aux| aux.id) {
                built_id = Some(id);
            }
        }

        let reference = request
            .tag
            .clone()
            .or_else(|| built_id.clone())
            .ok_or_else(|| Error::engine("build finished without producing an image"))?;
        let image = self
            .image_get(&reference)
            .await?
            .ok_or_else(|| Error::engine(format!("built image '{}' is not present", reference)))?;

        Ok(BuildOutput {
            image_id: image.id,
            tags: image.tags,
            platform: request.platform.clone(),
            logs,
        })
    }

    async fn image_pull(&self, repository: &str, tag: &str) -> Result<()> {
        let options = CreateImageOptions::<String> {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(item) = stream.next().await {
            let progress = item?;
            if let Some(err) = progress.error {
                return Err(Error::engine(err));
            }
            if let Some(status) = progress.status {
                debug!("pull {}:{}: {}", repository, tag, status);
            }
        }
        Ok(())
    }

    async fn image_remove(&self, reference: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_image(reference, Some(options), None)
            .await?;
        Ok(())
    }

    async fn image_prune(&self) -> Result<PruneReport> {
        let pruned = self
            .docker
            .prune_images(None::<PruneImagesOptions<String>>)
            .await?;
        Ok(PruneReport {
            images_deleted: pruned
                .images_deleted
                .unwrap_or_default()
                .iter()
                .filter_map(|item| serde_json::to_value(item).ok())
                .collect(),
            space_reclaimed: pruned.space_reclaimed.unwrap_or_default(),
        })
    }

    async fn container_get(&self, id_or_name: &str) -> Result<Option<ContainerAttrs>> {
        Ok(self.inspect(id_or_name).await?.map(container_attrs))
    }

    async fn container_list(&self, all: bool) -> Result<Vec<ContainerAttrs>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerAttrs {
                attrs: serde_json::to_value(&c).unwrap_or(Value::Null),
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                status: c.state.unwrap_or_default(),
                image: c.image.unwrap_or_else(|| "unknown".to_string()),
                created: c.created.map(timestamp).unwrap_or_default(),
            })
            .collect())
    }

    async fn container_create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let config = container_config(spec);
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let created = self.docker.create_container(options, config).await?;
        for warning in &created.warnings {
            warn!("engine warning for {}: {}", created.id, warning);
        }

        if let Err(err) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Discard the container that never started.
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(cleanup) = self.docker.remove_container(&created.id, Some(options)).await {
                warn!("failed to discard unstarted container {}: {}", created.id, cleanup);
            }
            return Err(err.into());
        }

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => self
                .container_get(&created.id)
                .await?
                .map(|c| c.name)
                .unwrap_or_default(),
        };
        info!("started container {} ({})", created.id, name);
        Ok(ContainerHandle {
            id: created.id,
            name,
        })
    }

    async fn container_reload(&self, handle: &ContainerHandle) -> Result<ContainerState> {
        let info = self
            .inspect(&handle.id)
            .await?
            .ok_or_else(|| Error::engine(format!("container {} no longer exists", handle.id)))?;
        let state = info.state.unwrap_or_default();
        let phase = state
            .status
            .and_then(|s| Phase::from_status(&s.to_string()))
            .unwrap_or(Phase::Running);
        Ok(ContainerState {
            phase,
            exit_code: state.exit_code,
            error: state.error.filter(|e| !e.is_empty()),
        })
    }

    async fn container_logs(&self, handle: &ContainerHandle) -> Result<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let chunks: Vec<LogOutput> = self
            .docker
            .logs(&handle.id, Some(options))
            .try_collect()
            .await?;
        let text: String = chunks.iter().map(|chunk| chunk.to_string()).collect();
        Ok(text.lines().map(str::to_string).collect())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        let options = KillContainerOptions {
            signal: signal.to_string(),
        };
        self.docker.kill_container(id, Some(options)).await?;
        Ok(())
    }
}
