//! The container engine as seen by the rest of the crate.
//!
//! Everything goes through [`EngineClient`], so the orchestrator and the
//! commands never touch the wire. [`BollardEngine`] speaks the Docker
//! compatible API over the local socket, which Podman serves as well.

mod docker;
#[cfg(test)]
pub mod fake;

pub use self::docker::BollardEngine;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{
    BuildOutput, BuildRequest, ContainerAttrs, ContainerHandle, ContainerSpec, ContainerState,
    ImageAttrs, PruneReport,
};

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn ping(&self) -> Result<bool>;
    async fn version(&self) -> Result<String>;
    async fn engine_info(&self) -> Result<Value>;

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.image_get(reference).await?.is_some())
    }
    async fn image_get(&self, reference: &str) -> Result<Option<ImageAttrs>>;
    async fn image_list(&self, all: bool) -> Result<Vec<ImageAttrs>>;
    async fn image_build(&self, request: &BuildRequest) -> Result<BuildOutput>;
    async fn image_pull(&self, repository: &str, tag: &str) -> Result<()>;
    async fn image_remove(&self, reference: &str, force: bool) -> Result<()>;
    async fn image_prune(&self) -> Result<PruneReport>;

    async fn container_get(&self, id_or_name: &str) -> Result<Option<ContainerAttrs>>;
    async fn container_list(&self, all: bool) -> Result<Vec<ContainerAttrs>>;
    async fn container_create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;
    async fn container_reload(&self, handle: &ContainerHandle) -> Result<ContainerState>;
    async fn container_logs(&self, handle: &ContainerHandle) -> Result<Vec<String>>;
    async fn container_remove(&self, id: &str, force: bool) -> Result<()>;
    async fn container_kill(&self, id: &str, signal: &str) -> Result<()>;
}
