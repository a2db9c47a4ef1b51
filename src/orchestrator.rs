//! Runs one container to completion.
//!
//! A run moves through `PreconditionCheck -> Create -> Wait -> Reap` and
//! always ends in `Done`, from which cleanup happens before the outcome is
//! handed back. Any stage can jump straight to `Done`.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config;
use crate::constraints;
use crate::engine::EngineClient;
use crate::error::{Error, Result};
use crate::models::{
    ContainerHandle, ContainerSpec, ContainerState, ExecutionOutcome, Phase, RunRequest,
};

/// Time source for the wait loop. Tests substitute a clock that only moves
/// when slept on.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
enum Stage {
    PreconditionCheck,
    Create,
    Wait(ContainerHandle),
    Reap(ContainerHandle, ContainerState),
    Done(ExecutionOutcome, Option<ContainerHandle>),
}

/// What the wait loop does after observing the container once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStep {
    Reap,
    TimedOut,
    Sleep(Duration),
}

/// Never sleeps past the deadline, so a timeout fires within one poll.
pub fn next_wait_step(
    phase: Phase,
    elapsed: Duration,
    timeout: Option<Duration>,
    poll_interval: Duration,
) -> WaitStep {
    if phase.is_terminal() {
        return WaitStep::Reap;
    }
    match timeout {
        Some(limit) if elapsed >= limit => WaitStep::TimedOut,
        Some(limit) => WaitStep::Sleep(poll_interval.min(limit - elapsed)),
        None => WaitStep::Sleep(poll_interval),
    }
}

/// A missing exit code counts as -1.
pub fn classify(
    handle: &ContainerHandle,
    state: &ContainerState,
    logs: Vec<String>,
) -> ExecutionOutcome {
    match state.exit_code.unwrap_or(-1) {
        0 => ExecutionOutcome::Completed {
            container_id: handle.id.clone(),
            name: handle.name.clone(),
            exit_code: 0,
            logs,
        },
        exit_code => ExecutionOutcome::Failed {
            container_id: handle.id.clone(),
            name: handle.name.clone(),
            exit_code,
            logs,
            engine_error: state.error.clone(),
        },
    }
}

/// The create call carries only what the request actually set.
pub fn container_spec(request: &RunRequest, limits: constraints::ResourceLimits) -> ContainerSpec {
    ContainerSpec {
        image: request.image.clone(),
        name: request.name.clone().filter(|n| !n.is_empty()),
        attach: !request.detach,
        ports: (!request.ports.is_empty()).then(|| request.ports.clone()),
        environment: (!request.environment.is_empty()).then(|| request.environment.clone()),
        volumes: (!request.volumes.is_empty()).then(|| request.volumes.clone()),
        command: request.command.clone().filter(|c| !c.is_empty()),
        entrypoint: request.entrypoint.clone().filter(|e| !e.is_empty()),
        working_dir: request.working_dir.clone().filter(|w| !w.is_empty()),
        network_mode: request.network.clone(),
        limits,
    }
}

pub struct Orchestrator<'a> {
    engine: &'a dyn EngineClient,
    clock: &'a dyn Clock,
    poll_interval: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(engine: &'a dyn EngineClient, clock: &'a dyn Clock) -> Self {
        Self {
            engine,
            clock,
            poll_interval: config::POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(&self, request: &RunRequest) -> ExecutionOutcome {
        info!("running {}", request.image);
        let mut stage = Stage::PreconditionCheck;
        loop {
            debug!("stage: {:?}", stage);
            stage = match stage {
                Stage::PreconditionCheck => self.check_preconditions(request).await,
                Stage::Create => self.create(request).await,
                Stage::Wait(handle) => self.wait(request, handle).await,
                Stage::Reap(handle, state) => self.reap(handle, state).await,
                Stage::Done(outcome, handle) => {
                    return self.finish(request, handle, outcome).await;
                }
            };
        }
    }

    async fn check_preconditions(&self, request: &RunRequest) -> Stage {
        match self.engine.image_exists(&request.image).await {
            Ok(true) => {}
            Ok(false) => {
                return precondition_failed(format!(
                    "Image '{}' does not exist. Pull or build it first.",
                    request.image
                ))
            }
            Err(err) => return engine_error(err),
        }

        if let Some(name) = request.name.as_deref().filter(|n| !n.is_empty()) {
            match self.engine.container_get(name).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    return precondition_failed(format!(
                        "Container '{}' already exists. Remove it first or use a different name.",
                        name
                    ))
                }
                Err(err) => return engine_error(err),
            }
        }
        Stage::Create
    }

    async fn create(&self, request: &RunRequest) -> Stage {
        let limits = match constraints::translate(
            request.memory.as_deref(),
            request.memory_swap.as_deref(),
            request.cpus,
            request.storage_opt.as_ref(),
        ) {
            Ok(limits) => limits,
            Err(err) => return precondition_failed(err.to_string()),
        };

        let spec = container_spec(request, limits);
        match self.engine.container_create_and_start(&spec).await {
            Ok(handle) => {
                info!("container {} started from {}", handle.id, request.image);
                Stage::Wait(handle)
            }
            Err(err) => engine_error(err),
        }
    }

    async fn wait(&self, request: &RunRequest, handle: ContainerHandle) -> Stage {
        let started = self.clock.now();
        let timeout = request.timeout();
        loop {
            let remaining =
                timeout.map(|limit| limit.saturating_sub(self.clock.now().saturating_sub(started)));
            let reloaded = bounded(remaining, self.engine.container_reload(&handle)).await;
            let elapsed = self.clock.now().saturating_sub(started);
            let state = match reloaded {
                Ok(state) => state,
                Err(Error::TimedOut(_)) => {
                    warn!("container {} did not answer before the deadline", handle.id);
                    let elapsed = elapsed.max(timeout.unwrap_or_default());
                    return self.give_up(handle, elapsed).await;
                }
                Err(err) => return Stage::Done(engine_outcome(err), Some(handle)),
            };
            match next_wait_step(state.phase, elapsed, timeout, self.poll_interval) {
                WaitStep::Reap => return Stage::Reap(handle, state),
                WaitStep::TimedOut => {
                    warn!(
                        "container {} still {} after {:?}, giving up",
                        handle.id, state.phase, elapsed
                    );
                    return self.give_up(handle, elapsed).await;
                }
                WaitStep::Sleep(pause) => self.clock.sleep(pause).await,
            }
        }
    }

    async fn give_up(&self, handle: ContainerHandle, elapsed: Duration) -> Stage {
        let logs = bounded(Some(config::LOG_GRACE), self.engine.container_logs(&handle)).await;
        let partial_logs = match logs {
            Ok(logs) => logs,
            Err(err) => {
                warn!("could not read logs of {}: {}", handle.id, err);
                Vec::new()
            }
        };
        let outcome = ExecutionOutcome::TimedOut {
            container_id: handle.id.clone(),
            name: handle.name.clone(),
            elapsed,
            partial_logs,
        };
        Stage::Done(outcome, Some(handle))
    }

    async fn reap(&self, handle: ContainerHandle, state: ContainerState) -> Stage {
        debug!(
            "container {} is {} with exit code {:?}",
            handle.id, state.phase, state.exit_code
        );
        match self.engine.container_logs(&handle).await {
            Ok(logs) => Stage::Done(classify(&handle, &state, logs), Some(handle)),
            Err(err) => Stage::Done(engine_outcome(err), Some(handle)),
        }
    }

    async fn finish(
        &self,
        request: &RunRequest,
        handle: Option<ContainerHandle>,
        outcome: ExecutionOutcome,
    ) -> ExecutionOutcome {
        match handle {
            Some(handle) if request.auto_remove => {
                match self.engine.container_remove(&handle.id, true).await {
                    Ok(()) => debug!("removed container {}", handle.id),
                    Err(err) => warn!("failed to remove container {}: {}", handle.id, err),
                }
            }
            Some(handle) => debug!("keeping container {}", handle.id),
            None => {}
        }
        outcome
    }
}

/// Runs `call`, failing with [`Error::TimedOut`] once `limit` has passed.
async fn bounded<T>(limit: Option<Duration>, call: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| Error::TimedOut(limit))?,
        None => call.await,
    }
}

fn precondition_failed(reason: String) -> Stage {
    Stage::Done(ExecutionOutcome::PreconditionFailed { reason }, None)
}

fn engine_outcome(err: Error) -> ExecutionOutcome {
    ExecutionOutcome::EngineError {
        message: err.to_string(),
    }
}

fn engine_error(err: Error) -> Stage {
    Stage::Done(engine_outcome(err), None)
}

/// Delivers `signal` to an existing container. Not part of a run; a kill
/// issued while a run is waiting shows up there as the container exiting.
pub async fn kill(engine: &dyn EngineClient, id: &str, signal: &str) -> Result<()> {
    if engine.container_get(id).await?.is_none() {
        return Err(Error::PreconditionFailed(format!(
            "Container '{}' does not exist.",
            id
        )));
    }
    engine.container_kill(id, signal).await?;
    info!("sent {} to {}", signal, id);
    Ok(())
}
