//! Task executor
//!
//! Polls the central API for tasks addressed to this host, executes each
//! against the runtime, reports a structured result and then syncs the
//! affected container so the central view converges right away.
//!
//! A result that could not be reported is kept and re-sent on the next
//! poll; the task is not executed a second time.

mod translate;

pub use translate::{create_request, restart_rule, DEFAULT_HOST_IP, DEFAULT_PROTOCOL};

use crate::error::{SyncError, TaskError};
use crate::health::{components, HealthRegistry};
use crate::models::{Task, TaskResult, TaskType};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::reconcile::ReconciliationEngine;
use crate::runtime::{ContainerRuntime, RemoveOptions};
use crate::sync::SyncTransport;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Poll period for pending tasks (default: 5 seconds)
    pub poll_interval: Duration,
    /// Stop/restart timeout when a task carries none (default: 10 seconds)
    pub stop_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

pub struct TaskExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    transport: Arc<dyn SyncTransport>,
    engine: Arc<ReconciliationEngine>,
    config: TaskConfig,
    /// Results executed but not yet accepted by the central API
    unreported: DashMap<String, TaskResult>,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl TaskExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        transport: Arc<dyn SyncTransport>,
        engine: Arc<ReconciliationEngine>,
        config: TaskConfig,
        health: HealthRegistry,
    ) -> Self {
        let logger = StructuredLogger::new(engine.host_id());
        Self {
            runtime,
            transport,
            engine,
            config,
            unreported: DashMap::new(),
            health,
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    pub fn unreported_count(&self) -> usize {
        self.unreported.len()
    }

    /// Poll until `cancel` fires; the first poll happens immediately
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "Starting task executor"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.poll_once().await;
                    if let Err(e) = &result {
                        warn!(error = %e, "Task poll failed, will retry next interval");
                    }
                    self.health.record(components::TASK_EXECUTOR, &result).await;
                }
                _ = cancel.cancelled() => {
                    info!("Shutting down task executor");
                    break;
                }
            }
        }
    }

    /// One poll cycle. Returns the number of tasks executed.
    pub async fn poll_once(&self) -> Result<usize, SyncError> {
        // The server may still list a task whose result was only just
        // delivered, so those ids are skipped for this cycle too
        let resent = self.flush_unreported().await;

        let tasks = self
            .transport
            .pending_tasks(self.engine.host_id())
            .await?;

        let mut executed = 0;
        for task in tasks {
            if task.result.is_some()
                || resent.contains(&task.id)
                || self.unreported.contains_key(&task.id)
            {
                debug!(task_id = %task.id, "Task already executed, skipping");
                continue;
            }
            self.process(&task).await;
            executed += 1;
        }
        Ok(executed)
    }

    async fn process(&self, task: &Task) {
        debug!(task_id = %task.id, task_type = task.task_type.as_str(), "Executing task");

        let result = self.execute(task).await;
        self.metrics.record_task(result.success);
        self.logger.log_task_completed(
            &task.id,
            task.task_type.as_str(),
            result.success,
            result.container_id.as_deref(),
            &result.message,
        );

        if let Err(e) = self.transport.report_task_result(&task.id, &result).await {
            warn!(task_id = %task.id, error = %e, "Failed to report task result, will retry");
            self.unreported.insert(task.id.clone(), result.clone());
        }

        self.converge(task, &result).await;
    }

    /// Re-send kept results; returns every task id that was attempted
    async fn flush_unreported(&self) -> HashSet<String> {
        let pending: Vec<(String, TaskResult)> = self
            .unreported
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut attempted = HashSet::with_capacity(pending.len());
        for (task_id, result) in pending {
            match self.transport.report_task_result(&task_id, &result).await {
                Ok(()) => {
                    self.unreported.remove(&task_id);
                    info!(task_id = %task_id, "Reported previously unreported task result");
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Task result still unreported");
                }
            }
            attempted.insert(task_id);
        }
        attempted
    }

    /// Bring the central record of the affected container up to date
    async fn converge(&self, task: &Task, result: &TaskResult) {
        let Some(id) = result
            .container_id
            .as_deref()
            .or(task.container_id.as_deref())
        else {
            return;
        };

        if task.task_type == TaskType::Delete && result.success {
            if let Err(e) = self.engine.handle_gone(id).await {
                warn!(task_id = %task.id, container_id = %id, error = %e, "Post-delete cleanup failed");
            }
            return;
        }

        if let Err(e) = self.engine.sync_one(id).await {
            warn!(task_id = %task.id, container_id = %id, error = %e, "Post-task sync failed");
        }
    }

    /// Run one task to a terminal result; errors become failure results
    pub async fn execute(&self, task: &Task) -> TaskResult {
        match self.dispatch(task).await {
            Ok(result) => result,
            Err(e) => TaskResult::failure(task.container_id.clone(), e.to_string()),
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let kind = task.task_type.as_str();
        match task.task_type {
            TaskType::Deploy => self.deploy(task).await,
            TaskType::Delete => {
                let id = container_id(task, kind)?;
                self.delete(id, task.force, self.timeout(task)).await
            }
            TaskType::Start => {
                let id = container_id(task, kind)?;
                match self.runtime.start(id).await {
                    Ok(()) => Ok(TaskResult::success(Some(id.to_string()), "container started")),
                    Err(e) if e.is_not_modified() => Ok(TaskResult::success(
                        Some(id.to_string()),
                        "container already running",
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            TaskType::Stop => {
                let id = container_id(task, kind)?;
                match self.runtime.stop(id, self.timeout(task)).await {
                    Ok(()) => Ok(TaskResult::success(Some(id.to_string()), "container stopped")),
                    Err(e) if e.is_not_modified() => Ok(TaskResult::success(
                        Some(id.to_string()),
                        "container already stopped",
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            TaskType::Restart => {
                let id = container_id(task, kind)?;
                self.runtime.restart(id, self.timeout(task)).await?;
                Ok(TaskResult::success(Some(id.to_string()), "container restarted"))
            }
        }
    }

    /// Pull per policy, create, start. A container that was created but
    /// failed to start is force-removed before the start error is returned.
    async fn deploy(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let spec = task.spec.as_ref().ok_or(TaskError::MissingSpec("deploy"))?;
        let request = create_request(spec);

        let pulled = self.runtime.pull_image(&spec.image, spec.pull_policy).await?;
        let id = self.runtime.create(&request).await?;

        if let Err(start_error) = self.runtime.start(&id).await {
            warn!(
                task_id = %task.id,
                container_id = %id,
                error = %start_error,
                "Start failed after create, removing container"
            );
            let cleanup = RemoveOptions {
                force: true,
                remove_volumes: false,
            };
            if let Err(e) = self.runtime.remove(&id, cleanup).await {
                warn!(container_id = %id, error = %e, "Failed to remove half-created container");
            }
            return Err(start_error.into());
        }

        Ok(TaskResult::success(Some(id.clone()), "container deployed").with_data(json!({
            "image": spec.image,
            "name": request.name,
            "pulled": pulled,
        })))
    }

    /// Stop (unless forced) then remove. Already stopped and already gone
    /// are both success.
    async fn delete(
        &self,
        id: &str,
        force: bool,
        timeout: Duration,
    ) -> Result<TaskResult, TaskError> {
        if !force {
            match self.runtime.stop(id, timeout).await {
                Ok(()) => {}
                Err(e) if e.is_not_modified() || e.is_not_found() => {
                    debug!(container_id = %id, error = %e, "Stop before delete was a no-op");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let options = RemoveOptions {
            force,
            remove_volumes: false,
        };
        match self.runtime.remove(id, options).await {
            Ok(()) => Ok(TaskResult::success(Some(id.to_string()), "container deleted")),
            Err(e) if e.is_not_found() => Ok(TaskResult::success(
                Some(id.to_string()),
                "container already absent",
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn timeout(&self, task: &Task) -> Duration {
        task.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.stop_timeout)
    }
}

fn container_id<'a>(task: &'a Task, kind: &'static str) -> Result<&'a str, TaskError> {
    task.container_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(TaskError::MissingContainerId(kind))
}

#[cfg(test)]
mod tests;
