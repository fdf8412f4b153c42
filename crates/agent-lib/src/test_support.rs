//! In-memory runtime and transport doubles shared by the engine, task and
//! supervisor tests

use crate::error::{RuntimeError, SyncError};
use crate::models::{
    ContainerRecord, HostMetrics, HostRecord, IgnoreListEntry, Task, TaskResult,
};
use crate::runtime::{
    ContainerDetail, ContainerRef, ContainerRuntime, CreateRequest, EventStream, LifecycleEvent,
    RemoveOptions, StateFlags, SystemInfo,
};
use crate::sync::{SyncOutcome, SyncTransport};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn detail(id: &str, state: StateFlags) -> ContainerDetail {
    ContainerDetail {
        id: id.to_string(),
        name: format!("{}-name", id),
        image: "nginx:1.25".to_string(),
        state,
        ports: vec![],
        env: BTreeMap::new(),
        created_at: None,
    }
}

pub fn running() -> StateFlags {
    StateFlags {
        running: true,
        ..StateFlags::default()
    }
}

pub fn event(action: &str, id: &str) -> LifecycleEvent {
    LifecycleEvent {
        action: action.to_string(),
        container_id: id.to_string(),
        name: None,
        time: None,
    }
}

/// Runtime double; every call is recorded as `"<op>:<target>"`
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<BTreeMap<String, ContainerDetail>>,
    local_images: Mutex<HashSet<String>>,
    subscriptions: Mutex<VecDeque<Vec<Result<LifecycleEvent, RuntimeError>>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    pub fail_ping: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, id: &str, state: StateFlags) -> Self {
        self.insert(detail(id, state));
        self
    }

    pub fn with_image(self, image: &str) -> Self {
        self.local_images.lock().unwrap().insert(image.to_string());
        self
    }

    /// Queue the items one subscription yields before it ends
    pub fn with_subscription(self, items: Vec<Result<LifecycleEvent, RuntimeError>>) -> Self {
        self.subscriptions.lock().unwrap().push_back(items);
        self
    }

    pub fn insert(&self, detail: ContainerDetail) {
        self.containers
            .lock()
            .unwrap()
            .insert(detail.id.clone(), detail);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.containers.lock().unwrap().contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<StateFlags> {
        self.containers.lock().unwrap().get(id).map(|d| d.state)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_state(&self, id: &str, state: StateFlags) -> Result<(), RuntimeError> {
        let mut containers = self.containers.lock().unwrap();
        let detail = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        detail.state = state;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.record("ping".to_string());
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("socket refused".to_string()));
        }
        Ok(())
    }

    async fn system_info(&self) -> Result<SystemInfo, RuntimeError> {
        Ok(SystemInfo {
            id: "engine-id".to_string(),
            name: "node-a".to_string(),
            cpu_cores: 4,
            memory_bytes: 8 * 1024 * 1024 * 1024,
        })
    }

    async fn list_containers(
        &self,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRef>, RuntimeError> {
        self.record(format!("list:{}", include_stopped));
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|d| include_stopped || d.state.running)
            .map(|d| ContainerRef {
                id: d.id.clone(),
                name: d.name.clone(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, RuntimeError> {
        self.record(format!("inspect:{}", id));
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    fn events(&self) -> EventStream<'_> {
        self.record("subscribe".to_string());
        match self.subscriptions.lock().unwrap().pop_front() {
            Some(items) => futures::stream::iter(items).boxed(),
            None => futures::stream::pending().boxed(),
        }
    }

    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("inspect_image:{}", image));
        if self.local_images.lock().unwrap().contains(image) {
            Ok(())
        } else {
            Err(RuntimeError::ImageNotFound(image.to_string()))
        }
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull:{}", image));
        self.local_images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let id = format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(format!("create:{}", id));
        let mut created = detail(&id, StateFlags::default());
        created.image = request.image.clone();
        if let Some(name) = &request.name {
            created.name = name.clone();
        }
        self.insert(created);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start:{}", id));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Operation {
                operation: "start_container",
                target: id.to_string(),
                message: "port is already allocated".to_string(),
            });
        }
        if self.state(id).map(|s| s.running).unwrap_or(false) {
            return Err(RuntimeError::NotModified(id.to_string()));
        }
        self.set_state(id, running())
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop:{}", id));
        match self.state(id) {
            None => Err(RuntimeError::NotFound(id.to_string())),
            Some(state) if !state.running => Err(RuntimeError::NotModified(id.to_string())),
            Some(_) => self.set_state(id, StateFlags::default()),
        }
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record(format!("restart:{}", id));
        self.set_state(id, running())
    }

    async fn remove(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        self.record(format!("remove:{}:force={}", id, options.force));
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("daemon busy".to_string()));
        }
        match self.containers.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }
}

/// Central API call as seen by the transport double
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CheckAuth,
    RegisterHost(String),
    /// A create or update actually written centrally
    Upsert(String),
    Delete(String),
    IsIgnored(String),
    RemoveIgnored(String),
    ListIgnored,
    PushMetrics(String),
    PendingTasks(String),
    Report(String, bool),
}

/// Transport double holding the central records, ignore list and task queue
#[derive(Default)]
pub struct MockTransport {
    records: Mutex<BTreeMap<String, ContainerRecord>>,
    ignored: Mutex<BTreeSet<String>>,
    tasks: Mutex<Vec<Task>>,
    calls: Mutex<Vec<Call>>,
    failing_syncs: Mutex<HashSet<String>>,
    pub fail_auth: AtomicBool,
    pub fail_register: AtomicBool,
    pub fail_report: AtomicBool,
    pub fail_push: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored(self, id: &str) -> Self {
        self.ignored.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn with_task(self, task: Task) -> Self {
        self.tasks.lock().unwrap().push(task);
        self
    }

    pub fn fail_sync_for(&self, id: &str) {
        self.failing_syncs.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_tasks(&self) {
        self.tasks.lock().unwrap().clear();
    }

    pub fn record(&self, id: &str) -> Option<ContainerRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn is_listed_ignored(&self, id: &str) -> bool {
        self.ignored.lock().unwrap().contains(id)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn upserts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Upsert(_)))
            .count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn server_error(path: &str) -> SyncError {
    SyncError::Status {
        method: "POST".to_string(),
        url: format!("http://central/{}", path),
        status: 503,
        body: String::new(),
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn check_auth(&self) -> Result<(), SyncError> {
        self.push(Call::CheckAuth);
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                method: "GET".to_string(),
                url: "http://central/auth/verify".to_string(),
                status: 401,
                body: "invalid token".to_string(),
            });
        }
        Ok(())
    }

    async fn register_host(&self, host: &HostRecord) -> Result<(), SyncError> {
        self.push(Call::RegisterHost(host.id.clone()));
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(server_error("hosts"));
        }
        Ok(())
    }

    async fn sync_container(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError> {
        if self.is_ignored(&record.id).await? {
            return Ok(SyncOutcome::Ignored);
        }
        if self.failing_syncs.lock().unwrap().contains(&record.id) {
            return Err(server_error("containers"));
        }

        self.push(Call::Upsert(record.id.clone()));
        let previous = self
            .records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(match previous {
            Some(_) => SyncOutcome::Updated,
            None => SyncOutcome::Created,
        })
    }

    async fn delete_container(&self, id: &str) -> Result<(), SyncError> {
        self.push(Call::Delete(id.to_string()));
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn is_ignored(&self, id: &str) -> Result<bool, SyncError> {
        self.push(Call::IsIgnored(id.to_string()));
        Ok(self.ignored.lock().unwrap().contains(id))
    }

    async fn remove_ignored(&self, id: &str) -> Result<(), SyncError> {
        self.push(Call::RemoveIgnored(id.to_string()));
        self.ignored.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list_ignored(&self) -> Result<Vec<IgnoreListEntry>, SyncError> {
        self.push(Call::ListIgnored);
        Ok(self
            .ignored
            .lock()
            .unwrap()
            .iter()
            .map(|id| IgnoreListEntry {
                container_id: id.clone(),
                reason: "deleted".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .collect())
    }

    async fn push_metrics(&self, host_id: &str, _metrics: &HostMetrics) -> Result<(), SyncError> {
        self.push(Call::PushMetrics(host_id.to_string()));
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(server_error("hosts/metrics"));
        }
        Ok(())
    }

    async fn pending_tasks(&self, host_id: &str) -> Result<Vec<Task>, SyncError> {
        self.push(Call::PendingTasks(host_id.to_string()));
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        result: &TaskResult,
    ) -> Result<(), SyncError> {
        self.push(Call::Report(task_id.to_string(), result.success));
        if self.fail_report.load(Ordering::SeqCst) {
            return Err(server_error("tasks/result"));
        }
        Ok(())
    }
}
