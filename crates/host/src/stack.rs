//! In-process wiring shared by the binary and the black-box tests.

use std::sync::Arc;

use courier_infra::jobs::{JobHooks, ModuleGraph};
use courier_infra::queue::{ManagedQueueDriver, SchedulerDriver};
use courier_infra::workers::{LocalHost, LocalHostHandle, WorkerEntryPoint};
use courier_infra::{LocalHostConfig, ManagedQueueConfig, SchedulerConfig};
use courier_queue::{InMemoryQueueClient, InMemorySchedulerClient};

use crate::app::AppState;

/// Queue name used when the configuration names no default queue.
pub const DEFAULT_QUEUE_NAME: &str = "jobs";

/// Entry point, driver and in-memory clients, wired together.
#[derive(Debug)]
pub struct DevStack {
    pub queue: Arc<InMemoryQueueClient>,
    pub scheduler: Arc<InMemorySchedulerClient>,
    pub queue_url: String,
    pub driver: Arc<ManagedQueueDriver>,
    pub entry: Arc<WorkerEntryPoint>,
    host_config: LocalHostConfig,
}

impl DevStack {
    /// Every named queue is backed by a local in-memory queue; only the
    /// default queue is polled.
    pub fn new(
        queue_config: ManagedQueueConfig,
        scheduler_config: SchedulerConfig,
        host_config: LocalHostConfig,
        graph: impl Fn() -> ModuleGraph + Send + Sync + 'static,
        hooks: JobHooks,
    ) -> Self {
        let queue = Arc::new(
            InMemoryQueueClient::new().with_max_receive_count(host_config.max_receive_count),
        );

        let mut queue_config = queue_config;
        let names: Vec<String> = queue_config.queue_urls.keys().cloned().collect();
        for name in names {
            let url = queue.create_queue(&name);
            queue_config.queue_urls.insert(name, url);
        }

        let default_name = queue_config
            .default_queue
            .clone()
            .filter(|q| !q.contains("://"))
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        let queue_url = queue.create_queue(&default_name);
        let queue_config = queue_config
            .with_queue(default_name.clone(), queue_url.clone())
            .with_default_queue(default_name);

        let scheduler = Arc::new(InMemorySchedulerClient::new());
        let scheduler_driver = SchedulerDriver::with_client(scheduler_config, scheduler.clone());
        let driver = Arc::new(
            ManagedQueueDriver::with_client(queue_config, queue.clone())
                .with_scheduler(scheduler_driver),
        );

        let entry = Arc::new(WorkerEntryPoint::new(graph).with_hooks(hooks));

        Self {
            queue,
            scheduler,
            queue_url,
            driver,
            entry,
            host_config,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.entry.clone(), self.driver.clone())
    }

    /// Start polling the default queue.
    pub fn spawn_local_host(&self) -> LocalHostHandle {
        LocalHost::new(
            self.host_config.clone(),
            self.entry.clone(),
            self.queue.clone(),
            &self.queue_url,
        )
        .with_scheduler(self.scheduler.clone())
        .spawn()
    }
}
