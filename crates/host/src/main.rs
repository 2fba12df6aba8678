use anyhow::Context;

use courier_host::{build_app, demo, AppState, DevStack};
use courier_infra::jobs::JobHooks;
use courier_infra::workers::LocalHostHandle;
use courier_infra::{LocalHostConfig, ManagedQueueConfig, SchedulerConfig};
use courier_queue::QueueDriver;

const BIND_ADDR_ENV: &str = "COURIER_BIND_ADDR";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_observability::init();

    let queue_config = ManagedQueueConfig::from_env().context("invalid queue configuration")?;
    let scheduler_config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    let host_config = LocalHostConfig::from_env().context("invalid local host configuration")?;

    let stack = DevStack::new(
        queue_config.clone(),
        scheduler_config,
        host_config.clone(),
        demo::module_graph,
        JobHooks::new().with(demo::LoggingObserver),
    );
    stack
        .entry
        .warm_up()
        .await
        .context("failed to build the job application")?;

    let (state, host) = match redis_wiring(&stack, queue_config, host_config)? {
        Some(wired) => wired,
        None => (stack.app_state(), stack.spawn_local_host()),
    };

    let bind_addr =
        std::env::var(BIND_ADDR_ENV).unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, build_app(state.clone()))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("shutting down");
    host.shutdown().await;
    state.driver().dispose().await;
    Ok(())
}

/// Submit to and consume from Redis Streams when `COURIER_REDIS_URL` is set.
///
/// Delays beyond the native cap are refused: the in-memory scheduler only
/// delivers to the local queue.
#[cfg(feature = "redis")]
fn redis_wiring(
    stack: &DevStack,
    queue_config: ManagedQueueConfig,
    host_config: LocalHostConfig,
) -> anyhow::Result<Option<(AppState, LocalHostHandle)>> {
    use std::sync::Arc;

    use courier_host::DEFAULT_QUEUE_NAME;
    use courier_infra::queue::{ManagedQueueDriver, RedisStreamsQueueClient};
    use courier_infra::workers::RedisHost;

    let Ok(redis_url) = std::env::var("COURIER_REDIS_URL") else {
        return Ok(None);
    };
    let client = Arc::new(
        RedisStreamsQueueClient::new(&redis_url).context("invalid COURIER_REDIS_URL")?,
    );

    // Bare queue names map to streams of the same name.
    let mut queue_config = queue_config;
    let default_name = queue_config
        .default_queue
        .clone()
        .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
    if !default_name.contains("://") && !queue_config.queue_urls.contains_key(&default_name) {
        queue_config = queue_config.with_queue(default_name.clone(), default_name.clone());
    }
    let queue_config = queue_config.with_default_queue(default_name);
    let (_, queue_url) = queue_config
        .resolve_queue(None)
        .context("invalid queue configuration")?;
    tracing::info!(queue_url = %queue_url, "using redis streams");

    let driver = ManagedQueueDriver::with_client(queue_config, client.clone());
    let host = RedisHost::new(host_config, stack.entry.clone(), client, queue_url).spawn();
    Ok(Some((
        AppState::new(stack.entry.clone(), Arc::new(driver)),
        host,
    )))
}

#[cfg(not(feature = "redis"))]
fn redis_wiring(
    _stack: &DevStack,
    _queue_config: ManagedQueueConfig,
    _host_config: LocalHostConfig,
) -> anyhow::Result<Option<(AppState, LocalHostHandle)>> {
    Ok(None)
}
