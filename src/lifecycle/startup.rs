//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every service from validated configuration, in dependency order
//! - Settle tasks a previous process left unfinished
//! - Start background tasks (task workers, retention sweeper)
//! - Serve HTTP until shutdown, then wait for background tasks to stop
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - One executor, one limiter and one task manager per process, shared behind `Arc`
//! - Listeners start last (traffic only when ready)

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{GatewayConfig, RateLimitBackend, RateLimitConfig};
use crate::downstream::client::TransportBuildError;
use crate::downstream::{GatewayError, HttpTransport, OperationTable, Transport};
use crate::http::{AppState, GatewayServer};
use crate::lifecycle::Shutdown;
use crate::resilience::ResilientExecutor;
use crate::security::{AdmissionState, CounterStore, CounterStoreError, MemoryCounterStore, RateLimiter};
use crate::tasks::{
    task_queue, JsonFileTaskStore, MemoryTaskStore, RetentionSweeper, StoreError, TaskContext, TaskManager,
    TaskReceiver, TaskStore, WorkerPool,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Transport(#[from] TransportBuildError),
    #[error(transparent)]
    TaskStore(#[from] StoreError),
    #[error(transparent)]
    CounterStore(#[from] CounterStoreError),
    #[error("task recovery failed: {0}")]
    Recovery(#[from] GatewayError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    state: AppState,
    admission: Arc<AdmissionState>,
    task_context: TaskContext,
    receiver: TaskReceiver,
}

impl Gateway {
    /// Build the gateway against the configured downstream API.
    pub async fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        let transport = Arc::new(HttpTransport::new(&config.downstream)?);
        Self::with_transport(config, transport).await
    }

    /// Build the gateway over an explicit transport.
    pub async fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, StartupError> {
        let operations = Arc::new(OperationTable::with_overrides(&config.downstream.endpoints));
        let executor = Arc::new(ResilientExecutor::from_config(transport, &config));

        let counter_store = counter_store(&config.rate_limit).await?;
        let admission = Arc::new(AdmissionState {
            limiter: RateLimiter::new(counter_store),
            config: config.rate_limit.clone(),
        });

        let task_store: Arc<dyn TaskStore> = match &config.tasks.store_path {
            Some(path) => Arc::new(JsonFileTaskStore::open(path).await?),
            None => Arc::new(MemoryTaskStore::new()),
        };
        let task_context = TaskContext {
            store: task_store,
            executor: executor.clone(),
            operations: operations.clone(),
        };
        let (queue, receiver) = task_queue(config.tasks.queue_capacity);
        let tasks = Arc::new(TaskManager::new(task_context.clone(), queue, config.tasks.async_enabled));

        let state = AppState {
            executor,
            operations,
            tasks,
            request_timeout: Duration::from_secs(config.listener.request_timeout_secs),
        };

        tracing::info!(
            operations = state.operations.names().len(),
            async_tasks = config.tasks.async_enabled,
            rate_limit = config.rate_limit.enabled,
            "Gateway services initialised"
        );

        Ok(Self {
            config,
            state,
            admission,
            task_context,
            receiver,
        })
    }

    /// Router without background tasks, for in-process callers.
    pub fn router(&self) -> Router {
        GatewayServer::new(&self.config, self.state.clone(), self.admission.clone()).router()
    }

    /// Recover unfinished tasks, start workers and the sweeper, then serve until `shutdown`
    /// fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), StartupError> {
        self.state.tasks.recover().await?;

        let mut background = Vec::new();

        if self.config.tasks.async_enabled {
            background.extend(WorkerPool::spawn(
                self.config.tasks.workers,
                self.task_context.clone(),
                self.receiver.clone(),
                &shutdown,
            ));
            tracing::info!(workers = self.config.tasks.workers, "Task workers started");
        }

        let sweeper = RetentionSweeper::new(self.task_context.store.clone(), &self.config.tasks);
        background.push(tokio::spawn(sweeper.run(shutdown.subscribe())));

        let server = GatewayServer::new(&self.config, self.state, self.admission);
        let served = server.run(listener, shutdown.subscribe()).await;

        shutdown.trigger();
        for handle in background {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }

        served?;
        Ok(())
    }
}

async fn counter_store(config: &RateLimitConfig) -> Result<Arc<dyn CounterStore>, StartupError> {
    match config.backend {
        RateLimitBackend::Memory => Ok(Arc::new(MemoryCounterStore::new())),
        #[cfg(feature = "redis")]
        RateLimitBackend::Redis => Ok(Arc::new(
            crate::security::RedisCounterStore::connect(&config.redis_url).await?,
        )),
        #[cfg(not(feature = "redis"))]
        RateLimitBackend::Redis => Err(StartupError::Unsupported(
            "rate_limit.backend = \"redis\" requires the `redis` feature".to_string(),
        )),
    }
}
