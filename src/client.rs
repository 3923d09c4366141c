use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    runtime::{Builder, Runtime},
    sync::oneshot,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::ClientOptions,
    error::StreamError,
    registry::ConnectionRegistry,
    scheduler::Scheduler,
    sse::{SseConfig, SseHandler, SseStream},
    ws::{WsConfig, WsHandler, WsStream},
};

static GLOBAL: Mutex<Option<StreamClient>> = parking_lot::const_mutex(None);

/// Owns the worker pool, timer, HTTP client and registry shared by streams
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    runtime: Mutex<Option<Runtime>>,
    scheduler: Scheduler,
    registry: ConnectionRegistry,
    http: reqwest::Client,
    options: ClientOptions,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("options", &self.inner.options)
            .field("registry", &self.inner.registry)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl StreamClient {
    #[instrument(skip_all, fields(workers = options.worker_threads))]
    pub fn new(options: ClientOptions) -> Result<Self, StreamError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .thread_name(options.thread_name.clone())
            .enable_all()
            .build()
            .map_err(StreamError::Runtime)?;
        let http = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .connect_timeout(options.connect_timeout)
            .tcp_nodelay(options.tcp_nodelay)
            .build()?;
        debug!("started stream client worker pool");
        Ok(Self {
            inner: Arc::new(ClientInner {
                scheduler: Scheduler::new(runtime.handle().clone()),
                runtime: Mutex::new(Some(runtime)),
                registry: ConnectionRegistry::new(),
                http,
                options,
            }),
        })
    }

    /// The process-wide client, created with default options on first use
    /// or after [`StreamClient::shutdown_global`]
    pub fn global() -> Result<Self, StreamError> {
        let mut global = GLOBAL.lock();
        match global.as_ref() {
            Some(client) if !client.is_shut_down() => Ok(client.clone()),
            _ => {
                let client = Self::new(ClientOptions::default())?;
                *global = Some(client.clone());
                Ok(client)
            }
        }
    }

    pub fn shutdown_global() {
        let client = GLOBAL.lock().take();
        if let Some(client) = client {
            client.shutdown();
        }
    }

    pub fn sse<H: SseHandler>(&self, config: SseConfig, handler: H) -> SseStream {
        SseStream::new(self, config, handler)
    }

    pub fn ws<H: WsHandler>(&self, config: WsConfig, handler: H) -> WsStream {
        WsStream::new(self, config, handler)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.scheduler.is_shut_down()
    }

    /// Stops scheduling, closes every registered stream and stops the worker
    /// pool in the background once `shutdown_grace` has passed.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        if self.inner.scheduler.is_shut_down() {
            return;
        }
        info!("shutting down stream client");
        self.inner.scheduler.shut_down();
        let closed = self.inner.registry.close_all();
        debug!(closed, "closed registered streams");

        let Some(runtime) = self.inner.runtime.lock().take() else {
            return;
        };
        let builder =
            std::thread::Builder::new().name(format!("{}-shutdown", self.inner.options.thread_name));
        stop_runtime(runtime, self.inner.options.shutdown_grace, builder);
    }
}

/// Stops `runtime` on its own thread, waiting up to `grace` for tasks.
/// Never drops the runtime on the calling thread, which may be async.
fn stop_runtime(runtime: Runtime, grace: Duration, builder: std::thread::Builder) {
    let (tx, rx) = oneshot::channel::<Runtime>();
    let spawned = builder.spawn(move || {
        if let Ok(runtime) = rx.blocking_recv() {
            runtime.shutdown_timeout(grace);
        }
    });
    match spawned {
        Ok(_) => {
            if let Err(runtime) = tx.send(runtime) {
                runtime.shutdown_background();
            }
        }
        Err(e) => {
            warn!(error = %e, "could not spawn shutdown thread, stopping worker pool in the background");
            runtime.shutdown_background();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.scheduler.shut_down();
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
