//! The bot service: owns the transport, HTTP listener, plugin chain, and the
//! dispatch loop that feeds updates through the chain.

use std::{
    any::Any,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    futures::FutureExt,
    tobym_channels::{Outbound, UPDATE_QUEUE_CAPACITY, UpdateStream, UpdateTransport, update_channel},
    tobym_plugins::{Plugin, PluginContext, PluginRegistry, default_plugins},
    tobym_store::Store,
    tobym_telegram::{LongPolling, TelegramOutbound, Webhook, build_bot},
    tokio::{
        sync::{Semaphore, oneshot},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, warn},
};

use crate::{
    config::{BotConfig, TransportConfig},
    error::{ServiceError, ServiceResult},
    lifecycle::{Lifecycle, LifecycleState},
    stats::{DispatchStats, StatsSnapshot},
    web::{self, WebState},
};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Pre-built collaborators for [`BotService::from_parts`].
pub struct ServiceParts {
    pub store: Arc<Store>,
    pub outbound: Arc<dyn Outbound>,
    pub transport: Arc<dyn UpdateTransport>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

struct HttpServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl HttpServer {
    async fn start(listen: SocketAddr, app: axum::Router) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!(%addr, "http server listening");
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }
}

/// Everything started by `init`, torn down by `close` or on init failure.
#[derive(Default)]
struct Runtime {
    transport_started: bool,
    http: Option<HttpServer>,
    initialized_plugins: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
    dispatcher: Option<JoinHandle<()>>,
}

pub struct BotService {
    config: BotConfig,
    lifecycle: Arc<Lifecycle>,
    store: Arc<Store>,
    outbound: Arc<dyn Outbound>,
    transport: Arc<dyn UpdateTransport>,
    registry: Arc<PluginRegistry>,
    stats: Arc<DispatchStats>,
    runtime: Mutex<Option<Runtime>>,
}

impl BotService {
    /// Open the store under `config.data_dir`, build the Telegram client and
    /// transport, and register the bundled plugins.
    pub async fn new(config: BotConfig) -> ServiceResult<Self> {
        config.validate()?;
        let store = Arc::new(Store::open(&config.data_dir).await?);
        let parts = match telegram_parts(&config, Arc::clone(&store)) {
            Ok(parts) => parts,
            Err(e) => {
                store.close().await;
                return Err(e);
            },
        };
        Self::from_parts(config, parts)
    }

    pub fn from_parts(config: BotConfig, parts: ServiceParts) -> ServiceResult<Self> {
        config.validate()?;
        let mut registry = PluginRegistry::new();
        for plugin in parts.plugins {
            registry.register(plugin);
        }
        Ok(Self {
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            store: parts.store,
            outbound: parts.outbound,
            transport: parts.transport,
            registry: Arc::new(registry),
            stats: Arc::new(DispatchStats::new()),
            runtime: Mutex::new(None),
        })
    }

    /// Append a plugin to the chain. Only allowed before `init`.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> ServiceResult<()> {
        let state = self.lifecycle.get();
        if state != LifecycleState::Constructed {
            return Err(lifecycle_error("register a plugin", state));
        }
        let registry = Arc::get_mut(&mut self.registry)
            .ok_or_else(|| lifecycle_error("register a plugin", state))?;
        registry.register(plugin);
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Address the HTTP listener is bound to while running.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|rt| rt.http.as_ref().map(|http| http.addr))
    }

    /// Start receiving and dispatching updates.
    ///
    /// On failure everything already started is torn down and the service
    /// ends up `Closed`.
    pub async fn init(&self) -> ServiceResult<()> {
        if !self
            .lifecycle
            .transition(LifecycleState::Constructed, LifecycleState::Initialized)
        {
            return Err(lifecycle_error("init", self.lifecycle.get()));
        }

        let mut runtime = Runtime::default();
        if let Err(e) = self.start(&mut runtime).await {
            error!(error = %e, "bot service failed to start");
            for cleanup in self.teardown(runtime).await {
                warn!(error = %cleanup, "cleanup after failed start");
            }
            self.lifecycle.finish();
            return Err(e);
        }

        *self.runtime.lock().unwrap_or_else(|e| e.into_inner()) = Some(runtime);
        self.lifecycle
            .transition(LifecycleState::Initialized, LifecycleState::Running);
        info!(
            transport = self.transport.name(),
            plugins = self.registry.len(),
            max_in_flight = self.config.max_in_flight,
            "bot service running"
        );
        Ok(())
    }

    async fn start(&self, rt: &mut Runtime) -> ServiceResult<()> {
        let username = self.outbound.bot_username().await?;
        info!(username = ?username, "bot credentials verified");

        let (sink, stream) = update_channel(UPDATE_QUEUE_CAPACITY);
        self.transport.start(sink).await?;
        rt.transport_started = true;
        info!(transport = self.transport.name(), "update transport started");

        match self.config.listen {
            Some(listen) => {
                let app = web::router(
                    WebState {
                        transport: Arc::clone(&self.transport),
                        lifecycle: Arc::clone(&self.lifecycle),
                        version: Arc::from(self.config.version.as_str()),
                    },
                    self.registry.web_routes(),
                );
                rt.http = Some(HttpServer::start(listen, app).await?);
            },
            None if self.transport.push_secret().is_some() => {
                return Err(ServiceError::config(
                    "push transport configured without a listen address",
                ));
            },
            None => debug!("no listen address, http server disabled"),
        }

        rt.initialized_plugins = match self.registry.init_all().await {
            Ok(count) => count,
            Err(e) => {
                let tobym_plugins::Error::Init { initialized, .. } = &e;
                rt.initialized_plugins = *initialized;
                return Err(e.into());
            },
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let dispatch = DispatchLoop {
            stream,
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            gate: Arc::new(Semaphore::new(self.config.max_in_flight)),
            tracker: rt.tracker.clone(),
            cancel: rt.cancel.clone(),
            log_updates: self.config.debug,
        };
        rt.dispatcher = Some(tokio::spawn(dispatch.run(ready_tx)));

        match tokio::time::timeout(self.config.startup_timeout(), ready_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ServiceError::message(
                "dispatch loop exited before it was ready",
            )),
            Err(_) => Err(ServiceError::Timeout {
                what: "dispatch loop to start",
            }),
        }
    }

    /// Stop everything in reverse dependency order.
    ///
    /// Every step runs even if an earlier one fails; all errors are returned
    /// together as [`ServiceError::Shutdown`].
    pub async fn close(&self) -> ServiceResult<()> {
        if !self
            .lifecycle
            .transition(LifecycleState::Running, LifecycleState::Closing)
        {
            return Err(lifecycle_error("close", self.lifecycle.get()));
        }
        info!("bot service closing");

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        let errors = self.teardown(runtime).await;
        self.lifecycle.finish();

        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            dispatched = stats.dispatched,
            claimed = stats.claimed,
            dropped = stats.dropped,
            plugin_errors = stats.plugin_errors,
            faults = stats.faults,
            "bot service closed"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Shutdown(errors))
        }
    }

    async fn teardown(&self, rt: Runtime) -> Vec<ServiceError> {
        let mut errors = Vec::new();

        if rt.transport_started
            && let Err(e) = self.transport.stop().await
        {
            warn!(transport = self.transport.name(), error = %e, "transport stop failed");
            errors.push(e.into());
        }

        if let Some(http) = rt.http {
            let _ = http.shutdown.send(());
            match tokio::time::timeout(self.config.shutdown_timeout(), http.handle).await {
                Ok(Ok(Ok(()))) => debug!("http server stopped"),
                Ok(Ok(Err(e))) => errors.push(e.into()),
                Ok(Err(e)) => errors.push(ServiceError::message(format!(
                    "http server task failed: {e}"
                ))),
                Err(_) => errors.push(ServiceError::Timeout {
                    what: "http server to stop",
                }),
            }
        }

        rt.cancel.cancel();
        rt.tracker.close();
        let dispatcher = rt.dispatcher;
        let tracker = rt.tracker.clone();
        let drained = tokio::time::timeout(self.config.shutdown_timeout(), async move {
            if let Some(handle) = dispatcher
                && let Err(e) = handle.await
            {
                error!(error = %e, "dispatch loop task failed");
            }
            tracker.wait().await;
        })
        .await;
        if drained.is_err() {
            warn!(in_flight = rt.tracker.len(), "in-flight updates did not finish in time");
            errors.push(ServiceError::Timeout {
                what: "in-flight updates",
            });
        }

        for (plugin, source) in self.registry.close_all(rt.initialized_plugins).await {
            errors.push(ServiceError::PluginClose { plugin, source });
        }

        self.store.close().await;
        errors
    }
}

fn telegram_parts(config: &BotConfig, store: Arc<Store>) -> ServiceResult<ServiceParts> {
    let api_url = config
        .api_url
        .as_deref()
        .map(url::Url::parse)
        .transpose()
        .map_err(|e| ServiceError::config(format!("invalid api_url: {e}")))?;
    let bot = build_bot(&config.token, api_url, config.poll_timeout())?;
    let outbound: Arc<dyn Outbound> = Arc::new(TelegramOutbound::new(bot.clone()));
    let transport: Arc<dyn UpdateTransport> = match &config.transport {
        TransportConfig::LongPoll { .. } => Arc::new(LongPolling::new(bot, config.poll_timeout())),
        TransportConfig::Webhook { public_url, secret } => {
            Arc::new(Webhook::new(bot, public_url, secret.clone())?)
        },
    };
    let plugins = default_plugins(&PluginContext {
        outbound: Arc::clone(&outbound),
        store: Arc::clone(&store),
        version: config.version.clone(),
        app_url: config.app_url.clone(),
    });
    Ok(ServiceParts {
        store,
        outbound,
        transport,
        plugins,
    })
}

fn lifecycle_error(operation: &'static str, state: LifecycleState) -> ServiceError {
    ServiceError::Lifecycle {
        operation,
        state: state.as_str(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// The single puller of the update queue.
struct DispatchLoop {
    stream: UpdateStream,
    registry: Arc<PluginRegistry>,
    stats: Arc<DispatchStats>,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    log_updates: bool,
}

impl DispatchLoop {
    async fn run(mut self, ready: oneshot::Sender<()>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ready.send(());
        debug!("dispatch loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {},
                next = self.stream.next() => {
                    let Some(update) = next else {
                        info!("update stream ended");
                        break;
                    };
                    self.stats.record_received();
                    if self.log_updates {
                        debug!(update_id = update.id, update = ?update, "update received");
                    }

                    let permit = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.stats.record_dropped();
                            warn!(update_id = update.id, "shutting down, update dropped");
                            break;
                        },
                        permit = Arc::clone(&self.gate).acquire_owned() => permit,
                    };
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            self.stats.record_dropped();
                            warn!(update_id = update.id, error = %e, "admission failed, update dropped");
                            continue;
                        },
                    };

                    let registry = Arc::clone(&self.registry);
                    let stats = Arc::clone(&self.stats);
                    let cancel = self.cancel.clone();
                    self.tracker.spawn(async move {
                        let _permit = permit;
                        let cycle = AssertUnwindSafe(registry.dispatch(&cancel, &update));
                        match cycle.catch_unwind().await {
                            Ok(report) => {
                                stats.record_dispatched(report.claimed_by.is_some(), report.errors);
                            },
                            Err(panic) => {
                                stats.record_fault();
                                error!(
                                    update_id = update.id,
                                    panic = panic_message(panic.as_ref()),
                                    "update handling panicked"
                                );
                            },
                        }
                    });
                },
            }
        }

        self.stream.close();
        debug!("dispatch loop stopped");
    }
}
