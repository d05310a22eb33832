//! Service controller and lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initialized --start--> Running
//!                                                  ^        |
//!                                                  +-start- Stopped <-stop-+
//! ```
//!
//! `initialize` runs once; later calls return the cached outcome. `start` and
//! `stop` are serialized by one async lock. Each run gets a fresh
//! cancellation token and fresh send/processing queues, so workers from a
//! previous run can never see traffic from the next one.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use cat_protocol::{CommandSet, Connector, OutboundCommand, StateTable, Transport};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};

use crate::config::{ConfigProvider, ConfigValidator, RigConfig};
use crate::error::ServiceError;
use crate::listener::run_listener;
use crate::mailbox::{StatusMailbox, StatusReceiver};
use crate::processor::run_processor;
use crate::sender::run_sender;
use crate::serial::SerialConnector;

/// Lifecycle state of a [`CatService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Uninitialized,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Builder for [`CatService`]
///
/// The config provider and the logger are required; leaving either out is
/// reported as [`ServiceError::MissingDependency`] by
/// [`CatService::initialize`]. Without an explicit connector the service
/// opens real serial ports.
#[derive(Default)]
pub struct CatServiceBuilder {
    config_provider: Option<Arc<dyn ConfigProvider>>,
    logger: Option<Dispatch>,
    connector: Option<Arc<dyn Connector>>,
    validator: Option<ConfigValidator>,
}

impl CatServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration source
    pub fn config_provider(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.config_provider = Some(Arc::new(provider));
        self
    }

    /// Configuration source shared with the caller
    pub fn shared_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    /// Subscriber that receives every log event the service and its workers emit
    pub fn logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    /// Log through whatever subscriber is the default on the calling thread
    pub fn with_current_logger(mut self) -> Self {
        self.logger = Some(tracing::dispatcher::get_default(Dispatch::clone));
        self
    }

    /// Override how the transport is opened
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Override the configuration checks run during initialization
    pub fn validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> CatService {
        CatService {
            config_provider: self.config_provider,
            logger: self.logger,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(SerialConnector::new())),
            validator: self.validator.unwrap_or_default(),
            prepared: OnceLock::new(),
            state: AtomicU8::new(ServiceState::Uninitialized as u8),
            lifecycle: Mutex::new(None),
            send_tx: RwLock::new(None),
        }
    }
}

/// Everything derived from configuration during initialization
struct Prepared {
    config: RigConfig,
    table: Arc<StateTable>,
    commands: CommandSet,
    mailbox: StatusMailbox,
    logger: Dispatch,
}

/// One Start..Stop cycle
struct Run {
    cancel: CancellationToken,
    transport: Arc<dyn Transport>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

/// CAT pipeline for one transceiver
///
/// All methods take `&self`; share the service between tasks with an `Arc`.
pub struct CatService {
    config_provider: Option<Arc<dyn ConfigProvider>>,
    logger: Option<Dispatch>,
    connector: Arc<dyn Connector>,
    validator: ConfigValidator,
    prepared: OnceLock<Result<Arc<Prepared>, ServiceError>>,
    state: AtomicU8,
    lifecycle: Mutex<Option<Run>>,
    send_tx: RwLock<Option<mpsc::Sender<OutboundCommand>>>,
}

impl std::fmt::Debug for CatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatService")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CatService {
    pub fn builder() -> CatServiceBuilder {
        CatServiceBuilder::new()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether initialization has succeeded
    pub fn is_initialized(&self) -> bool {
        self.state() != ServiceState::Uninitialized
    }

    /// Whether workers are running
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn prepared(&self) -> Result<&Arc<Prepared>, ServiceError> {
        match self.prepared.get() {
            Some(Ok(prepared)) => Ok(prepared),
            _ => Err(ServiceError::NotInitialized),
        }
    }

    /// Load, validate and compile the rig configuration
    ///
    /// Only the first call does any work. Every call, including concurrent
    /// ones, returns the outcome of that first attempt.
    pub fn initialize(&self) -> Result<(), ServiceError> {
        let outcome = self.prepared.get_or_init(|| self.prepare());
        match outcome {
            Ok(_) => {
                let _ = self.state.compare_exchange(
                    ServiceState::Uninitialized as u8,
                    ServiceState::Initialized as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                Ok(())
            }
            Err(e) => Err(e.clone()),
        }
    }

    fn prepare(&self) -> Result<Arc<Prepared>, ServiceError> {
        let provider = self
            .config_provider
            .as_ref()
            .ok_or(ServiceError::MissingDependency("config provider"))?;
        let logger = self
            .logger
            .clone()
            .ok_or(ServiceError::MissingDependency("logger"))?;

        tracing::dispatcher::with_default(&logger, || {
            let result = self.load(provider.as_ref(), logger.clone());
            match &result {
                Ok(prepared) => info!(
                    "Initialized CAT service for rig {} ({}) on {}: {} states, {} commands",
                    prepared.config.id,
                    prepared.config.name,
                    prepared.config.serial.port,
                    prepared.table.len(),
                    prepared.commands.len()
                ),
                Err(e) => error!("CAT service initialization failed: {}", e),
            }
            result
        })
    }

    fn load(
        &self,
        provider: &dyn ConfigProvider,
        logger: Dispatch,
    ) -> Result<Arc<Prepared>, ServiceError> {
        let required = provider.required_configs()?;
        if required.default_rig_id < 1 {
            return Err(ServiceError::InvalidRigId(
                required.default_rig_id.to_string(),
            ));
        }

        let config = provider.rig_config_by_id(required.default_rig_id)?;
        self.validator.validate(&config)?;
        let config = config.with_defaults();

        let table = StateTable::build(&config.states)?;
        let commands = CommandSet::build(&config.commands)?;
        let mailbox = StatusMailbox::new(config.status_capacity());

        Ok(Arc::new(Prepared {
            config,
            table: Arc::new(table),
            commands,
            mailbox,
            logger,
        }))
    }

    /// Open the transport and launch the listener, processor and sender
    ///
    /// Starting a running service is a no-op. If the transport cannot be
    /// opened the service stays in its previous state.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let prepared = Arc::clone(self.prepared()?);
        let logger = prepared.logger.clone();
        self.start_run(prepared).with_subscriber(logger).await
    }

    async fn start_run(&self, prepared: Arc<Prepared>) -> Result<(), ServiceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("CAT service already running");
            return Ok(());
        }

        let config = &prepared.config;
        let transport = self
            .connector
            .open(&config.serial)
            .await
            .map_err(|e| {
                error!("Failed to open transport on {}: {}", config.serial.port, e);
                ServiceError::TransportOpenFailed(e)
            })?;

        let stale = prepared.mailbox.clear();
        if stale > 0 {
            debug!("Discarded {} status snapshots from the previous run", stale);
        }

        let cancel = CancellationToken::new();
        let (lines_tx, lines_rx) = mpsc::channel(config.cat.processing_queue_size);
        let (send_tx, send_rx) = mpsc::channel(config.cat.send_queue_size);

        let workers = vec![
            spawn_worker(
                "listener",
                &prepared.logger,
                run_listener(
                    Arc::clone(&transport),
                    Arc::clone(&prepared.table),
                    lines_tx,
                    config.poll_interval(),
                    config.read_timeout(),
                    cancel.clone(),
                ),
            ),
            spawn_worker(
                "processor",
                &prepared.logger,
                run_processor(lines_rx, prepared.mailbox.clone(), cancel.clone()),
            ),
            spawn_worker(
                "sender",
                &prepared.logger,
                run_sender(Arc::clone(&transport), send_rx, cancel.clone()),
            ),
        ];

        *self.send_tx.write().unwrap_or_else(PoisonError::into_inner) = Some(send_tx);
        *lifecycle = Some(Run {
            cancel,
            transport,
            workers,
        });
        self.set_state(ServiceState::Running);

        info!(
            "CAT service started on {} (poll {:?}, read timeout {:?})",
            config.serial.port,
            config.poll_interval(),
            config.read_timeout()
        );
        Ok(())
    }

    /// Cancel the workers, wait for them to exit and close the transport
    ///
    /// Stopping a service that is not running is a no-op. A failed close is
    /// reported, but the service still ends up stopped.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let logger = self.prepared()?.logger.clone();
        self.stop_run().with_subscriber(logger).await
    }

    async fn stop_run(&self) -> Result<(), ServiceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(run) = lifecycle.take() else {
            debug!("CAT service not running");
            return Ok(());
        };

        self.send_tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        run.cancel.cancel();

        for (name, handle) in run.workers {
            if let Err(e) = handle.await {
                error!("{} worker did not exit cleanly: {}", name, e);
            }
        }

        let closed = run.transport.close().await;
        self.set_state(ServiceState::Stopped);

        match closed {
            Ok(()) => {
                info!("CAT service stopped");
                Ok(())
            }
            Err(e) => {
                warn!("CAT service stopped, but closing the transport failed: {}", e);
                Err(ServiceError::TransportCloseFailed(e))
            }
        }
    }

    /// Format a named command and queue it for the sender without waiting
    pub fn enqueue_command(&self, name: &str, params: &[&str]) -> Result<(), ServiceError> {
        let prepared = self.prepared()?;
        if !self.is_running() {
            return Err(ServiceError::NotStarted);
        }

        let command = prepared.commands.format(name, params)?;

        let send_tx = self.send_tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = send_tx.as_ref() else {
            return Err(ServiceError::QueueClosed);
        };
        tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => ServiceError::QueueFull,
            TrySendError::Closed(_) => ServiceError::QueueClosed,
        })
    }

    /// Receive-only handle to the status mailbox
    ///
    /// The handle stays valid across stop/start cycles.
    pub fn status_channel(&self) -> Result<StatusReceiver, ServiceError> {
        Ok(self.prepared()?.mailbox.receiver())
    }

    /// The active rig configuration, or an empty one before initialization
    pub fn rig_config(&self) -> RigConfig {
        self.prepared()
            .map(|prepared| prepared.config.clone())
            .unwrap_or_default()
    }
}

impl Drop for CatService {
    fn drop(&mut self) {
        if let Some(run) = self.lifecycle.get_mut() {
            run.cancel.cancel();
        }
    }
}

/// Spawn a worker whose events go to `logger` inside a `cat_worker` span
fn spawn_worker<F>(name: &'static str, logger: &Dispatch, worker: F) -> (&'static str, JoinHandle<()>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = async move {
        // Created here so the span belongs to `logger`, not the spawner's default.
        let span = info_span!("cat_worker", worker = name);
        async move {
            debug!("{} worker started", name);
            worker.await;
            debug!("{} worker stopped", name);
        }
        .instrument(span)
        .await
    };
    (name, tokio::spawn(task.with_subscriber(logger.clone())))
}
