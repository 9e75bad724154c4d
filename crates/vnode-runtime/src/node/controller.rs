use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use vnode_core::{
    BoxFuture, Lease, LeaseStore, Node, NodeProvider, NodeStore, Result, SupervisorConfig,
    VnodeError,
};

use super::lease::{ensure_lease, update_node_lease};
use super::status::update_node_status;
use super::timer::HeartbeatTimer;

/// Callback consulted when a status publish fails.
///
/// Returning `Ok` marks the error as handled and the publish is retried
/// once; returning an error propagates it to the caller.
pub type ErrorHandler = Arc<dyn Fn(VnodeError) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Whether the control plane accepts node leases.
///
/// Resolved once during startup and frozen for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseMode {
    /// Not probed yet.
    Unknown,
    /// Liveness is signalled through the lease; status is published on the
    /// slower status interval.
    Supported,
    /// No lease store, or the control plane rejected leases. Status is
    /// published on every ping.
    Unsupported,
}

/// Runtime options for a [`NodeController`].
#[derive(Clone, Default)]
pub struct NodeControllerOptions {
    config: SupervisorConfig,
    lease_store: Option<Arc<dyn LeaseStore>>,
    base_lease: Option<Lease>,
    status_error_handler: Option<ErrorHandler>,
}

impl NodeControllerOptions {
    /// Create options with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the intervals and retry policy.
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable leases backed by the given store.
    pub fn with_lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    /// Template for the node lease. Requires a lease store.
    pub fn with_base_lease(mut self, lease: Lease) -> Self {
        self.base_lease = Some(lease);
        self
    }

    /// Handler consulted when a status publish fails.
    pub fn with_status_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.status_error_handler = Some(handler);
        self
    }
}

/// Events delivered to the control loop from outside it.
enum LoopEvent {
    /// The provider reported new status content.
    Status(Node),
    /// An external caller published; the active timer restarts.
    ExternalPublish,
}

/// Keeps one virtual node registered and alive in the control plane.
///
/// [`NodeController::run`] registers the node, probes lease support and then
/// drives pings, lease renewals and status publishes until cancelled.
pub struct NodeController {
    name: String,
    provider: Arc<dyn NodeProvider>,
    nodes: Arc<dyn NodeStore>,
    leases: Option<Arc<dyn LeaseStore>>,
    base_lease: Option<Lease>,
    error_handler: Option<ErrorHandler>,
    config: SupervisorConfig,
    /// Local node snapshot. Holding the lock is what serializes publishes.
    node: Mutex<Node>,
    lease_mode: OnceLock<LeaseMode>,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<LoopEvent>>>,
    ready_tx: watch::Sender<bool>,
    last_heartbeat: StdMutex<Option<DateTime<Utc>>>,
}

impl NodeController {
    /// Create a new node controller.
    ///
    /// Performs no I/O. Fails only on an invalid option combination.
    pub fn new(
        provider: Arc<dyn NodeProvider>,
        node: Node,
        nodes: Arc<dyn NodeStore>,
        options: NodeControllerOptions,
    ) -> Result<Self> {
        let NodeControllerOptions {
            config,
            lease_store,
            base_lease,
            status_error_handler,
        } = options;

        config.validate()?;
        if node.name().is_empty() {
            return Err(VnodeError::Config("node name must not be empty".to_string()));
        }
        if base_lease.is_some() && lease_store.is_none() {
            return Err(VnodeError::Config(
                "a base lease was given without a lease store".to_string(),
            ));
        }

        let leases = if config.lease.enabled {
            lease_store
        } else {
            None
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(false);

        Ok(Self {
            name: node.name().to_string(),
            provider,
            nodes,
            leases,
            base_lease,
            error_handler: status_error_handler,
            config,
            node: Mutex::new(node),
            lease_mode: OnceLock::new(),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            ready_tx,
            last_heartbeat: StdMutex::new(None),
        })
    }

    /// Get the node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lease mode of the current run.
    pub fn lease_mode(&self) -> LeaseMode {
        self.lease_mode.get().copied().unwrap_or(LeaseMode::Unknown)
    }

    /// Readiness signal, flipped to `true` once registration succeeded.
    ///
    /// Never flips if [`NodeController::run`] fails during startup.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Check if startup has completed.
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Wait until startup has completed.
    pub async fn wait_ready(&self) {
        let mut ready = self.ready_tx.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Time of the last heartbeat cycle in which both the ping and the
    /// follow-up write succeeded.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the local node, as last published.
    pub async fn node(&self) -> Node {
        self.node.lock().await.clone()
    }

    /// Register the node and supervise it until `shutdown` is cancelled.
    ///
    /// Returns `Ok` on cancellation after startup. Startup failures
    /// (registration, a lease probe error other than "unsupported", or
    /// cancellation before readiness) are returned as errors.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let events = self
            .events_rx
            .lock()
            .map_err(|_| VnodeError::InvalidState("controller state poisoned".to_string()))?
            .take()
            .ok_or_else(|| {
                VnodeError::InvalidState("node controller is already running".to_string())
            })?;

        let tx = self.events_tx.clone();
        self.provider.notify_node_status(
            shutdown.clone(),
            Box::new(move |node| {
                let _ = tx.send(LoopEvent::Status(node));
            }),
        );

        self.ensure_node()
            .await
            .map_err(|e| VnodeError::setup("registering node", e))?;
        if shutdown.is_cancelled() {
            return Err(VnodeError::Cancelled);
        }

        let lease = self.probe_lease().await?;
        if shutdown.is_cancelled() {
            return Err(VnodeError::Cancelled);
        }

        self.control_loop(shutdown, events, lease).await
    }

    /// Replace the local node and publish it right away.
    ///
    /// Serialized with the loop's own publishes. With `skip_error_handler`
    /// the configured handler is not consulted and the first error is
    /// returned as is.
    pub async fn update_node_from_outside(&self, node: Node, skip_error_handler: bool) -> Result<()> {
        let result = {
            let mut current = self.node.lock().await;
            *current = node;
            self.publish_locked(&mut current, skip_error_handler).await
        };

        let _ = self.events_tx.send(LoopEvent::ExternalPublish);
        result
    }

    async fn ensure_node(&self) -> Result<()> {
        let mut node = self.node.lock().await;
        match self.publish_locked(&mut node, true).await {
            Err(e) if e.is_not_found() => {}
            other => return other,
        }

        let created = self.nodes.create(&node).await?;
        tracing::info!(node = %self.name, "Registered node");
        *node = created;
        Ok(())
    }

    /// Resolve the lease mode, returning the created lease when supported.
    async fn probe_lease(&self) -> Result<Option<Lease>> {
        let Some(leases) = &self.leases else {
            self.resolve_lease_mode(LeaseMode::Unsupported);
            return Ok(None);
        };

        let mut lease = Lease::from_base(self.base_lease.as_ref());
        {
            let node = self.node.lock().await;
            lease.apply_node_defaults(&node, self.config.lease_duration());
        }

        match ensure_lease(leases.as_ref(), &lease).await {
            Ok(created) => {
                tracing::debug!(node = %self.name, lease = %created.name(), "Created lease for node");
                self.resolve_lease_mode(LeaseMode::Supported);
                Ok(Some(created))
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    node = %self.name,
                    "Node leases not supported, falling back to only node status updates"
                );
                self.resolve_lease_mode(LeaseMode::Unsupported);
                Ok(None)
            }
            Err(e) => Err(VnodeError::setup("creating node lease", e)),
        }
    }

    fn resolve_lease_mode(&self, mode: LeaseMode) {
        if self.lease_mode.set(mode).is_err() {
            tracing::warn!(node = %self.name, ?mode, "Lease mode already resolved");
        }
    }

    fn mark_ready(&self) {
        self.ready_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    async fn control_loop(
        &self,
        shutdown: CancellationToken,
        mut events: mpsc::UnboundedReceiver<LoopEvent>,
        mut lease: Option<Lease>,
    ) -> Result<()> {
        let lease_supported = self.lease_mode() == LeaseMode::Supported;
        let ping_interval = self.config.ping_interval();
        let status_interval = self.config.status_interval();

        let mut ping_timer = HeartbeatTimer::armed(ping_interval);
        let mut status_timer = if lease_supported {
            HeartbeatTimer::armed(status_interval)
        } else {
            HeartbeatTimer::disarmed()
        };

        self.mark_ready();
        tracing::info!(
            node = %self.name,
            lease_mode = ?self.lease_mode(),
            ping_interval = ?ping_interval,
            status_interval = ?status_interval,
            "Node controller started"
        );

        loop {
            tokio::select! {
                // Due timers win over queued events so a burst of
                // notifications cannot starve pings and lease renewals.
                biased;

                _ = shutdown.cancelled() => {
                    ping_timer.stop();
                    status_timer.stop();
                    tracing::info!(node = %self.name, "Node controller shutting down");
                    return Ok(());
                }
                _ = status_timer.fired() => {
                    if let Err(e) = self.update_status(false).await {
                        tracing::error!(node = %self.name, error = %e, "Error handling node status update");
                    }
                    status_timer.reset(status_interval);
                }
                _ = ping_timer.fired() => {
                    match self.handle_ping(&shutdown, &mut lease).await {
                        Ok(()) => {
                            self.record_heartbeat();
                            tracing::debug!(node = %self.name, "Successful node ping");
                        }
                        Err(e) => {
                            tracing::error!(node = %self.name, error = %e, "Error while handling node ping");
                        }
                    }
                    ping_timer.reset(ping_interval);
                }
                Some(event) = events.recv() => {
                    // The active timer is the one whose fire would publish status.
                    let (timer, interval) = if lease_supported {
                        (&mut status_timer, status_interval)
                    } else {
                        (&mut ping_timer, ping_interval)
                    };
                    timer.stop();

                    match event {
                        LoopEvent::Status(updated) => {
                            tracing::debug!(node = %self.name, "Received status update");
                            if let Err(e) = self.apply_status_update(updated).await {
                                tracing::error!(node = %self.name, error = %e, "Error handling node status update");
                            }
                        }
                        LoopEvent::ExternalPublish => {
                            tracing::debug!(node = %self.name, "Node published from outside the loop");
                        }
                    }

                    timer.reset(interval);
                }
            }
        }
    }

    /// Ping the provider, then refresh liveness evidence.
    ///
    /// The cycle only counts as a heartbeat if the follow-up write succeeds
    /// too.
    async fn handle_ping(&self, cancel: &CancellationToken, lease: &mut Option<Lease>) -> Result<()> {
        self.ping(cancel).await?;

        match self.lease_mode() {
            LeaseMode::Supported => self.renew_lease(lease).await,
            LeaseMode::Unsupported | LeaseMode::Unknown => self.update_status(false).await,
        }
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let timeout = self.config.ping_timeout();
        match tokio::time::timeout(timeout, self.provider.ping(cancel)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(VnodeError::Provider(format!(
                "error while pinging the node provider: {}",
                e
            ))),
            Err(_) => Err(VnodeError::Timeout(format!(
                "node provider ping exceeded {}",
                format_duration(timeout)
            ))),
        }
    }

    async fn renew_lease(&self, lease: &mut Option<Lease>) -> Result<()> {
        let (Some(leases), Some(current)) = (&self.leases, lease.as_ref()) else {
            return Err(VnodeError::InvalidState(
                "lease renewal without an active lease".to_string(),
            ));
        };

        let renewed =
            update_node_lease(leases.as_ref(), current.renewed(), &self.config.lease.retry).await?;
        *lease = Some(renewed);
        Ok(())
    }

    async fn apply_status_update(&self, updated: Node) -> Result<()> {
        let mut node = self.node.lock().await;
        node.status = updated.status;
        self.publish_locked(&mut node, false).await
    }

    async fn update_status(&self, skip_error_handler: bool) -> Result<()> {
        let mut node = self.node.lock().await;
        self.publish_locked(&mut node, skip_error_handler).await
    }

    /// Publish the node. The caller must hold the node lock.
    async fn publish_locked(&self, node: &mut Node, skip_error_handler: bool) -> Result<()> {
        node.stamp_heartbeats(Utc::now());

        let err = match update_node_status(self.nodes.as_ref(), node).await {
            Ok(updated) => {
                *node = updated;
                return Ok(());
            }
            Err(e) => e,
        };

        if skip_error_handler || err.is_not_found() {
            return Err(err);
        }
        let Some(handler) = &self.error_handler else {
            return Err(err);
        };

        handler(err).await?;
        let updated = update_node_status(self.nodes.as_ref(), node).await?;
        *node = updated;
        Ok(())
    }

    fn record_heartbeat(&self) {
        let mut last = self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Utc::now());
    }
}

fn format_duration(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}
