//! Connection manager: accepts sockets and hands them to groups.
//!
//! For every accepted socket the manager builds a fresh [`FilterPipeline`]
//! from its pipeline factory, wraps the socket in a [`TcpConnection`], asks
//! the [`GroupPolicy`] which group it belongs to, makes sure that group's
//! dispatch loop is running, registers the connection and starts its read
//! loop. When a read loop ends the connection is removed from its group and
//! closed.
//!
//! [`ConnectionManager::start`] runs until [`ConnectionManager::stop`] is
//! called. It then stops accepting, closes every connection in every group
//! it has used, stops those groups and returns.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::connection::{Connection, TcpConnection};
use crate::error::{ChunkwireError, Result};
use crate::filter::{FilterPipeline, FrameExtractor};
use crate::group::ConnectionGroup;
use crate::lifecycle::{Lifecycle, LifecycleState};

/// Builds the pipeline for each newly accepted connection.
pub type PipelineFactory = Arc<dyn Fn() -> FilterPipeline + Send + Sync>;

/// Pipeline factory producing a lone [`FrameExtractor`].
pub fn default_pipeline_factory() -> PipelineFactory {
    Arc::new(|| FilterPipeline::new().with(FrameExtractor::new()))
}

/// Chooses the group an accepted connection joins.
pub trait GroupPolicy: Send + Sync + 'static {
    /// Group for `conn`. The connection is not started yet.
    fn select(&self, conn: &TcpConnection) -> ConnectionGroup;
}

/// Puts every connection in one group.
#[derive(Debug, Clone)]
pub struct AllInOnePolicy {
    group: ConnectionGroup,
}

impl AllInOnePolicy {
    /// Name of the group created by [`Default`].
    pub const DEFAULT_GROUP: &'static str = "default";

    /// Use `group` for every connection.
    pub fn new(group: ConnectionGroup) -> Self {
        Self { group }
    }

    /// The shared group.
    pub fn group(&self) -> &ConnectionGroup {
        &self.group
    }
}

impl Default for AllInOnePolicy {
    fn default() -> Self {
        Self::new(ConnectionGroup::new(Self::DEFAULT_GROUP))
    }
}

impl GroupPolicy for AllInOnePolicy {
    fn select(&self, _conn: &TcpConnection) -> ConnectionGroup {
        self.group.clone()
    }
}

/// Accept loop plus the groups it has populated.
pub struct ConnectionManager {
    config: ServerConfig,
    policy: Arc<dyn GroupPolicy>,
    pipeline_factory: PipelineFactory,
    groups: Mutex<HashMap<String, ConnectionGroup>>,
    lifecycle: Lifecycle,
    shutdown: Mutex<CancellationToken>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ConnectionManager {
    /// Create a manager with one shared group and frame-only pipelines.
    pub fn new(config: ServerConfig) -> Self {
        let group = ConnectionGroup::with_capacity(
            AllInOnePolicy::DEFAULT_GROUP,
            config.connections_pool_init_size,
        );
        Self {
            config,
            policy: Arc::new(AllInOnePolicy::new(group)),
            pipeline_factory: default_pipeline_factory(),
            groups: Mutex::new(HashMap::new()),
            lifecycle: Lifecycle::new(),
            shutdown: Mutex::new(CancellationToken::new()),
            local_addr: Mutex::new(None),
        }
    }

    /// Replace the grouping policy.
    pub fn with_policy(mut self, policy: impl GroupPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replace the per-connection pipeline factory.
    pub fn with_pipeline_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> FilterPipeline + Send + Sync + 'static,
    {
        self.pipeline_factory = Arc::new(factory);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Address of the listener passed to [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Every group a connection has been placed in so far.
    pub fn groups(&self) -> Vec<ConnectionGroup> {
        self.groups.lock().values().cloned().collect()
    }

    /// A group by name.
    pub fn group(&self, name: &str) -> Option<ConnectionGroup> {
        self.groups.lock().get(name).cloned()
    }

    /// Total connections across all groups.
    pub fn connection_count(&self) -> usize {
        self.groups().iter().map(|g| g.len()).sum()
    }

    /// Accept connections from `listener` until [`stop`](Self::stop).
    pub async fn start(&self, listener: TcpListener) -> Result<()> {
        self.lifecycle.transition(LifecycleState::Starting)?;
        let shutdown = CancellationToken::new();
        *self.shutdown.lock() = shutdown.clone();
        *self.local_addr.lock() = listener.local_addr().ok();
        self.lifecycle.transition(LifecycleState::Running)?;

        tracing::info!(
            server = %self.config.name,
            addr = ?self.local_addr(),
            "accepting connections"
        );

        let reapers = TaskTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        if let Err(e) = self.attach(stream, &reapers) {
                            tracing::warn!(%peer, error = %e, "failed to attach connection");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }
        drop(listener);

        self.shutdown_groups().await;
        reapers.close();
        reapers.wait().await;

        self.lifecycle.transition(LifecycleState::Idle)?;
        tracing::info!(server = %self.config.name, "stopped");
        Ok(())
    }

    /// Ask a running [`start`](Self::start) to wind down.
    pub fn stop(&self) -> Result<()> {
        self.lifecycle.transition(LifecycleState::Stopping)?;
        self.shutdown.lock().cancel();
        Ok(())
    }

    /// Wait until the manager is idle again.
    pub async fn wait_for_complete(&self) {
        self.lifecycle.wait_for(LifecycleState::Idle).await
    }

    fn attach(&self, stream: TcpStream, reapers: &TaskTracker) -> Result<()> {
        let pipeline = (self.pipeline_factory)();
        let conn = Arc::new(TcpConnection::from_tcp(stream, pipeline, self.config.connection()));
        let group = self.policy.select(&conn);
        self.track(&group);

        group.ensure_started()?;
        group.add(conn.clone())?;
        if let Err(e) = conn.start() {
            let _ = group.remove(conn.id());
            return Err(e);
        }

        reapers.spawn(reap(conn, group));
        Ok(())
    }

    fn track(&self, group: &ConnectionGroup) {
        self.groups
            .lock()
            .entry(group.name().to_string())
            .or_insert_with(|| group.clone());
    }

    async fn shutdown_groups(&self) {
        for group in self.groups() {
            let closed = group.close_all().await;
            tracing::info!(group = group.name(), closed, "group closed");

            match group.stop() {
                Ok(()) => group.wait_for_complete().await,
                Err(ChunkwireError::InvalidTransition { from, .. }) => {
                    tracing::debug!(group = group.name(), state = %from, "group was not running");
                }
                Err(e) => tracing::warn!(group = group.name(), error = %e, "failed to stop group"),
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("groups", &self.groups.lock().len())
            .finish()
    }
}

/// Remove a connection from its group once its read loop ends.
async fn reap(conn: Arc<TcpConnection>, group: ConnectionGroup) {
    conn.read_stopped().await;
    let id = conn.id();

    match group.remove(id) {
        Ok(_) => tracing::debug!(connection = %id, exit = ?conn.read_exit(), "reaped connection"),
        // Already gone, e.g. removed by close_all during shutdown.
        Err(ChunkwireError::NotAMember(_)) => {}
        Err(e) => tracing::warn!(connection = %id, error = %e, "failed to reap connection"),
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(connection = %id, error = %e, "close after read loop ended failed");
    }
}
