//! Coordinator server
//!
//! Accepts node connections, binds each to an identifier on its first line,
//! routes `TIME_REPLY` messages to the waiting exchange, and drives rounds on
//! a fixed interval.

use berkeley_time::TimeSource;
use berkeley_types::{decode_message, decode_registration, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::connection::NodeConnection;
use crate::error::NetworkError;
use crate::framing::{write_message, LineReader};
use crate::registry::SessionRegistry;
use crate::scheduler::{RoundConfig, RoundScheduler};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// `host:port` to listen on.
    pub listen_addr: String,
    pub round: RoundConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9000".to_string(),
            round: RoundConfig::default(),
        }
    }
}

/// A bound but not yet accepting coordinator.
pub struct Coordinator {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<RoundScheduler>,
}

impl Coordinator {
    /// Bind the listening socket. Failure here is the only fatal error.
    pub async fn bind(
        config: CoordinatorConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let registry = Arc::new(SessionRegistry::new());
        let scheduler = Arc::new(RoundScheduler::new(registry.clone(), clock, config.round));
        Ok(Self {
            listener,
            registry,
            scheduler,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn scheduler(&self) -> Arc<RoundScheduler> {
        self.scheduler.clone()
    }

    /// Start accepting connections in the background. Rounds are left to the
    /// caller, either via [`RunningCoordinator::run_rounds`] or manually.
    pub fn start(self) -> Result<RunningCoordinator, NetworkError> {
        let local_addr = self.local_addr()?;
        info!("[+] Berkeley coordinator listening on {local_addr}");
        let acceptor = tokio::spawn(accept_loop(self.listener, self.registry.clone()));
        Ok(RunningCoordinator {
            local_addr,
            registry: self.registry,
            scheduler: self.scheduler,
            acceptor,
        })
    }

    /// Accept connections and run rounds until the process stops.
    pub async fn run(self) -> Result<(), NetworkError> {
        let running = self.start()?;
        running.run_rounds().await;
        Ok(())
    }
}

/// Handle to a coordinator whose accept loop is running. Dropping it stops
/// accepting new connections.
pub struct RunningCoordinator {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<RoundScheduler>,
    acceptor: JoinHandle<()>,
}

impl RunningCoordinator {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn scheduler(&self) -> Arc<RoundScheduler> {
        self.scheduler.clone()
    }

    /// Run rounds on the configured interval, forever.
    pub async fn run_rounds(&self) {
        self.scheduler.run().await
    }
}

impl Drop for RunningCoordinator {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, registry: Arc<SessionRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted connection from {peer}");
                let registry = registry.clone();
                tokio::spawn(handle_connection(stream, peer, registry));
            }
            Err(err) => {
                error!("failed to accept connection: {err}");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Serve one node connection until it closes or errors.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, registry: Arc<SessionRegistry>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY for {peer}: {err}");
    }
    let peer_label = peer.to_string();
    let (read_half, write_half) = stream.into_split();
    let (connection, outbound) = NodeConnection::new(peer_label.clone());
    let writer = tokio::spawn(write_loop(write_half, outbound, peer_label.clone()));

    let mut reader = LineReader::new(read_half);
    let mut node_id: Option<String> = None;

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("connection error from {peer_label}: {err}");
                break;
            }
        };

        if node_id.is_none() {
            match decode_registration(&line) {
                Ok(registration) => {
                    let id = registration.resolve_id(&peer_label);
                    if registry.register(id.clone(), connection.clone()) {
                        warn!(
                            "[!] {id} re-registered from {peer_label}; previous connection is no longer routed"
                        );
                    }
                    info!("[+] Node connected: {id} ({peer_label})");
                    node_id = Some(id);
                }
                Err(err) => debug!("dropping invalid registration from {peer_label}: {err}"),
            }
            continue;
        }
        let Some(id) = node_id.as_deref() else {
            continue;
        };

        registry.touch(id, connection.id());
        match decode_message(&line) {
            Ok(Message::TimeReply { t1, t0 }) => {
                if !connection.deliver_reply(t1, t0) {
                    debug!("discarding uncorrelated TIME_REPLY from {id}");
                }
            }
            Ok(other) => debug!("ignoring unexpected {} from {id}", other.type_name()),
            Err(err) => debug!("dropping malformed line from {id}: {err}"),
        }
    }

    connection.close();
    writer.abort();
    if let Some(id) = node_id {
        if registry.remove_connection(&id, connection.id()) {
            info!("[-] Node disconnected: {id}");
        } else {
            debug!("orphaned connection for {id} closed");
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    peer: String,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            warn!("failed to write {} to {peer}: {err}", message.type_name());
            break;
        }
    }
}
