//! SSH port-forward tunnel
//!
//! A tunnel is run by one worker task and observed through a
//! [`watch`] channel carrying its [`TunnelState`]:
//!
//! ```text
//! Connecting ──► ForwardActive ──► Stopping ──► Stopped
//!     │
//!     └──► Failed
//! ```
//!
//! The worker connects, logs in, resolves the update's addresses over the
//! session, binds an ephemeral port on `127.0.0.1` and then forwards every
//! local connection through a `direct-tcpip` channel until it is told to stop.

use crate::UPDATER_NAME;
use crate::session::Credentials;
use async_trait::async_trait;
use dnsupdater_core::{AddressResolver, ClientResolver, Error, IpToken, ResolvedAddressSet, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Upper bound for the worker to wind down after being told to stop
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Byte stream of one forwarded connection
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

/// An established, logged-in SSH session
#[async_trait]
pub trait SshLink: Send + Sync {
    /// Resolver for `client`: the address the server sees the session coming from
    fn client_resolver(&self) -> Arc<dyn ClientResolver>;

    /// Open a `direct-tcpip` channel to `host:port` on behalf of `originator`
    async fn open_forward(&self, host: &str, port: u16, originator: SocketAddr) -> Result<Box<dyn ForwardStream>>;

    /// Close the session
    async fn disconnect(&self);
}

/// Opens SSH sessions for the tunnel worker
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16, credentials: &Credentials) -> Result<Arc<dyn SshLink>>;
}

/// Lifecycle of a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    ForwardActive {
        /// Local port forwarding to the downstream endpoint
        port: u16,
        /// The update's addresses, resolved over the session
        addresses: ResolvedAddressSet,
    },
    Stopping,
    Stopped,
    Failed(String),
}

/// Everything the worker needs
#[derive(Debug, Clone)]
pub struct TunnelParams {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    /// Endpoint the forwarded connections are opened to, as seen from the server
    pub forward_host: String,
    pub forward_port: u16,
    /// Address tokens to resolve once the session is up
    pub ips: Vec<IpToken>,
}

/// Handle to a running tunnel worker
pub struct Tunnel {
    state: watch::Receiver<TunnelState>,
    stop: Option<oneshot::Sender<()>>,
    worker: JoinHandle<()>,
}

impl Tunnel {
    /// Spawn the worker, opening the session through `connector`
    pub fn start(params: TunnelParams, connector: Arc<dyn SshConnector>) -> Self {
        let (state_tx, state_rx) = watch::channel(TunnelState::Connecting);
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = tokio::spawn(run_worker(params, connector, state_tx, stop_rx));

        Self {
            state: state_rx,
            stop: Some(stop_tx),
            worker,
        }
    }

    /// Wait until the forward is active
    ///
    /// # Returns
    ///
    /// - `Ok((port, addresses))`: Local forward port and resolved addresses
    /// - `Err(Error::Timeout)`: Not active within `timeout`; the worker is aborted
    /// - `Err(Error::Transport)`: The worker failed or went away
    pub async fn wait_active(&mut self, timeout: Duration) -> Result<(u16, ResolvedAddressSet)> {
        match tokio::time::timeout(timeout, wait_for_active(&mut self.state)).await {
            Ok(result) => result,
            Err(_) => {
                self.worker.abort();
                Err(Error::timeout(UPDATER_NAME, "Timeout while waiting for SSH connection!"))
            }
        }
    }

    /// Abort the worker right away
    pub fn abort(&self) {
        self.worker.abort();
    }

    /// Tell the worker to stop and wait for it, aborting after [`JOIN_TIMEOUT`]
    ///
    /// Returns the last state the worker published.
    pub async fn shutdown(mut self) -> TunnelState {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if tokio::time::timeout(JOIN_TIMEOUT, &mut self.worker).await.is_err() {
            tracing::warn!("SSH tunnel did not stop within {:?}, aborting", JOIN_TIMEOUT);
            self.worker.abort();
        }

        self.state.borrow().clone()
    }
}

async fn wait_for_active(state: &mut watch::Receiver<TunnelState>) -> Result<(u16, ResolvedAddressSet)> {
    loop {
        let outcome = match &*state.borrow_and_update() {
            TunnelState::Connecting => None,
            TunnelState::ForwardActive { port, addresses } => Some(Ok((*port, addresses.clone()))),
            TunnelState::Failed(message) => Some(Err(Error::transport(UPDATER_NAME, message.clone()))),
            TunnelState::Stopping | TunnelState::Stopped => {
                Some(Err(Error::transport(UPDATER_NAME, "Tunnel closed before it was ready")))
            }
        };
        if let Some(outcome) = outcome {
            return outcome;
        }

        state
            .changed()
            .await
            .map_err(|_| Error::transport(UPDATER_NAME, "Tunnel worker exited"))?;
    }
}

async fn run_worker(
    params: TunnelParams,
    connector: Arc<dyn SshConnector>,
    state: watch::Sender<TunnelState>,
    mut stop: oneshot::Receiver<()>,
) {
    let established = tokio::select! {
        established = establish(&params, connector.as_ref()) => established,
        _ = &mut stop => {
            state.send_replace(TunnelState::Stopped);
            return;
        }
    };

    let (link, listener, addresses) = match established {
        Ok(established) => established,
        Err(e) => {
            tracing::debug!("SSH tunnel to {}:{} failed: {}", params.host, params.port, e);
            state.send_replace(TunnelState::Failed(error_message(e)));
            return;
        }
    };

    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            state.send_replace(TunnelState::Failed(e.to_string()));
            return;
        }
    };

    tracing::debug!(
        "Forwarding 127.0.0.1:{} to {}:{} via {}",
        port,
        params.forward_host,
        params.forward_port,
        params.host
    );
    state.send_replace(TunnelState::ForwardActive { port, addresses });

    forward_until_stopped(&link, listener, &params, stop).await;

    state.send_replace(TunnelState::Stopping);
    link.disconnect().await;
    state.send_replace(TunnelState::Stopped);
}

/// Message of a worker error without the updater tag, which the caller adds
fn error_message(error: Error) -> String {
    match error {
        Error::Transport { message, .. } | Error::Remote { message, .. } | Error::Timeout { message, .. } => message,
        other => other.to_string(),
    }
}

async fn establish(
    params: &TunnelParams,
    connector: &dyn SshConnector,
) -> Result<(Arc<dyn SshLink>, TcpListener, ResolvedAddressSet)> {
    let link = connector
        .connect(&params.host, params.port, &params.credentials)
        .await?;

    let resolver = AddressResolver::new(link.client_resolver());
    let addresses = resolver.resolve(&params.ips).await?;

    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok((link, listener, addresses))
}

async fn forward_until_stopped(
    link: &Arc<dyn SshLink>,
    listener: TcpListener,
    params: &TunnelParams,
    mut stop: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(forward_connection(
                        link.clone(),
                        stream,
                        peer,
                        params.forward_host.clone(),
                        params.forward_port,
                    ));
                }
                Err(e) => {
                    tracing::warn!("Tunnel listener failed: {}", e);
                    break;
                }
            },
        }
    }

    connections.shutdown().await;
}

async fn forward_connection(link: Arc<dyn SshLink>, mut stream: TcpStream, peer: SocketAddr, host: String, port: u16) {
    let mut remote = match link.open_forward(&host, port, peer).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::warn!("Failed to open forward to {}:{}: {}", host, port, e);
            return;
        }
    };

    if let Err(e) = tokio::io::copy_bidirectional(&mut stream, &mut remote).await {
        tracing::debug!("Forwarded connection from {} closed: {}", peer, e);
    }
}
