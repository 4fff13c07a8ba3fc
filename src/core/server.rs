//! Listener engine: accept loop, control loop and connection lifecycle.
//!
//! A [`Server`] owns one bound address. The accept task hands new
//! connections to per-connection wrap tasks (SNI sniff, TLS attach), which
//! enqueue them on the control loop. The control loop is the only mutator of
//! the client table; admission, disconnect bookkeeping and teardown all run
//! through it, so table reads are always consistent with prior events.
//!
//! Per admitted connection, a handler task checks access, asks the scheduler
//! for a backend, dials it (plain or TLS), and starts two relay pumps whose
//! byte samples feed the scheduler's rx/tx counters. Every handler posts a
//! disconnect event on exit, whatever the exit path.

use std::{collections::HashMap, io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::models::{Protocol, ServerConfig},
    core::{
        access::AccessFilter,
        context::{BoxedIo, ClientConn, TcpContext},
        relay, sni,
        tls::{self, AcmeEvents},
    },
    ports::{Backend, Scheduler, StatsHandler},
    utils::duration,
};

/// Applied when `sni.read_timeout` is unset or disabled
const DEFAULT_SNI_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors surfaced by server construction and startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// Access rules, TLS material or backend-TLS material failed to load
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The listener could not be created
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// A collaborator failed during startup
    #[error("Failed to start: {0}")]
    Start(String),

    /// `start` was called twice on the same instance
    #[error("Server already started")]
    AlreadyStarted,
}

/// Immutable parts shared between the control loop, accept/wrap tasks and
/// connection handlers.
struct Shared {
    name: String,
    cfg: ServerConfig,
    scheduler: Arc<dyn Scheduler>,
    stats: Arc<dyn StatsHandler>,
    access: Option<AccessFilter>,
    terminator: Option<TlsAcceptor>,
    dialer: Option<tokio_rustls::TlsConnector>,
    disconnect_tx: mpsc::Sender<SocketAddr>,
}

/// Receiving ends of the control channels, consumed by `start`
struct ControlChannels {
    connect_rx: mpsc::Receiver<TcpContext>,
    disconnect_rx: mpsc::Receiver<SocketAddr>,
    stop_rx: mpsc::Receiver<()>,
}

/// A single listener proxying client connections to scheduled backends.
pub struct Server {
    shared: Arc<Shared>,
    connect_tx: mpsc::Sender<TcpContext>,
    stop_tx: mpsc::Sender<()>,
    control: Option<ControlChannels>,
    acme: Option<AcmeEvents>,
    stop_token: CancellationToken,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a server, materializing access rules and TLS settings.
    pub fn new(
        name: impl Into<String>,
        cfg: ServerConfig,
        scheduler: Arc<dyn Scheduler>,
        stats: Arc<dyn StatsHandler>,
    ) -> Result<Self, ServerError> {
        let name = name.into();

        let access = cfg
            .access
            .as_ref()
            .map(AccessFilter::new)
            .transpose()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let (terminator, acme) = match cfg.protocol {
            Protocol::Tls => {
                if let Some(acme_cfg) = &cfg.acme {
                    let (config, events) = tls::terminator_from_acme(acme_cfg, cfg.tls.as_ref())
                        .map_err(|e| ServerError::Config(e.to_string()))?;
                    (Some(TlsAcceptor::from(Arc::new(config))), Some(events))
                } else if let Some(tls_cfg) = &cfg.tls {
                    let config = tls::terminator_from_files(tls_cfg)
                        .map_err(|e| ServerError::Config(e.to_string()))?;
                    (Some(TlsAcceptor::from(Arc::new(config))), None)
                } else {
                    return Err(ServerError::Config(
                        "protocol 'tls' requires a [tls] or [acme] section".to_string(),
                    ));
                }
            }
            Protocol::Tcp => (None, None),
        };

        let dialer = cfg
            .backends_tls
            .as_ref()
            .map(|backends_tls| {
                tls::dialer_from_config(backends_tls)
                    .map(|config| tokio_rustls::TlsConnector::from(Arc::new(config)))
            })
            .transpose()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let (connect_tx, connect_rx) = mpsc::channel(1);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        info!(
            name = %name,
            bind = %cfg.bind,
            protocol = ?cfg.protocol,
            sni = cfg.sni.is_some(),
            "Creating server"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                cfg,
                scheduler,
                stats,
                access,
                terminator,
                dialer,
                disconnect_tx,
            }),
            connect_tx,
            stop_tx,
            control: Some(ControlChannels {
                connect_rx,
                disconnect_rx,
                stop_rx,
            }),
            acme,
            stop_token: CancellationToken::new(),
            local_addr: None,
        })
    }

    /// The immutable configuration this server was created with
    pub fn cfg(&self) -> &ServerConfig {
        &self.shared.cfg
    }

    /// Address the listener is bound to, available after `start`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Spawn the control loop, start collaborators, bind and accept.
    ///
    /// On any failure the partial state is torn down via `stop` before the
    /// error is returned.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let control = self.control.take().ok_or(ServerError::AlreadyStarted)?;
        tokio::spawn(control_loop(
            Arc::clone(&self.shared),
            control,
            self.stop_token.clone(),
        ));

        self.shared.stats.start();

        if let Err(e) = self.shared.scheduler.start().await {
            self.stop().await;
            return Err(ServerError::Start(format!("scheduler: {e}")));
        }

        if let Some(acme) = self.acme.take() {
            tokio::spawn(drive_acme(acme, self.stop_token.clone()));
        }

        if let Err(e) = self.listen().await {
            self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Signal the control loop to tear everything down.
    pub async fn stop(&self) {
        info!(name = %self.shared.name, "Stopping server");
        let _ = self.stop_tx.send(()).await;
    }

    async fn listen(&mut self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.shared.cfg.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.shared.cfg.bind.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.shared.cfg.bind.clone(),
            source,
        })?;
        self.local_addr = Some(local_addr);

        info!(name = %self.shared.name, addr = %local_addr, "Listening");

        tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            self.connect_tx.clone(),
            self.stop_token.clone(),
        ));
        Ok(())
    }
}

/// Single consumer of connect / disconnect / stop events; sole owner of the
/// client table.
async fn control_loop(
    shared: Arc<Shared>,
    mut channels: ControlChannels,
    stop_token: CancellationToken,
) {
    let mut clients: HashMap<String, CancellationToken> = HashMap::new();

    loop {
        tokio::select! {
            Some(ctx) = channels.connect_rx.recv() => {
                handle_client_connect(&shared, &mut clients, &stop_token, ctx);
            }
            Some(peer) = channels.disconnect_rx.recv() => {
                handle_client_disconnect(&shared, &mut clients, peer);
            }
            _ = channels.stop_rx.recv() => {
                shared.scheduler.stop();
                shared.stats.stop();
                // Cancelling the parent token closes the listener and every
                // connection in the table.
                stop_token.cancel();
                for (_, token) in clients.drain() {
                    token.cancel();
                }
                debug!(name = %shared.name, "Control loop exited");
                return;
            }
        }
    }
}

/// Admission: enforce max_connections, register the client, spawn the
/// handler. A refused connection is dropped without touching scheduler
/// counters.
fn handle_client_connect(
    shared: &Arc<Shared>,
    clients: &mut HashMap<String, CancellationToken>,
    stop_token: &CancellationToken,
    ctx: TcpContext,
) {
    let max_connections = shared.cfg.max_connections as usize;
    if max_connections != 0 && clients.len() >= max_connections {
        warn!(name = %shared.name, bind = %shared.cfg.bind, "Too many connections");
        return;
    }

    let token = stop_token.child_token();
    clients.insert(ctx.key(), token.clone());
    shared.stats.connections(clients.len());

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let peer_addr = ctx.peer_addr;
        handle(&shared, ctx, token).await;
        // The control loop may already have exited after stop; a closed
        // channel fails the send immediately instead of leaking the task.
        let _ = shared.disconnect_tx.send(peer_addr).await;
    });
}

/// Disconnect: drop the table entry and push the new count.
fn handle_client_disconnect(
    shared: &Arc<Shared>,
    clients: &mut HashMap<String, CancellationToken>,
    peer: SocketAddr,
) {
    if let Some(token) = clients.remove(&peer.to_string()) {
        // Benign when the connection is already gone.
        token.cancel();
    }
    shared.stats.connections(clients.len());
}

/// Accept until the listener errors or the server stops.
async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    connect_tx: mpsc::Sender<TcpContext>,
    stop_token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = stop_token.cancelled() => {
                debug!(name = %shared.name, "Accept loop stopped");
                return;
            }
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let shared = Arc::clone(&shared);
                let connect_tx = connect_tx.clone();
                tokio::spawn(wrap(shared, stream, peer_addr, connect_tx));
            }
            Err(e) => {
                error!(name = %shared.name, error = %e, "Accept failed, closing listener");
                return;
            }
        }
    }
}

/// Sniff the ClientHello if configured, attach the TLS terminator if
/// configured, then enqueue the connection on the control loop.
///
/// The sniff runs before TLS so the ClientHello is read as plaintext; the
/// wrapper replays the same bytes into the TLS layer afterwards.
async fn wrap(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    connect_tx: mpsc::Sender<TcpContext>,
) {
    let mut hostname = None;

    let io: BoxedIo = match &shared.cfg.sni {
        Some(sni_cfg) => {
            let read_timeout =
                duration::parse_or(&sni_cfg.read_timeout, DEFAULT_SNI_READ_TIMEOUT);
            match sni::sniff(stream, read_timeout).await {
                Ok((wrapped, name)) => {
                    hostname = Some(name);
                    Box::new(wrapped)
                }
                Err(e) => {
                    debug!(peer = %peer_addr, error = %e, "Failed to read ClientHello for SNI");
                    return;
                }
            }
        }
        None => Box::new(stream),
    };

    let conn = match &shared.terminator {
        Some(acceptor) => ClientConn::TlsPending {
            io,
            acceptor: acceptor.clone(),
        },
        None => ClientConn::Plain(io),
    };

    if connect_tx
        .send(TcpContext {
            hostname,
            peer_addr,
            conn,
        })
        .await
        .is_err()
    {
        debug!(peer = %peer_addr, "Control loop gone, dropping connection");
    }
}

/// Per-connection handler: access check, backend selection, dial, counters,
/// relays.
async fn handle(shared: &Arc<Shared>, ctx: TcpContext, token: CancellationToken) {
    let peer_addr = ctx.peer_addr;

    if let Some(access) = &shared.access {
        if !access.allows(peer_addr.ip()) {
            debug!(peer = %peer_addr, "Client disallowed to connect");
            return;
        }
    }

    let backend = match shared.scheduler.take_backend(&ctx).await {
        Ok(backend) => backend,
        Err(e) => {
            error!(peer = %peer_addr, error = %e, "No backend, closing connection");
            return;
        }
    };

    let backend_io = match dial_backend(shared, &backend).await {
        Ok(io) => io,
        Err(e) => {
            shared.scheduler.increment_refused(&backend);
            error!(backend = %backend, error = %e, "Backend dial failed");
            return;
        }
    };

    shared.scheduler.increment_connection(&backend);
    proxy_session(shared, ctx, backend_io, &backend, token).await;
    shared.scheduler.decrement_connection(&backend);
}

/// Dial the backend, plain TCP or TLS, bounded by
/// `backend_connection_timeout` ("0" = no bound).
async fn dial_backend(shared: &Arc<Shared>, backend: &Backend) -> io::Result<BoxedIo> {
    let connect_timeout = duration::parse_opt(&shared.cfg.backend_connection_timeout);
    let addr = backend.address();

    let tcp = bounded(connect_timeout, TcpStream::connect(&addr), "backend connect").await?;

    match &shared.dialer {
        Some(connector) => {
            let server_name = rustls::pki_types::ServerName::try_from(backend.host().to_string())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let tls = bounded(
                connect_timeout,
                connector.connect(server_name, tcp),
                "backend TLS handshake",
            )
            .await?;
            Ok(Box::new(tls))
        }
        None => Ok(Box::new(tcp)),
    }
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F, what: &str) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{what} timed out"),
            )),
        },
        None => fut.await,
    }
}

/// Complete any deferred client TLS handshake, run both relay directions and
/// feed their samples into the scheduler's byte counters.
///
/// rx/tx are counted from the backend's perspective: rx is client->backend,
/// tx is backend->client.
async fn proxy_session(
    shared: &Arc<Shared>,
    ctx: TcpContext,
    backend_io: BoxedIo,
    backend: &Backend,
    token: CancellationToken,
) {
    let TcpContext {
        peer_addr, conn, ..
    } = ctx;

    let client_io = match conn.establish().await {
        Ok(io) => io,
        Err(e) => {
            debug!(peer = %peer_addr, error = %e, "Client TLS handshake failed");
            return;
        }
    };

    debug!(peer = %peer_addr, backend = %backend, "Begin proxying");

    let (client_read, client_write) = tokio::io::split(client_io);
    let (backend_read, backend_write) = tokio::io::split(backend_io);

    let backend_idle = duration::parse_opt(&shared.cfg.backend_idle_timeout);
    let client_idle = duration::parse_opt(&shared.cfg.client_idle_timeout);

    let mut client_to_backend =
        relay::spawn(client_read, backend_write, backend_idle, token.clone());
    let mut backend_to_client = relay::spawn(backend_read, client_write, client_idle, token);

    let (mut rx_open, mut tx_open) = (true, true);
    while rx_open || tx_open {
        tokio::select! {
            sample = client_to_backend.recv(), if rx_open => match sample {
                Some(sample) => shared.scheduler.increment_rx(backend, sample.count_written),
                None => rx_open = false,
            },
            sample = backend_to_client.recv(), if tx_open => match sample {
                Some(sample) => shared.scheduler.increment_tx(backend, sample.count_written),
                None => tx_open = false,
            },
        }
    }

    debug!(peer = %peer_addr, backend = %backend, "End proxying");
}

/// Drive the ACME manager's event stream until shutdown.
async fn drive_acme(mut events: AcmeEvents, stop_token: CancellationToken) {
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(ok)) => info!(event = ?ok, "ACME event"),
                Some(Err(e)) => error!(error = %e, "ACME error"),
                None => return,
            },
            _ = stop_token.cancelled() => return,
        }
    }
}
