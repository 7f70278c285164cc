pub mod acceptor;
pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod db;
pub mod dispatch;
pub mod history;
pub mod liveness;
pub mod offline;
pub mod state;

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::info;

use config::Config;
use dispatch::DispatchSender;
use state::{ClientIdAllocator, SharedRegistry};

/// Shared handles every connection task needs: the database pool, the
/// client registry, a way to queue dispatch work, and the running config.
pub struct ServerContext {
    pub pool: SqlitePool,
    pub registry: SharedRegistry,
    pub dispatch_tx: DispatchSender,
    pub config: Config,
    pub client_ids: ClientIdAllocator,
}

/// Runs the server until `shutdown_signal` resolves: binds the listener,
/// starts the dispatch worker and liveness supervisor, then runs the accept
/// loop. All three stop in response to the same shutdown broadcast.
pub async fn run(config: Config, pool: SqlitePool, shutdown_signal: impl std::future::Future<Output = ()>) {
    let listener = bind_listener(&config.bind_addr, config.max_connections)
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));
    info!(addr = %config.bind_addr, "server listening");
    run_with_listener(config, pool, listener, shutdown_signal).await;
}

/// Binds a listening socket with address reuse enabled and a backlog of
/// `backlog`, per spec.md §4.H ("address reuse enabled", "backlog up to
/// `MAX_CONNECTIONS`").  `TcpListener::bind` alone offers neither: it takes
/// neither an `SO_REUSEADDR` option nor a backlog argument, so the socket has
/// to be built up manually through `TcpSocket`.
fn bind_listener(addr: &str, backlog: usize) -> std::io::Result<TcpListener> {
    let addr: std::net::SocketAddr = addr
        .parse()
        .unwrap_or_else(|e| panic!("invalid bind address {addr}: {e}"));
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(u32::try_from(backlog).unwrap_or(u32::MAX))
}

/// Same as [`run`], but against an already-bound listener — lets tests bind
/// to an ephemeral port before the server config is finalized.
pub async fn run_with_listener(
    config: Config,
    pool: SqlitePool,
    listener: TcpListener,
    shutdown_signal: impl std::future::Future<Output = ()>,
) {
    let registry: SharedRegistry = Arc::new(tokio::sync::RwLock::new(state::Registry::default()));
    let (dispatch_tx, dispatch_rx) = dispatch::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = Arc::new(ServerContext {
        pool: pool.clone(),
        registry: registry.clone(),
        dispatch_tx,
        config: config.clone(),
        client_ids: ClientIdAllocator::default(),
    });

    let dispatch_handle = tokio::spawn(dispatch::run(pool, registry.clone(), dispatch_rx, shutdown_rx.clone()));
    let liveness_handle = tokio::spawn(liveness::run(
        registry,
        config.ping_interval,
        config.ping_timeout,
        shutdown_rx.clone(),
    ));
    let acceptor_handle = tokio::spawn(acceptor::run(listener, ctx, shutdown_rx));

    shutdown_signal.await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = acceptor_handle.await;
    let _ = liveness_handle.await;
    let _ = dispatch_handle.await;
    info!("server shut down gracefully");
}
