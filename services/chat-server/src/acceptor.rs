//! Acceptor: the server's accept loop, bounding concurrently-handled
//! connections with a semaphore.
//!
//! Grounded on `local_fanout.rs::FanoutServer::run`'s accept loop, the
//! donor's one raw-TCP (non-HTTP) accept loop, generalized from unbounded
//! fan-out to a capped worker pool — the async analogue of the reference
//! implementation's fixed-size `ThreadPoolExecutor`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::connection::handle_connection;
use crate::ServerContext;

pub async fn run(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(ctx.config.worker_pool_size));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "new connection");
                        let ctx = ctx.clone();
                        let permits = permits.clone();
                        tokio::spawn(async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            handle_connection(stream, peer, ctx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("acceptor shutting down");
                    break;
                }
            }
        }
    }
}
