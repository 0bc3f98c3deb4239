//! Peer listener: accept loop plus a bounded pool of connection workers.
//!
//! A permit is taken from the pool before each accept, so no more than
//! `max_concurrency` connections are ever in flight; the rest wait in the
//! kernel backlog.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatcher, ServeSettings};
use crate::store::ChunkStore;

pub struct PeerListener;

impl PeerListener {
    /// Bind `addr` and start serving.
    pub async fn start(addr: SocketAddr, settings: ServeSettings, store: ChunkStore) -> Result<ListenerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind peer listener on {addr}"))?;
        Self::spawn(listener, settings, store)
    }

    /// Bind `ip:port`, or an OS-assigned port on `ip` if that one is taken.
    pub async fn bind_with_fallback(ip: IpAddr, port: u16) -> io::Result<TcpListener> {
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => Ok(listener),
            Err(e) if port != 0 => {
                tracing::warn!(port, error = %e, "preferred port unavailable, using any free port");
                TcpListener::bind(SocketAddr::new(ip, 0)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Serve an already bound socket.
    pub fn spawn(listener: TcpListener, settings: ServeSettings, store: ChunkStore) -> Result<ListenerHandle> {
        let local_addr = listener.local_addr().context("listener has no local address")?;
        let workers = settings.max_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let drain_timeout = settings.drain_timeout;
        let (shutdown, shutdown_rx) = broadcast::channel::<()>(1);
        let dispatcher = Arc::new(Dispatcher::new(store, settings));

        let task = tokio::spawn(accept_loop(listener, dispatcher, permits.clone(), shutdown_rx));
        tracing::info!(addr = %local_addr, workers, "peer listener started");

        Ok(ListenerHandle {
            local_addr,
            shutdown,
            permits,
            workers,
            drain_timeout,
            task,
        })
    }
}

/// A running listener. Dropping it without `stop` also shuts the accept loop
/// down, but does not wait for in-flight connections.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    permits: Arc<Semaphore>,
    workers: usize,
    drain_timeout: Duration,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, then wait up to the drain timeout for in-flight
    /// connections. Returns `false` if some were still running at the deadline.
    pub async fn stop(self) -> bool {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "accept loop panicked");
        }

        let drained = tokio::time::timeout(
            self.drain_timeout,
            self.permits.acquire_many(self.workers as u32),
        )
        .await
        .is_ok();

        if drained {
            tracing::info!(addr = %self.local_addr, "peer listener stopped");
        } else {
            tracing::warn!(
                addr = %self.local_addr,
                in_flight = self.workers - self.permits.available_permits(),
                "peer listener stopped with connections still in flight"
            );
        }
        drained
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.recv() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.serve(stream, peer).await;
            drop(permit);
        });
    }
    tracing::debug!("accept loop exited");
}
