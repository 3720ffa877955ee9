//! TCP server: listener, accept loop, and lifecycle.
//!
//! [`Server::bind`] owns the whole wiring step: it binds the listener,
//! builds the store and dispatcher, and starts the expiry sweeper. After
//! that [`Server::run`] accepts connections until [`Server::shutdown`]
//! flips the watch channel. Shutdown is soft: the accept loop and sweeper
//! stop, while sessions already in flight run to completion against a
//! store that stays fully usable.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::command::Dispatcher;
use crate::session::{self, ConnectionStats};
use crate::storage::{Store, Sweeper};
use crate::DEFAULT_HOST;

pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConnectionStats>,
    sweeper: Sweeper,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Binds the listener on [`DEFAULT_HOST`] and starts the expiry sweeper.
    ///
    /// Port 0 binds an ephemeral port; the effective address is available
    /// through [`Server::local_addr`].
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((DEFAULT_HOST, port))
            .await
            .with_context(|| format!("failed to bind {}:{}", DEFAULT_HOST, port))?;
        let addr = listener
            .local_addr()
            .context("failed to read local address")?;

        let store = Arc::new(Store::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store)));
        let stats = Arc::new(ConnectionStats::new());
        let sweeper = Sweeper::start(Arc::clone(&store));
        let (shutdown_tx, _) = watch::channel(false);

        info!("Listening on {}", addr);
        Ok(Server {
            listener,
            addr,
            store,
            dispatcher,
            stats,
            sweeper,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Number of live keys currently stored.
    pub fn current_size(&self) -> usize {
        self.store.len()
    }

    /// Accepts connections until [`Server::shutdown`] is called.
    ///
    /// Every accepted socket is served on its own task. Accept failures are
    /// logged and the loop keeps going.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return;
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(session::serve(
                                stream,
                                peer,
                                Arc::clone(&self.dispatcher),
                                Arc::clone(&self.stats),
                            ));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Accept loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Stops the accept loop and the expiry sweeper. Idempotent.
    ///
    /// Sessions in flight are not interrupted and the store stays usable
    /// until the server itself is dropped.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.sweeper.stop();
    }
}
