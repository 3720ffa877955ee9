//! Background expiry sweeper.
//!
//! Read paths already hide and reclaim expired entries, but a key that is
//! written with a TTL and then never touched again would otherwise sit in
//! memory forever. The sweeper owns that case: it sleeps until the soonest
//! recorded deadline, then purges whatever has come due before sleeping
//! again. A write that arms an earlier deadline wakes it up through the
//! store's waker, so the task never oversleeps a fresh short TTL.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use super::store::Store;

/// Handle to the background sweep task.
///
/// Dropping the handle stops the task, so whoever owns the `Store` keeps
/// this alongside it.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Spawns the sweep task for `store` and returns its handle.
    pub fn start(store: Arc<Store>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run(store, shutdown_rx));
        info!("Expiry sweeper started");
        Sweeper { shutdown_tx }
    }

    /// Signals the sweep task to exit. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(store: Arc<Store>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let (removed, next) = store.purge_due(Instant::now());
        if removed > 0 {
            debug!(removed, "Swept expired keys");
        }

        tokio::select! {
            _ = wait_for_deadline(next) => {}
            _ = store.expiry_waker().notified() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("Expiry sweeper stopped");
                    return;
                }
            }
        }
    }
}

/// Sleeps until `deadline`, or forever when no deadline is pending.
async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(when) => time::sleep_until(when).await,
        None => std::future::pending::<()>().await,
    }
}
