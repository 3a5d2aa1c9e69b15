//! Background sweep of expired slot leases.
//!
//! Expired leases already read as available everywhere, so the reaper is not
//! needed for correctness. It only resets the stored columns.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::BookingConfig;
use crate::error::StoreError;
use crate::lease::LeaseManager;
use crate::store::BookingStore;

/// Statistics from the reaper thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReaperStats {
    pub runs: usize,
    pub leases_released: usize,
    pub failures: usize,
}

/// One sweep: a single bulk conditional update at the store's now.
pub fn reap_expired_leases<S: BookingStore>(
    store: &S,
    leases: &LeaseManager,
) -> Result<usize, StoreError> {
    store.transaction(|tx| leases.release_expired(tx))
}

/// A background thread that periodically releases expired leases.
///
/// ## Example
///
/// ```ignore
/// use slot_booking::{BookingConfig, InMemoryBookingStore, ReaperThread};
///
/// let store = InMemoryBookingStore::new();
/// let reaper = ReaperThread::from_config(store.clone(), &BookingConfig::default());
///
/// // ... serve requests ...
///
/// let stats = reaper.stop();
/// println!("released {} leases", stats.leases_released);
/// ```
pub struct ReaperThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ReaperStats>>,
}

impl ReaperThread {
    /// Spawn the reaper. The first sweep runs immediately.
    ///
    /// The store must be `Clone + Send + 'static`; in-memory and SQLite stores
    /// clone into another handle on the same tables.
    pub fn spawn<S>(store: S, leases: LeaseManager, interval: Duration) -> Self
    where
        S: BookingStore + Clone + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = ReaperStats::default();

            loop {
                stats.runs += 1;
                match reap_expired_leases(&store, &leases) {
                    Ok(0) => debug!("no expired leases"),
                    Ok(released) => {
                        stats.leases_released += released;
                        info!(released, "expired leases released");
                    }
                    Err(err) => {
                        stats.failures += 1;
                        error!(error = %err, "lease reaper run failed");
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Spawn the reaper with the lease policy and sweep interval from `config`.
    pub fn from_config<S>(store: S, config: &BookingConfig) -> Self
    where
        S: BookingStore + Clone + 'static,
    {
        Self::spawn(
            store,
            LeaseManager::from_config(config),
            config.reaper_interval(),
        )
    }

    /// Signal the reaper to stop and wait for it to finish.
    /// Returns the reaper statistics, or empty ones if the thread panicked.
    pub fn stop(mut self) -> ReaperStats {
        let _ = self.stop_tx.send(());
        let Some(handle) = self.handle.take() else {
            return ReaperStats::default();
        };
        match handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("lease reaper thread panicked");
                ReaperStats::default()
            }
        }
    }

    /// Signal the reaper to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ReaperThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
