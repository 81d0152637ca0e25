// Scheduled whole-table refresh.
//
// Each table gets its own loop: sleep for the interval, refresh, repeat.
// A failed refresh is logged and the loop keeps its schedule. The loop only
// ends when the shared shutdown signal fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CacheError, Table, TableCache};
use crate::remote::RemoteTable;

/// Something that can be refreshed wholesale.
pub trait Refresh: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Returns the number of records in the new snapshot.
    fn refresh(&self) -> impl Future<Output = Result<usize, CacheError>> + Send;
}

impl<T: Table, R: RemoteTable> Refresh for TableCache<T, R> {
    fn name(&self) -> &str {
        self.table().name()
    }

    fn refresh(&self) -> impl Future<Output = Result<usize, CacheError>> + Send {
        TableCache::refresh(self)
    }
}

pub fn spawn_refresh_loop<C: Refresh>(
    cache: Arc<C>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(refresh_loop(cache, interval, shutdown_rx))
}

pub async fn refresh_loop<C: Refresh>(
    cache: Arc<C>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                debug!(table = %cache.name(), "refresh loop shutting down");
                break;
            }
        }

        if let Err(e) = cache.refresh().await {
            warn!(table = %cache.name(), error = %e, "scheduled refresh failed");
        }
    }
}
