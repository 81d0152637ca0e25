// Write/refresh exclusion for one table.
//
// Writes hold the shared side of a reader/writer gate, a refresh holds the
// exclusive side. tokio's RwLock queues fairly, so once a refresh is waiting
// no new write gets in ahead of it. Writes to the same uid are additionally
// serialized through a per-uid mutex taken before the gate, so queued writers
// for a busy uid never hold the gate while they wait.
//
// Contention is flow control: waiters are woken as soon as the lock is
// released. The retry interval only paces the "halted" log line.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

#[derive(Debug)]
pub struct WriteGuard {
    table: String,
    retry_interval: Duration,
    gate: Arc<RwLock<()>>,
    uid_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: Arc<StdMutex<BTreeSet<String>>>,
    refreshing: Arc<AtomicBool>,
}

impl WriteGuard {
    pub fn new(table: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            table: table.into(),
            retry_interval,
            gate: Arc::new(RwLock::new(())),
            uid_locks: StdMutex::new(HashMap::new()),
            in_flight: Arc::new(StdMutex::new(BTreeSet::new())),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Uids with a write currently holding the gate.
    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight.lock().expect("in-flight lock poisoned").iter().cloned().collect()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Wait until a write to `uid` may proceed.
    pub async fn write(&self, uid: &str) -> WritePermit {
        let uid_lock = self.uid_lock(uid);
        let uid_guard = match uid_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(table = %self.table, uid, "halted write, same uid already being written");
                self.wait_logged(uid_lock.lock_owned(), || {
                    info!(table = %self.table, uid, "halted write, same uid already being written");
                })
                .await
            }
        };

        let gate = match self.gate.clone().try_read_owned() {
            Ok(gate) => gate,
            Err(_) => {
                info!(table = %self.table, uid, "halted write during whole table refresh");
                self.wait_logged(self.gate.clone().read_owned(), || {
                    info!(table = %self.table, uid, "halted write during whole table refresh");
                })
                .await
            }
        };

        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        in_flight.insert(uid.to_string());
        debug!(table = %self.table, in_flight = ?*in_flight, "write started");
        drop(in_flight);

        WritePermit {
            uid: uid.to_string(),
            in_flight: self.in_flight.clone(),
            _gate: gate,
            _uid: uid_guard,
        }
    }

    /// Wait until every outstanding write has finished, then hold off new
    /// ones until the returned permit is dropped.
    pub async fn refresh(&self) -> RefreshPermit {
        let gate = match self.gate.clone().try_write_owned() {
            Ok(gate) => gate,
            Err(_) => {
                info!(table = %self.table, in_flight = ?self.in_flight(), "halted whole table refresh");
                self.wait_logged(self.gate.clone().write_owned(), || {
                    info!(table = %self.table, in_flight = ?self.in_flight(), "halted whole table refresh");
                })
                .await
            }
        };
        self.refreshing.store(true, Ordering::SeqCst);
        RefreshPermit { refreshing: self.refreshing.clone(), _gate: gate }
    }

    fn uid_lock(&self, uid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.uid_locks.lock().expect("uid lock map poisoned");
        // Entries only referenced by the map belong to finished writes.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(uid.to_string()).or_default().clone()
    }

    async fn wait_logged<F: Future>(&self, acquire: F, on_tick: impl Fn()) -> F::Output {
        tokio::pin!(acquire);
        loop {
            tokio::select! {
                out = &mut acquire => return out,
                _ = tokio::time::sleep(self.retry_interval) => on_tick(),
            }
        }
    }
}

/// Held for the duration of one remote write.
#[derive(Debug)]
pub struct WritePermit {
    uid: String,
    in_flight: Arc<StdMutex<BTreeSet<String>>>,
    _gate: OwnedRwLockReadGuard<()>,
    _uid: OwnedMutexGuard<()>,
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.uid);
        }
    }
}

/// Held for the duration of one refresh.
#[derive(Debug)]
pub struct RefreshPermit {
    refreshing: Arc<AtomicBool>,
    _gate: OwnedRwLockWriteGuard<()>,
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        self.refreshing.store(false, Ordering::SeqCst);
    }
}
