//! Table- and tuple-level locks with intention modes, FIFO queues, a
//! single upgrade slot per queue, and wait-die deadlock prevention.
//!
//! A request is granted iff every request ahead of it in its queue is
//! granted and its mode is compatible with all granted modes. When a
//! request would block, wait-die compares transaction ids against the
//! conflicting holders: the requester waits only if it is older (smaller
//! id) than all of them, otherwise it aborts with `DeadlockAbort`.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use log::debug;

use crate::{
    error::WrenError,
    transaction::txn::{Txn, TxnId, TxnState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IS,
    IX,
    S,
    SIX,
    X,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LockMode::IS => "IS",
            LockMode::IX => "IX",
            LockMode::S => "S",
            LockMode::SIX => "SIX",
            LockMode::X => "X",
        };
        write!(f, "{}", s)
    }
}

/// The compatibility matrix of multi-granularity locking.
pub fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IS, IS) | (IS, IX) | (IS, S) | (IS, SIX) => true,
        (IX, IS) | (IX, IX) => true,
        (S, IS) | (S, S) => true,
        (SIX, IS) => true,
        _ => false,
    }
}

/// Whether a held mode already grants everything the requested mode
/// would. Re-requesting a weaker mode is an error at the lock manager
/// boundary, so callers with composite statements check this first.
pub fn covers(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match held {
        X => true,
        SIX => matches!(requested, IS | IX | S | SIX),
        S => matches!(requested, IS | S),
        IX => matches!(requested, IS | IX),
        IS => requested == IS,
    }
}

// The upgrade lattice: IS < {IX, S} < SIX < X. IX and S are
// incomparable, so IX->S and S->IX are invalid (S while holding IX must
// be requested as SIX).
fn upgradable(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IS, IX) | (IS, S) | (IS, SIX) | (IS, X) => true,
        (IX, SIX) | (IX, X) => true,
        (S, SIX) | (S, X) => true,
        (SIX, X) => true,
        _ => false,
    }
}

// Table modes under which a tuple lock of the given mode may be taken.
fn table_mode_allows_tuple(table_mode: LockMode, tuple_mode: LockMode) -> bool {
    use LockMode::*;
    match tuple_mode {
        S => true, // any table lock works for a shared tuple lock
        X => matches!(table_mode, IX | SIX | X),
        _ => false,
    }
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueInner {
    queue: Vec<LockRequest>,
    // At most one transaction per queue may be upgrading.
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> LockRequestQueue {
        LockRequestQueue {
            inner: Mutex::new(QueueInner {
                queue: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

impl QueueInner {
    fn grantable(&self, txn_id: TxnId) -> bool {
        let pos = self
            .queue
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("request vanished from its queue");
        let mode = self.queue[pos].mode;
        for (i, r) in self.queue.iter().enumerate() {
            if r.txn_id == txn_id {
                continue;
            }
            if i < pos && !r.granted {
                return false;
            }
            if r.granted && !compatible(r.mode, mode) {
                return false;
            }
        }
        true
    }

    // Wait-die: the requester must abort if any conflicting holder is
    // older (has a smaller id).
    fn must_die(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.queue.iter().any(|r| {
            r.granted && r.txn_id != txn_id && !compatible(r.mode, mode) && r.txn_id < txn_id
        })
    }

    fn remove(&mut self, txn_id: TxnId) {
        self.queue.retain(|r| r.txn_id != txn_id);
    }

    // An upgrading request goes in front of every waiting request.
    fn insert_upgrade(&mut self, request: LockRequest) {
        let pos = self
            .queue
            .iter()
            .position(|r| !r.granted)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, request);
    }
}

type TableLockTable = HashMap<String, Arc<LockRequestQueue>>;
type TupleLockTable = HashMap<(String, Vec<u8>), Arc<LockRequestQueue>>;

pub struct LockManager {
    table_locks: Mutex<TableLockTable>,
    tuple_locks: Mutex<TupleLockTable>,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager {
            table_locks: Mutex::new(HashMap::new()),
            tuple_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire_table_lock(
        &self,
        table: &str,
        mode: LockMode,
        txn: &Arc<Txn>,
    ) -> Result<(), WrenError> {
        self.check_growing(txn)?;
        let held = txn.held_table_mode(table);
        if held == Some(mode) {
            return Ok(());
        }
        let queue = self.table_queue(table);
        self.acquire(&queue, mode, held, txn, || {
            txn.add_table_lock(mode, table);
            if let Some(held) = held {
                txn.remove_table_lock(held, table);
            }
        })?;
        debug!("{} acquired {} on table {}", txn, mode, table);
        Ok(())
    }

    pub fn acquire_tuple_lock(
        &self,
        table: &str,
        key: &[u8],
        mode: LockMode,
        txn: &Arc<Txn>,
    ) -> Result<(), WrenError> {
        self.check_growing(txn)?;
        if !matches!(mode, LockMode::S | LockMode::X) {
            return Err(WrenError::invalid_behavior(&format!(
                "intention lock {} is not valid on a tuple",
                mode
            )));
        }
        // Multi-granularity: the enclosing table must be locked in a
        // mode that covers the tuple lock.
        match txn.held_table_mode(table) {
            Some(table_mode) if table_mode_allows_tuple(table_mode, mode) => {}
            held => {
                return Err(WrenError::invalid_behavior(&format!(
                    "{} tuple lock on {} requires an appropriate table lock, held: {:?}",
                    mode, table, held
                )))
            }
        }
        let held = txn.held_tuple_mode(table, key);
        if held == Some(mode) {
            return Ok(());
        }
        let queue = self.tuple_queue(table, key);
        self.acquire(&queue, mode, held, txn, || {
            txn.add_tuple_lock(mode, table, key);
            if let Some(held) = held {
                txn.remove_tuple_lock(held, table, key);
            }
        })
    }

    pub fn release_table_lock(
        &self,
        table: &str,
        mode: LockMode,
        txn: &Arc<Txn>,
    ) -> Result<(), WrenError> {
        if txn.held_table_mode(table) != Some(mode) {
            return Err(WrenError::invalid_behavior(&format!(
                "releasing {} on table {} which is not held",
                mode, table
            )));
        }
        txn.remove_table_lock(mode, table);
        txn.start_shrinking();
        let queue = self.table_queue(table);
        let mut inner = queue.inner.lock().unwrap();
        inner.remove(txn.id());
        queue.cv.notify_all();
        Ok(())
    }

    pub fn release_tuple_lock(
        &self,
        table: &str,
        key: &[u8],
        mode: LockMode,
        txn: &Arc<Txn>,
    ) -> Result<(), WrenError> {
        if txn.held_tuple_mode(table, key) != Some(mode) {
            return Err(WrenError::invalid_behavior(&format!(
                "releasing {} on a tuple of {} which is not held",
                mode, table
            )));
        }
        txn.remove_tuple_lock(mode, table, key);
        txn.start_shrinking();
        let queue = self.tuple_queue(table, key);
        let mut inner = queue.inner.lock().unwrap();
        inner.remove(txn.id());
        queue.cv.notify_all();
        Ok(())
    }

    /// Release every lock the transaction holds: tuple locks first, then
    /// table locks. Used by commit and abort, which bypass the 2PL
    /// shrinking transition.
    pub fn release_all(&self, txn: &Arc<Txn>) {
        for (mode, table, key) in txn.tuple_locks_snapshot() {
            txn.remove_tuple_lock(mode, &table, &key);
            let queue = self.tuple_queue(&table, &key);
            let mut inner = queue.inner.lock().unwrap();
            inner.remove(txn.id());
            queue.cv.notify_all();
        }
        for (mode, table) in txn.table_locks_snapshot() {
            txn.remove_table_lock(mode, &table);
            let queue = self.table_queue(&table);
            let mut inner = queue.inner.lock().unwrap();
            inner.remove(txn.id());
            queue.cv.notify_all();
        }
    }

    fn check_growing(&self, txn: &Arc<Txn>) -> Result<(), WrenError> {
        match txn.state() {
            TxnState::Growing => Ok(()),
            TxnState::Shrinking => Err(WrenError::invalid_behavior(&format!(
                "{} violates 2PL: lock request while shrinking",
                txn
            ))),
            state => Err(WrenError::invalid_behavior(&format!(
                "{} requests a lock in state {:?}",
                txn, state
            ))),
        }
    }

    fn table_queue(&self, table: &str) -> Arc<LockRequestQueue> {
        let mut map = self.table_locks.lock().unwrap();
        map.entry(table.to_string())
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn tuple_queue(&self, table: &str, key: &[u8]) -> Arc<LockRequestQueue> {
        let mut map = self.tuple_locks.lock().unwrap();
        map.entry((table.to_string(), key.to_vec()))
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    // The common acquire path. `held` is the mode already held on this
    // target (an upgrade), `on_grant` records the grant in the txn's
    // lock sets.
    fn acquire(
        &self,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        held: Option<LockMode>,
        txn: &Arc<Txn>,
        on_grant: impl FnOnce(),
    ) -> Result<(), WrenError> {
        let txn_id = txn.id();
        let is_upgrade = held.is_some();
        let mut on_grant = Some(on_grant);
        let mut inner = queue.inner.lock().unwrap();

        if let Some(held_mode) = held {
            if !upgradable(held_mode, mode) {
                return Err(WrenError::invalid_behavior(&format!(
                    "{} cannot upgrade {} to {}",
                    txn, held_mode, mode
                )));
            }
            if inner.upgrading.is_some() {
                return Err(WrenError::multi_upgrade(&format!(
                    "{} upgrades while txn_{} is already upgrading",
                    txn,
                    inner.upgrading.unwrap()
                )));
            }
            inner.upgrading = Some(txn_id);
            // The old grant is given up; the upgrade request takes the
            // first position among the waiters.
            inner.remove(txn_id);
            inner.insert_upgrade(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        } else {
            inner.queue.push(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }

        loop {
            if inner.grantable(txn_id) {
                let req = inner
                    .queue
                    .iter_mut()
                    .find(|r| r.txn_id == txn_id)
                    .unwrap();
                req.granted = true;
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
                (on_grant.take().unwrap())();
                queue.cv.notify_all();
                return Ok(());
            }
            // Wait-die never kills an upgrader: the single upgrade slot
            // already rules out upgrade-against-upgrade deadlocks, and
            // the upgrader holds first claim on the queue.
            if !is_upgrade && inner.must_die(txn_id, mode) {
                inner.remove(txn_id);
                queue.cv.notify_all();
                return Err(WrenError::deadlock_abort(&format!(
                    "{} dies waiting for {}",
                    txn, mode
                )));
            }
            inner = queue.cv.wait(inner).unwrap();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
