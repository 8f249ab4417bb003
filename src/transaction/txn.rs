use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Mutex,
};

use crate::transaction::lock_manager::LockMode;

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyType {
    Insert,
    Delete,
    Update,
}

/// One entry of a transaction's undo stack. `old_value` is empty for
/// inserts.
#[derive(Debug, Clone)]
pub struct ModifyRecord {
    pub modify_type: ModifyType,
    pub table_name: String,
    pub key: Vec<u8>,
    pub old_value: Option<Vec<u8>>,
}

/// A transaction: its state, the locks it has acquired (not the ones
/// still waiting in a queue), and the undo stack for rollback.
///
/// Transaction ids are assigned monotonically; a smaller id means an
/// older transaction, which is what wait-die compares.
pub struct Txn {
    id: TxnId,
    inner: Mutex<TxnInner>,
}

struct TxnInner {
    state: TxnState,
    table_locks: HashMap<LockMode, HashSet<String>>,
    tuple_locks: HashMap<LockMode, HashMap<String, HashSet<Vec<u8>>>>,
    modify_records: Vec<ModifyRecord>,
}

impl Txn {
    pub(crate) fn new(id: TxnId) -> Txn {
        Txn {
            id,
            inner: Mutex::new(TxnInner {
                state: TxnState::Growing,
                table_locks: HashMap::new(),
                tuple_locks: HashMap::new(),
                modify_records: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_state(&self, state: TxnState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Move a growing transaction into the shrinking phase. No effect on
    /// committed/aborted transactions.
    pub(crate) fn start_shrinking(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TxnState::Growing {
            inner.state = TxnState::Shrinking;
        }
    }

    pub fn held_table_mode(&self, table: &str) -> Option<LockMode> {
        let inner = self.inner.lock().unwrap();
        for (mode, tables) in inner.table_locks.iter() {
            if tables.contains(table) {
                return Some(*mode);
            }
        }
        None
    }

    pub fn held_tuple_mode(&self, table: &str, key: &[u8]) -> Option<LockMode> {
        let inner = self.inner.lock().unwrap();
        for (mode, tables) in inner.tuple_locks.iter() {
            if let Some(keys) = tables.get(table) {
                if keys.contains(key) {
                    return Some(*mode);
                }
            }
        }
        None
    }

    pub(crate) fn add_table_lock(&self, mode: LockMode, table: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .table_locks
            .entry(mode)
            .or_insert_with(HashSet::new)
            .insert(table.to_string());
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, table: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tables) = inner.table_locks.get_mut(&mode) {
            tables.remove(table);
        }
    }

    pub(crate) fn add_tuple_lock(&self, mode: LockMode, table: &str, key: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tuple_locks
            .entry(mode)
            .or_insert_with(HashMap::new)
            .entry(table.to_string())
            .or_insert_with(HashSet::new)
            .insert(key.to_vec());
    }

    pub(crate) fn remove_tuple_lock(&self, mode: LockMode, table: &str, key: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tables) = inner.tuple_locks.get_mut(&mode) {
            if let Some(keys) = tables.get_mut(table) {
                keys.remove(key);
            }
        }
    }

    pub(crate) fn table_locks_snapshot(&self) -> Vec<(LockMode, String)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for (mode, tables) in inner.table_locks.iter() {
            for table in tables {
                out.push((*mode, table.clone()));
            }
        }
        out
    }

    pub(crate) fn tuple_locks_snapshot(&self) -> Vec<(LockMode, String, Vec<u8>)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for (mode, tables) in inner.tuple_locks.iter() {
            for (table, keys) in tables {
                for key in keys {
                    out.push((*mode, table.clone(), key.clone()));
                }
            }
        }
        out
    }

    /// Push an undo record. Executors call this before applying the
    /// change to storage.
    pub fn push_modify(&self, record: ModifyRecord) {
        self.inner.lock().unwrap().modify_records.push(record);
    }

    pub(crate) fn pop_modify(&self) -> Option<ModifyRecord> {
        self.inner.lock().unwrap().modify_records.pop()
    }
}

impl fmt::Display for Txn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "txn_{}", self.id)
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
