use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use log::debug;

use crate::{
    error::WrenError,
    storage::table_storage::TableStorage,
    transaction::{
        lock_manager::LockManager,
        txn::{ModifyType, Txn, TxnId, TxnState},
    },
    types::Pod,
    utils::HandyRwLock,
};

/// Transaction lifecycle: begin / commit / abort. Commit and abort are
/// the only places locks are released; abort additionally replays the
/// undo stack against storage before letting the locks go.
pub struct TxnManager {
    txn_table: RwLock<HashMap<TxnId, Arc<Txn>>>,
    next_txn_id: AtomicU64,
    lock_manager: LockManager,
    storage: Pod<TableStorage>,
}

impl TxnManager {
    pub fn new(storage: Pod<TableStorage>) -> TxnManager {
        TxnManager {
            txn_table: RwLock::new(HashMap::new()),
            next_txn_id: AtomicU64::new(0),
            lock_manager: LockManager::new(),
            storage,
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn begin(&self) -> Arc<Txn> {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let txn = Arc::new(Txn::new(id));
        self.txn_table.wl().insert(id, Arc::clone(&txn));
        debug!("{} begins", txn);
        txn
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Txn>> {
        self.txn_table.rl().get(&txn_id).cloned()
    }

    pub fn commit(&self, txn: &Arc<Txn>) {
        txn.set_state(TxnState::Committed);
        self.lock_manager.release_all(txn);
        debug!("{} committed", txn);
    }

    /// Replay the undo stack top-down, then release every lock.
    pub fn abort(&self, txn: &Arc<Txn>) -> Result<(), WrenError> {
        {
            let mut storage = self.storage.wl();
            while let Some(record) = txn.pop_modify() {
                match record.modify_type {
                    ModifyType::Insert => {
                        storage.delete(&record.table_name, &record.key)?;
                    }
                    ModifyType::Delete => {
                        storage.insert(
                            &record.table_name,
                            &record.key,
                            record.old_value.as_ref().expect("delete record without value"),
                        )?;
                    }
                    ModifyType::Update => {
                        storage.update(
                            &record.table_name,
                            &record.key,
                            record.old_value.as_ref().expect("update record without value"),
                        )?;
                    }
                }
            }
        }
        txn.set_state(TxnState::Aborted);
        self.lock_manager.release_all(txn);
        debug!("{} aborted", txn);
        Ok(())
    }

    /// Abort every transaction that is still in flight. Called when the
    /// database closes.
    pub fn abort_active(&self) -> Result<(), WrenError> {
        let active: Vec<Arc<Txn>> = self
            .txn_table
            .rl()
            .values()
            .filter(|t| matches!(t.state(), TxnState::Growing | TxnState::Shrinking))
            .cloned()
            .collect();
        for txn in active {
            self.abort(&txn)?;
        }
        Ok(())
    }
}
