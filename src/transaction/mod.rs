pub mod lock_manager;
pub mod txn;
pub mod txn_manager;

pub use lock_manager::{LockManager, LockMode};
pub use txn::{ModifyRecord, ModifyType, Txn, TxnId, TxnState};
pub use txn_manager::TxnManager;
