pub mod aggregate;
pub mod distinct;
pub mod executor;
pub mod expr_eval;
pub mod filter;
pub mod generator;
pub mod hash_join;
pub mod join;
pub mod limit;
pub mod modify;
pub mod order_by;
pub mod print;
pub mod project;
pub mod scan;

use std::sync::Arc;

use crate::{
    catalog::db::{Database, PkGenerator},
    error::WrenError,
    optimizer::{CostBasedOptimizer, LogicalOptimizer},
    plan::PlanNode,
    storage::{table_storage::TableStorage, tuple::Row},
    transaction::{LockManager, Txn, TxnManager},
    types::Pod,
};

pub use executor::{BoxedExecutor, Executor};
pub use generator::generate_executor;

/// Everything an executor needs to touch the engine: the storage, the
/// transaction it runs under, and the lock manager.
#[derive(Clone)]
pub struct ExecContext {
    pub storage: Pod<TableStorage>,
    pub txn_manager: Arc<TxnManager>,
    pub txn: Arc<Txn>,
    pub pk_gen: Arc<PkGenerator>,
}

impl ExecContext {
    pub fn lock_manager(&self) -> &LockManager {
        self.txn_manager.lock_manager()
    }

    /// Take a table lock unless an already-held mode covers it. A
    /// statement's operators layer locks (IS from a scan, IX from the
    /// modify above it), and the lock manager itself rejects weaker
    /// re-requests.
    pub fn lock_table_at_least(
        &self,
        table: &str,
        mode: crate::transaction::LockMode,
    ) -> Result<(), WrenError> {
        if let Some(held) = self.txn.held_table_mode(table) {
            if crate::transaction::lock_manager::covers(held, mode) {
                return Ok(());
            }
        }
        self.lock_manager().acquire_table_lock(table, mode, &self.txn)
    }

    pub fn lock_tuple_at_least(
        &self,
        table: &str,
        key: &[u8],
        mode: crate::transaction::LockMode,
    ) -> Result<(), WrenError> {
        if let Some(held) = self.txn.held_tuple_mode(table, key) {
            if crate::transaction::lock_manager::covers(held, mode) {
                return Ok(());
            }
        }
        self.lock_manager()
            .acquire_tuple_lock(table, key, mode, &self.txn)
    }
}

impl Database {
    pub fn exec_context(&self, txn: &Arc<Txn>) -> ExecContext {
        ExecContext {
            storage: Arc::clone(self.storage()),
            txn_manager: Arc::clone(self.txn_manager()),
            txn: Arc::clone(txn),
            pk_gen: Arc::clone(self.pk_generator()),
        }
    }

    /// Rewrite the plan with the logical rules, then reorder its joins
    /// with the cost-based optimizer.
    pub fn optimize(&self, plan: PlanNode) -> PlanNode {
        let plan = LogicalOptimizer::optimize(plan, self);
        CostBasedOptimizer::optimize(plan, self)
    }

    /// Optimize and run a plan under the given transaction, collecting
    /// every output row.
    pub fn execute(&self, plan: &PlanNode, txn: &Arc<Txn>) -> Result<Vec<Row>, WrenError> {
        let optimized = self.optimize(plan.clone());
        self.run_plan(&optimized, txn)
    }

    /// Run a plan as-is, without optimization.
    pub fn run_plan(&self, plan: &PlanNode, txn: &Arc<Txn>) -> Result<Vec<Row>, WrenError> {
        let mut exe = generate_executor(plan, &self.exec_context(txn))?;
        exe.init()?;
        let mut rows = Vec::new();
        while let Some(row) = exe.next()? {
            rows.push(row);
        }
        Ok(rows)
    }
}
