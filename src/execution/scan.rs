//! Table scans. A sequential scan takes an IS lock on its table at init
//! and an S lock on every tuple it returns; the range scan behaves the
//! same over a bounded cursor.

use crate::{
    error::WrenError,
    execution::{
        executor::Executor,
        expr_eval::{eval_all, BoundExpr},
        ExecContext,
    },
    storage::{
        schema::TableSchema,
        table_storage::{RangeBound, TableIterator},
        tuple::{decode_row, Row},
    },
    transaction::LockMode,
    utils::HandyRwLock,
};

pub struct SeqScanExecutor {
    ctx: ExecContext,
    table_name: String,
    schema: TableSchema,
    predicate: Vec<BoundExpr>,
    iter: Option<TableIterator>,
    rows_out: u64,
}

impl SeqScanExecutor {
    pub fn new(
        ctx: ExecContext,
        table_name: &str,
        schema: TableSchema,
        predicate: Vec<BoundExpr>,
    ) -> SeqScanExecutor {
        SeqScanExecutor {
            ctx,
            table_name: table_name.to_string(),
            schema,
            predicate,
            iter: None,
            rows_out: 0,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.ctx.lock_table_at_least(&self.table_name, LockMode::IS)?;
        self.iter = Some(self.ctx.storage.wl().get_iterator(&self.table_name)?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| WrenError::invalid_behavior("scan used before init"))?;
        loop {
            let (key, bytes) = match iter.next() {
                Some(kv) => kv,
                None => return Ok(None),
            };
            let row = decode_row(&self.schema, &bytes)?;
            if !eval_all(&self.predicate, &row)? {
                continue;
            }
            self.ctx.lock_tuple_at_least(&self.table_name, &key, LockMode::S)?;
            // The bytes above were read before the lock was granted; a
            // writer may have committed in between. Re-read under the
            // lock and re-check the predicate.
            let bytes = match self.ctx.storage.wl().search(&self.table_name, &key)? {
                Some(bytes) => bytes,
                None => continue,
            };
            let row = decode_row(&self.schema, &bytes)?;
            if !eval_all(&self.predicate, &row)? {
                continue;
            }
            self.rows_out += 1;
            return Ok(Some(row));
        }
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}

pub struct RangeScanExecutor {
    ctx: ExecContext,
    table_name: String,
    schema: TableSchema,
    left: RangeBound,
    right: RangeBound,
    predicate: Vec<BoundExpr>,
    iter: Option<TableIterator>,
    rows_out: u64,
}

impl RangeScanExecutor {
    pub fn new(
        ctx: ExecContext,
        table_name: &str,
        schema: TableSchema,
        left: RangeBound,
        right: RangeBound,
        predicate: Vec<BoundExpr>,
    ) -> RangeScanExecutor {
        RangeScanExecutor {
            ctx,
            table_name: table_name.to_string(),
            schema,
            left,
            right,
            predicate,
            iter: None,
            rows_out: 0,
        }
    }
}

impl Executor for RangeScanExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.ctx.lock_table_at_least(&self.table_name, LockMode::IS)?;
        self.iter = Some(self.ctx.storage.wl().get_range_iterator(
            &self.table_name,
            self.left.clone(),
            self.right.clone(),
        )?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| WrenError::invalid_behavior("scan used before init"))?;
        loop {
            let (key, bytes) = match iter.next() {
                Some(kv) => kv,
                None => return Ok(None),
            };
            let row = decode_row(&self.schema, &bytes)?;
            if !eval_all(&self.predicate, &row)? {
                continue;
            }
            self.ctx.lock_tuple_at_least(&self.table_name, &key, LockMode::S)?;
            // The bytes above were read before the lock was granted; a
            // writer may have committed in between. Re-read under the
            // lock and re-check the predicate.
            let bytes = match self.ctx.storage.wl().search(&self.table_name, &key)? {
                Some(bytes) => bytes,
                None => continue,
            };
            let row = decode_row(&self.schema, &bytes)?;
            if !eval_all(&self.predicate, &row)? {
                continue;
            }
            self.rows_out += 1;
            return Ok(Some(row));
        }
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
