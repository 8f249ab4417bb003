use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::{eval_all, BoundExpr},
    },
    storage::tuple::Row,
};

/// Forwards the rows for which every conjunct evaluates true.
pub struct FilterExecutor {
    child: BoxedExecutor,
    predicate: Vec<BoundExpr>,
    rows_out: u64,
}

impl FilterExecutor {
    pub fn new(child: BoxedExecutor, predicate: Vec<BoundExpr>) -> FilterExecutor {
        FilterExecutor {
            child,
            predicate,
            rows_out: 0,
        }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        while let Some(row) = self.child.next()? {
            if eval_all(&self.predicate, &row)? {
                self.rows_out += 1;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
