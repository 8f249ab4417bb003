use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::BoundExpr,
    },
    storage::tuple::Row,
};

/// Re-evaluates expressions into a new output schema.
pub struct ProjectExecutor {
    child: BoxedExecutor,
    exprs: Vec<BoundExpr>,
    rows_out: u64,
}

impl ProjectExecutor {
    pub fn new(child: BoxedExecutor, exprs: Vec<BoundExpr>) -> ProjectExecutor {
        ProjectExecutor {
            child,
            exprs,
            rows_out: 0,
        }
    }
}

impl Executor for ProjectExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        let row = match self.child.next()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let mut out = Vec::with_capacity(self.exprs.len());
        for e in &self.exprs {
            out.push(e.eval(&row)?);
        }
        self.rows_out += 1;
        Ok(Some(out))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
