use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::{eval_all, BoundExpr},
    },
    storage::tuple::Row,
};

/// Nested-loop join: for every left row the right side is re-initialized
/// and scanned in full; pairs satisfying the predicate are emitted.
pub struct JoinExecutor {
    left: BoxedExecutor,
    right: BoxedExecutor,
    // Bound over the concatenated (left ++ right) schema.
    predicate: Vec<BoundExpr>,
    cur_left: Option<Row>,
    fresh: bool,
    rows_out: u64,
}

impl JoinExecutor {
    pub fn new(
        left: BoxedExecutor,
        right: BoxedExecutor,
        predicate: Vec<BoundExpr>,
    ) -> JoinExecutor {
        JoinExecutor {
            left,
            right,
            predicate,
            cur_left: None,
            fresh: true,
            rows_out: 0,
        }
    }
}

impl Executor for JoinExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.left.init()?;
        self.right.init()?;
        self.cur_left = None;
        self.fresh = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.fresh {
            self.cur_left = self.left.next()?;
            self.fresh = false;
        }
        loop {
            let left_row = match &self.cur_left {
                Some(row) => row,
                None => return Ok(None),
            };
            match self.right.next()? {
                Some(right_row) => {
                    let mut combined = left_row.clone();
                    combined.extend(right_row);
                    if eval_all(&self.predicate, &combined)? {
                        self.rows_out += 1;
                        return Ok(Some(combined));
                    }
                }
                None => {
                    self.cur_left = self.left.next()?;
                    if self.cur_left.is_some() {
                        self.right.init()?;
                    }
                }
            }
        }
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
