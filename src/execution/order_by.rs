use std::cmp::Ordering;

use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::BoundExpr,
    },
    storage::tuple::{Cell, Row},
};

/// Materialize, sort by the key expressions and directions, emit. The
/// sort is stable, so ties keep their input order.
pub struct OrderByExecutor {
    child: BoxedExecutor,
    // (key expression, ascending?)
    keys: Vec<(BoundExpr, bool)>,
    rows: Vec<Row>,
    idx: usize,
    rows_out: u64,
}

impl OrderByExecutor {
    pub fn new(child: BoxedExecutor, keys: Vec<(BoundExpr, bool)>) -> OrderByExecutor {
        OrderByExecutor {
            child,
            keys,
            rows: Vec::new(),
            idx: 0,
            rows_out: 0,
        }
    }
}

impl Executor for OrderByExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.child.init()?;
        self.rows.clear();
        self.idx = 0;

        let mut decorated: Vec<(Vec<Cell>, Row)> = Vec::new();
        while let Some(row) = self.child.next()? {
            let mut key = Vec::with_capacity(self.keys.len());
            for (e, _) in &self.keys {
                key.push(e.eval(&row)?);
            }
            decorated.push((key, row));
        }
        let dirs: Vec<bool> = self.keys.iter().map(|(_, asc)| *asc).collect();
        decorated.sort_by(|(a, _), (b, _)| {
            for ((x, y), asc) in a.iter().zip(b.iter()).zip(dirs.iter()) {
                let ord = x.partial_cmp(y).unwrap_or(Ordering::Equal);
                let ord = if *asc { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        self.rows = decorated.into_iter().map(|(_, row)| row).collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.idx >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.idx].clone();
        self.idx += 1;
        self.rows_out += 1;
        Ok(Some(row))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
