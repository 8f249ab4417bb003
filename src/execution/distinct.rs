use std::collections::HashSet;

use crate::{
    error::WrenError,
    execution::executor::{BoxedExecutor, Executor},
    storage::tuple::Row,
};

/// Hash-dedup over the full row.
pub struct DistinctExecutor {
    child: BoxedExecutor,
    seen: HashSet<Vec<u8>>,
    rows_out: u64,
}

impl DistinctExecutor {
    pub fn new(child: BoxedExecutor) -> DistinctExecutor {
        DistinctExecutor {
            child,
            seen: HashSet::new(),
            rows_out: 0,
        }
    }
}

impl Executor for DistinctExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.seen.clear();
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        while let Some(row) = self.child.next()? {
            let mut key = Vec::new();
            for cell in &row {
                cell.hash_bytes(&mut key);
            }
            if self.seen.insert(key) {
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
