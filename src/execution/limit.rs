use crate::{
    error::WrenError,
    execution::executor::{BoxedExecutor, Executor},
    storage::tuple::Row,
};

/// Emits the rows in `[offset, offset + limit)`.
pub struct LimitExecutor {
    child: BoxedExecutor,
    limit: usize,
    offset: usize,
    seen: usize,
    rows_out: u64,
}

impl LimitExecutor {
    pub fn new(child: BoxedExecutor, limit: usize, offset: usize) -> LimitExecutor {
        LimitExecutor {
            child,
            limit,
            offset,
            seen: 0,
            rows_out: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.seen = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        while self.seen < self.offset {
            if self.child.next()?.is_none() {
                return Ok(None);
            }
            self.seen += 1;
        }
        if self.seen >= self.offset + self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.seen += 1;
                self.rows_out += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
