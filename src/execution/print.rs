use crate::{
    error::WrenError,
    execution::executor::Executor,
    storage::tuple::Row,
};

/// Emits a literal list of rows (the VALUES of an INSERT).
pub struct PrintExecutor {
    values: Vec<Row>,
    idx: usize,
    rows_out: u64,
}

impl PrintExecutor {
    pub fn new(values: Vec<Row>) -> PrintExecutor {
        PrintExecutor {
            values,
            idx: 0,
            rows_out: 0,
        }
    }
}

impl Executor for PrintExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.idx = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.idx >= self.values.len() {
            return Ok(None);
        }
        let row = self.values[self.idx].clone();
        self.idx += 1;
        self.rows_out += 1;
        Ok(Some(row))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
