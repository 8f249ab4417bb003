use crate::{error::WrenError, storage::tuple::Row};

/// The pull-based operator contract. `init` is idempotent and
/// pre-positions any cursors (a second call rewinds the operator);
/// `next` produces one row at a time until `None`.
pub trait Executor {
    fn init(&mut self) -> Result<(), WrenError>;
    fn next(&mut self) -> Result<Option<Row>, WrenError>;
    /// Number of rows this operator has emitted.
    fn total_output_size(&self) -> u64;
}

pub type BoxedExecutor = Box<dyn Executor>;
