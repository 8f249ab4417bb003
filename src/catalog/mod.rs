pub mod db;
pub mod stat;

pub use db::{ColumnDef, Database, DbOptions};
pub use stat::{CountMinSketch, HyperLL, TableStatistics};
