pub mod bitset;
pub mod expr;
pub mod output_schema;
pub mod plan;
pub mod predicate;

pub use bitset::TableBitset;
pub use expr::{AggFunc, BinaryOp, Expr, RetType};
pub use output_schema::{OutputColumn, OutputSchema};
pub use plan::{PlanContent, PlanNode};
pub use predicate::{CondExpr, PredicateElement, PredicateVec};
