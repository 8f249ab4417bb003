pub mod convert_to_hash_join;
pub mod derive_range_scan;
pub mod push_down_filter;
pub mod push_down_join_predicate;

pub use convert_to_hash_join::ConvertToHashJoinRule;
pub use derive_range_scan::DeriveRangeScanRule;
pub use push_down_filter::PushDownFilterRule;
pub use push_down_join_predicate::PushDownJoinPredicateRule;

use crate::plan::PlanNode;

/// A tree-rewrite rule applied to fixpoint by the logical optimizer.
pub trait OptRule {
    /// Whether the rule applies at this node.
    fn matches(&self, node: &PlanNode) -> bool;
    /// Rewrite the node. Only called when `matches` returned true.
    fn transform(&self, node: PlanNode) -> PlanNode;
}
