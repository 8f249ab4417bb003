pub mod cardinality;
pub mod cost_based;
pub mod logical;
pub mod rules;

pub use cost_based::CostBasedOptimizer;
pub use logical::LogicalOptimizer;

/// Knobs of the cost-based optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub scan_cost: f64,
    pub hash_join_cost: f64,
    /// Test-only: entries of `(table name set, true cardinality)` that
    /// override the estimated cardinality of the matching join subset.
    pub true_cardinality_hints: Option<Vec<(Vec<String>, f64)>>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            scan_cost: 0.001,
            hash_join_cost: 0.01,
            true_cardinality_hints: None,
        }
    }
}
