//! Turn a nested-loop join with at least one cross-side equality into a
//! hash join.
//!
//! An equality conjunct whose operands cleanly partition across the two
//! subtrees becomes a pair of hash keys (the left subtree's expression
//! goes to the build keys). All such equalities are consumed; the
//! remaining conjuncts stay on the join as a residual predicate.

use crate::{
    optimizer::rules::OptRule,
    plan::{BinaryOp, Expr, PlanContent, PlanNode, PredicateElement, PredicateVec, TableBitset},
};

pub struct ConvertToHashJoinRule;

// Does this equality pair one left-subtree expression with one
// right-subtree expression? Returns the (left, right) orientation.
fn hash_key_pair<'a>(
    element: &'a PredicateElement,
    left: &TableBitset,
    right: &TableBitset,
) -> Option<(&'a Expr, &'a Expr)> {
    if element.expr.op != BinaryOp::Eq {
        return None;
    }
    // Either operand must reference at least one table, otherwise it is
    // a constant comparison, not a join key.
    if element.left_bits.is_empty() || element.right_bits.is_empty() {
        return None;
    }
    if element.check_left(left) && element.check_right(right) {
        return Some((&element.expr.left, &element.expr.right));
    }
    if element.check_left(right) && element.check_right(left) {
        return Some((&element.expr.right, &element.expr.left));
    }
    None
}

impl OptRule for ConvertToHashJoinRule {
    fn matches(&self, node: &PlanNode) -> bool {
        let predicate = match &node.content {
            PlanContent::Join { predicate } => predicate,
            _ => return false,
        };
        let left = &node.ch.as_ref().unwrap().table_bitset;
        let right = &node.ch2.as_ref().unwrap().table_bitset;
        predicate
            .elements()
            .iter()
            .any(|e| hash_key_pair(e, left, right).is_some())
    }

    fn transform(&self, mut node: PlanNode) -> PlanNode {
        let left_bits = node.ch.as_ref().unwrap().table_bitset.clone();
        let right_bits = node.ch2.as_ref().unwrap().table_bitset.clone();
        let predicate = match &mut node.content {
            PlanContent::Join { predicate } => std::mem::take(predicate),
            _ => unreachable!("rule matched a non-join node"),
        };

        let mut left_hash_exprs = Vec::new();
        let mut right_hash_exprs = Vec::new();
        let mut residual = PredicateVec::new();
        for element in predicate.into_elements() {
            match hash_key_pair(&element, &left_bits, &right_bits) {
                Some((l, r)) => {
                    left_hash_exprs.push(l.clone());
                    right_hash_exprs.push(r.clone());
                }
                None => residual.push(element),
            }
        }

        node.content = PlanContent::HashJoin {
            left_hash_exprs,
            right_hash_exprs,
            predicate: residual,
        };
        node
    }
}
