//! Lift join conjuncts that only touch one side into a `Filter` on that
//! side, where the filter push-down rule takes over.

use crate::{
    optimizer::rules::OptRule,
    plan::{PlanContent, PlanNode, PredicateVec},
};

pub struct PushDownJoinPredicateRule;

impl OptRule for PushDownJoinPredicateRule {
    fn matches(&self, node: &PlanNode) -> bool {
        let predicate = match &node.content {
            PlanContent::Join { predicate } => predicate,
            PlanContent::HashJoin { predicate, .. } => predicate,
            _ => return false,
        };
        let left = &node.ch.as_ref().unwrap().table_bitset;
        let right = &node.ch2.as_ref().unwrap().table_bitset;
        predicate.elements().iter().any(|e| {
            (e.check_left(left) && e.check_right(left))
                || (e.check_left(right) && e.check_right(right))
        })
    }

    fn transform(&self, mut node: PlanNode) -> PlanNode {
        let left_bits = node.ch.as_ref().unwrap().table_bitset.clone();
        let right_bits = node.ch2.as_ref().unwrap().table_bitset.clone();
        let predicate = match &mut node.content {
            PlanContent::Join { predicate } => predicate,
            PlanContent::HashJoin { predicate, .. } => predicate,
            _ => unreachable!("rule matched a non-join node"),
        };

        let mut left_v = PredicateVec::new();
        let mut right_v = PredicateVec::new();
        let mut rest = PredicateVec::new();
        for element in std::mem::take(predicate).into_elements() {
            if element.check_left(&left_bits) && element.check_right(&left_bits) {
                left_v.push(element);
            } else if element.check_left(&right_bits) && element.check_right(&right_bits) {
                right_v.push(element);
            } else {
                rest.push(element);
            }
        }
        *predicate = rest;

        if !left_v.is_empty() {
            let child = *node.ch.take().unwrap();
            node.ch = Some(Box::new(PlanNode::filter(child, left_v)));
        }
        if !right_v.is_empty() {
            let child = *node.ch2.take().unwrap();
            node.ch2 = Some(Box::new(PlanNode::filter(child, right_v)));
        }
        node
    }
}
