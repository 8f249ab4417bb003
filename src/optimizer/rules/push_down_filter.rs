//! Push a `Filter` toward the scans.
//!
//! Filters are generated on top of subqueries, scans and joins. A
//! filter commutes with Order and Distinct (conjunctive selection does
//! not care about order or duplicates), merges into another Filter,
//! substitutes through a Project, lands in the HAVING predicate of an
//! Aggregate, and is absorbed into the predicate of a scan or a join.
//! Filters never move through Limit.

use crate::{
    optimizer::rules::OptRule,
    plan::{PlanContent, PlanNode},
};

pub struct PushDownFilterRule;

impl OptRule for PushDownFilterRule {
    fn matches(&self, node: &PlanNode) -> bool {
        if let PlanContent::Filter { .. } = node.content {
            let child = node.ch.as_ref().expect("filter without child");
            matches!(
                child.content,
                PlanContent::Project { .. }
                    | PlanContent::Aggregate { .. }
                    | PlanContent::Order { .. }
                    | PlanContent::Distinct
                    | PlanContent::Filter { .. }
                    | PlanContent::Join { .. }
                    | PlanContent::HashJoin { .. }
                    | PlanContent::SeqScan { .. }
                    | PlanContent::RangeScan { .. }
            )
        } else {
            false
        }
    }

    fn transform(&self, node: PlanNode) -> PlanNode {
        let (mut predicate, child) = match node.content {
            PlanContent::Filter { predicate } => (predicate, *node.ch.unwrap()),
            _ => unreachable!("rule matched a non-filter node"),
        };
        let mut child = child;
        match &mut child.content {
            PlanContent::Order { .. } | PlanContent::Distinct => {
                // Swap: the filter moves below the order/dedup node.
                let grandchild = *child.ch.take().unwrap();
                let filter = PlanNode::filter(grandchild, predicate);
                child.ch = Some(Box::new(filter));
                child
            }
            PlanContent::Filter {
                predicate: child_pred,
            } => {
                child_pred.append(predicate);
                child
            }
            PlanContent::Project { output_exprs } => {
                // Rewrite the predicate in terms of the projection's
                // inputs, then slide it below.
                predicate.apply_expr(output_exprs, &child.output_schema);
                let grandchild = *child.ch.take().unwrap();
                let filter = PlanNode::filter(grandchild, predicate);
                child.ch = Some(Box::new(filter));
                child
            }
            PlanContent::Aggregate {
                output_exprs,
                group_predicate,
                ..
            } => {
                predicate.apply_expr(output_exprs, &child.output_schema);
                group_predicate.append(predicate);
                child
            }
            PlanContent::SeqScan {
                predicate: scan_pred,
                ..
            }
            | PlanContent::RangeScan {
                predicate: scan_pred,
                ..
            } => {
                scan_pred.append(predicate);
                child
            }
            PlanContent::Join {
                predicate: join_pred,
            }
            | PlanContent::HashJoin {
                predicate: join_pred,
                ..
            } => {
                join_pred.append(predicate);
                child
            }
            _ => unreachable!("rule matched an unsupported child"),
        }
    }
}
