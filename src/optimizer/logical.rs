//! The rule-driven rewriter: apply the rule set at each node until no
//! rule fires, then recurse into the children.

use crate::{
    catalog::db::Database,
    optimizer::rules::{
        ConvertToHashJoinRule, DeriveRangeScanRule, OptRule, PushDownFilterRule,
        PushDownJoinPredicateRule,
    },
    plan::PlanNode,
};

pub struct LogicalOptimizer;

impl LogicalOptimizer {
    pub fn apply(mut plan: PlanNode, rules: &[Box<dyn OptRule>]) -> PlanNode {
        loop {
            let mut fired = false;
            for rule in rules {
                if rule.matches(&plan) {
                    plan = rule.transform(plan);
                    fired = true;
                }
            }
            if !fired {
                break;
            }
        }
        if let Some(ch) = plan.ch.take() {
            plan.ch = Some(Box::new(Self::apply(*ch, rules)));
        }
        if let Some(ch2) = plan.ch2.take() {
            plan.ch2 = Some(Box::new(Self::apply(*ch2, rules)));
        }
        plan
    }

    pub fn optimize(plan: PlanNode, db: &Database) -> PlanNode {
        let rules: Vec<Box<dyn OptRule>> = vec![
            Box::new(PushDownJoinPredicateRule),
            Box::new(PushDownFilterRule),
            Box::new(ConvertToHashJoinRule),
            Box::new(DeriveRangeScanRule::new(db.db_schema())),
        ];
        Self::apply(plan, &rules)
    }
}
