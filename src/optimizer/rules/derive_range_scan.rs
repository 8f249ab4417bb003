//! Rewrite a sequential scan whose predicate pins the primary key into
//! a range scan: `SeqScan(t, pk op const)` becomes
//! `RangeScan(t, [lo, hi])`, with the consumed conjuncts removed from
//! the residual predicate.

use crate::{
    optimizer::rules::OptRule,
    plan::{plan::ScanBound, BinaryOp, Expr, PlanContent, PlanNode, PredicateElement, PredicateVec},
    storage::{schema::DBSchema, tuple::Cell},
};

pub struct DeriveRangeScanRule {
    schema: DBSchema,
}

impl DeriveRangeScanRule {
    pub fn new(schema: DBSchema) -> DeriveRangeScanRule {
        DeriveRangeScanRule { schema }
    }

    // `pk op literal` (or mirrored) on this table's primary key.
    fn pk_bound(&self, table_name: &str, element: &PredicateElement) -> Option<(BinaryOp, Cell)> {
        let table = self.schema.get(table_name)?;
        let pk_index = table.pk_index();
        let (column, literal, op) = match (&element.expr.left, &element.expr.right) {
            (col @ Expr::ColumnRef { .. }, lit) if lit.is_constant() => {
                (col, lit, element.expr.op)
            }
            (lit, col @ Expr::ColumnRef { .. }) if lit.is_constant() => {
                (col, lit, mirror(element.expr.op))
            }
            _ => return None,
        };
        match column {
            Expr::ColumnRef { column_index, .. } if *column_index == pk_index => {}
            _ => return None,
        }
        let cell = match literal {
            Expr::LiteralInt(v) => Cell::Int64(*v),
            Expr::LiteralFloat(v) => Cell::Float64(*v),
            Expr::LiteralString(s) => Cell::String(s.clone()),
            _ => return None,
        };
        match op {
            BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Some((op, cell))
            }
            _ => None,
        }
    }
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

// Tighten `bound` with a new endpoint. `is_left` picks the max of the
// lower bounds / the min of the upper bounds.
fn tighten(bound: &mut ScanBound, cell: Cell, closed: bool, is_left: bool) {
    match bound {
        None => *bound = Some((cell, closed)),
        Some((cur, cur_closed)) => {
            let replace = if is_left {
                cell > *cur || (cell == *cur && !closed && *cur_closed)
            } else {
                cell < *cur || (cell == *cur && !closed && *cur_closed)
            };
            if replace {
                *bound = Some((cell, closed));
            }
        }
    }
}

impl OptRule for DeriveRangeScanRule {
    fn matches(&self, node: &PlanNode) -> bool {
        match &node.content {
            PlanContent::SeqScan {
                table_name,
                predicate,
                ..
            } => predicate
                .elements()
                .iter()
                .any(|e| self.pk_bound(table_name, e).is_some()),
            _ => false,
        }
    }

    fn transform(&self, mut node: PlanNode) -> PlanNode {
        let (table_name, table_id, predicate) = match node.content {
            PlanContent::SeqScan {
                table_name,
                table_id,
                predicate,
            } => (table_name, table_id, predicate),
            _ => unreachable!("rule matched a non-seqscan node"),
        };

        let mut range_l: ScanBound = None;
        let mut range_r: ScanBound = None;
        let mut residual = PredicateVec::new();
        for element in predicate.into_elements() {
            match self.pk_bound(&table_name, &element) {
                Some((BinaryOp::Eq, cell)) => {
                    tighten(&mut range_l, cell.clone(), true, true);
                    tighten(&mut range_r, cell, true, false);
                }
                Some((BinaryOp::Gt, cell)) => tighten(&mut range_l, cell, false, true),
                Some((BinaryOp::Ge, cell)) => tighten(&mut range_l, cell, true, true),
                Some((BinaryOp::Lt, cell)) => tighten(&mut range_r, cell, false, false),
                Some((BinaryOp::Le, cell)) => tighten(&mut range_r, cell, true, false),
                _ => residual.push(element),
            }
        }

        node.content = PlanContent::RangeScan {
            table_name,
            table_id,
            range_l,
            range_r,
            predicate: residual,
        };
        node
    }
}
