//! Conjunctive predicates with cached per-operand table bitsets.
//!
//! The planner's boolean expression is split on top-level AND. Every
//! conjunct is normalized to a binary comparison: a conjunct `e` that is
//! not already one becomes `e <> 0`. Each element caches the table
//! bitsets of its two operands, which is what push-down and join-key
//! detection test against a subtree's `table_bitset`.

use std::fmt;

use crate::plan::{
    bitset::TableBitset,
    expr::{BinaryOp, Expr},
    output_schema::OutputSchema,
};

/// A conjunct, always in binary-comparison shape.
#[derive(Debug, Clone)]
pub struct CondExpr {
    pub op: BinaryOp,
    pub left: Expr,
    pub right: Expr,
}

impl CondExpr {
    pub fn new(op: BinaryOp, left: Expr, right: Expr) -> CondExpr {
        assert!(op.is_comparison());
        CondExpr { op, left, right }
    }

    pub fn to_expr(&self) -> Expr {
        Expr::binary(self.op, self.left.clone(), self.right.clone())
    }
}

impl fmt::Display for CondExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

#[derive(Debug, Clone)]
pub struct PredicateElement {
    pub expr: CondExpr,
    pub left_bits: TableBitset,
    pub right_bits: TableBitset,
}

impl PredicateElement {
    pub fn new(expr: CondExpr) -> PredicateElement {
        let left_bits = expr.left.table_bitset();
        let right_bits = expr.right.table_bitset();
        PredicateElement {
            expr,
            left_bits,
            right_bits,
        }
    }

    /// All tables of the left operand are within `v`.
    pub fn check_left(&self, v: &TableBitset) -> bool {
        self.left_bits.is_subset_of(v)
    }

    pub fn check_right(&self, v: &TableBitset) -> bool {
        self.right_bits.is_subset_of(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredicateVec {
    vec: Vec<PredicateElement>,
}

impl PredicateVec {
    pub fn new() -> PredicateVec {
        PredicateVec { vec: Vec::new() }
    }

    /// Split `expr` on top-level AND and normalize every conjunct.
    pub fn create(expr: Option<Expr>) -> PredicateVec {
        let mut ret = PredicateVec::new();
        if let Some(expr) = expr {
            let mut conjuncts = Vec::new();
            split_and(expr, &mut conjuncts);
            for e in conjuncts {
                ret.push_expr(e);
            }
        }
        ret
    }

    pub fn from_conds(conds: Vec<CondExpr>) -> PredicateVec {
        PredicateVec {
            vec: conds.into_iter().map(PredicateElement::new).collect(),
        }
    }

    fn push_expr(&mut self, e: Expr) {
        let cond = match e {
            Expr::Binary {
                op, left, right, ..
            } if op.is_comparison() => CondExpr::new(op, *left, *right),
            other => CondExpr::new(BinaryOp::Ne, other, Expr::LiteralInt(0)),
        };
        self.vec.push(PredicateElement::new(cond));
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn elements(&self) -> &[PredicateElement] {
        &self.vec
    }

    pub fn into_elements(self) -> Vec<PredicateElement> {
        self.vec
    }

    pub fn push(&mut self, element: PredicateElement) {
        self.vec.push(element);
    }

    pub fn append(&mut self, other: PredicateVec) {
        self.vec.extend(other.vec);
    }

    /// The conjunction as a single expression, None when empty.
    pub fn gen_expr(&self) -> Option<Expr> {
        let mut iter = self.vec.iter();
        let first = iter.next()?;
        let mut ret = first.expr.to_expr();
        for e in iter {
            ret = Expr::binary(BinaryOp::And, ret, e.expr.to_expr());
        }
        Some(ret)
    }

    /// Substitute the input node's output expressions into every
    /// conjunct and recompute the cached bitsets. Used when a filter is
    /// pushed through a Project or into an Aggregate.
    pub fn apply_expr(&mut self, input_exprs: &[Expr], input_schema: &OutputSchema) {
        for element in self.vec.iter_mut() {
            let left = element.expr.left.substitute(input_exprs, input_schema);
            let right = element.expr.right.substitute(input_exprs, input_schema);
            let cond = CondExpr::new(element.expr.op, left, right);
            *element = PredicateElement::new(cond);
        }
    }
}

impl fmt::Display for PredicateVec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, e) in self.vec.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{}", e.expr)?;
        }
        Ok(())
    }
}

fn split_and(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
            ..
        } => {
            split_and(*left, out);
            split_and(*right, out);
        }
        other => out.push(other),
    }
}
