//! Join-order enumeration: dynamic programming over connected subsets
//! of the join graph.
//!
//! The join region under inspection is the maximal tree of Join /
//! HashJoin nodes whose leaves are base-table scans. Equality conjuncts
//! partitioned across two leaves are the edges; everything else either
//! sinks into a leaf's scan predicate (single-table conjuncts) or is
//! re-attached as a filter above the reordered tree.
//!
//! For every subset the DP keeps the cheapest plan under
//! `cost(L) + cost(R) + hash_join_cost·(|L|+|R|) + scan_cost·|L⋈R|`
//! (hash join, when an equi key exists) or
//! `cost(L) + cost(R) + scan_cost·|L|·|R|` (nested loop / cross
//! product). The smaller side becomes the build side; ties prefer the
//! build side with the smallest table id.

use itertools::Itertools;
use log::debug;

use crate::{
    catalog::db::Database,
    optimizer::{
        cardinality::{estimate_join_eq, estimate_table, predicate_selectivity, Summary},
        OptimizerOptions,
    },
    plan::{
        BinaryOp, CondExpr, Expr, PlanContent, PlanNode, PredicateElement, PredicateVec,
    },
    utils::HandyRwLock,
};

const MAX_DP_TABLES: usize = 12;

pub struct CostBasedOptimizer;

struct Leaf {
    plan: PlanNode,
    table_name: String,
    summary: Summary,
}

struct Edge {
    l: usize,
    r: usize,
    l_expr: Expr,
    r_expr: Expr,
}

#[derive(Clone)]
struct DpEntry {
    cost: f64,
    summary: Summary,
    // (build mask, probe mask, is hash join); None for leaves.
    split: Option<(u32, u32, bool)>,
    // Smallest table id on the build side, for tie-breaking.
    build_min: u32,
}

impl CostBasedOptimizer {
    pub fn optimize(plan: PlanNode, db: &Database) -> PlanNode {
        Self::rewrite(plan, db)
    }

    fn rewrite(mut node: PlanNode, db: &Database) -> PlanNode {
        if matches!(
            node.content,
            PlanContent::Join { .. } | PlanContent::HashJoin { .. }
        ) {
            if let Some(reordered) = Self::try_reorder(&node, db) {
                return reordered;
            }
        }
        if let Some(ch) = node.ch.take() {
            node.ch = Some(Box::new(Self::rewrite(*ch, db)));
        }
        if let Some(ch2) = node.ch2.take() {
            node.ch2 = Some(Box::new(Self::rewrite(*ch2, db)));
        }
        node
    }

    fn try_reorder(node: &PlanNode, db: &Database) -> Option<PlanNode> {
        let mut leaf_plans = Vec::new();
        let mut elements = Vec::new();
        if !collect_region(node, &mut leaf_plans, &mut elements) {
            return None;
        }
        let n = leaf_plans.len();
        if n < 2 || n > MAX_DP_TABLES {
            return None;
        }
        for leaf in &leaf_plans {
            if leaf.table_bitset.count() != 1 {
                return None;
            }
        }

        // Single-table conjuncts sink into the owning scan.
        let mut edges: Vec<Edge> = Vec::new();
        let mut post_filters = PredicateVec::new();
        for element in elements {
            let bits = element.left_bits.union(&element.right_bits);
            if let Some(i) = leaf_plans
                .iter()
                .position(|l| bits.is_subset_of(&l.table_bitset))
            {
                match &mut leaf_plans[i].content {
                    PlanContent::SeqScan { predicate, .. }
                    | PlanContent::RangeScan { predicate, .. } => predicate.push(element),
                    _ => unreachable!("leaf is always a scan here"),
                }
                continue;
            }
            let cross = edge_between(&element, &leaf_plans);
            match cross {
                Some(edge) if element.expr.op == BinaryOp::Eq => edges.push(edge),
                _ => post_filters.push(element),
            }
        }

        // Per-leaf summaries.
        let options = db.optimizer_options();
        let mut leaves: Vec<Leaf> = Vec::with_capacity(n);
        for plan in leaf_plans {
            let (table_name, predicate) = match &plan.content {
                PlanContent::SeqScan {
                    table_name,
                    predicate,
                    ..
                } => (table_name.clone(), predicate.clone()),
                PlanContent::RangeScan {
                    table_name,
                    predicate,
                    ..
                } => (table_name.clone(), predicate.clone()),
                _ => unreachable!(),
            };
            let schema = match db.table_schema(&table_name) {
                Ok(s) => s,
                Err(_) => return None,
            };
            let stat = db.get_table_stat(&table_name);
            let fallback = db
                .storage()
                .wl()
                .tuple_num(&table_name)
                .unwrap_or(0);
            let mut summary = estimate_table(
                &plan.output_schema,
                &schema,
                &predicate,
                stat.as_deref(),
                fallback,
            );
            // Range bounds narrow the scan like range predicates.
            if let (PlanContent::RangeScan { range_l, range_r, .. }, Some(stat)) =
                (&plan.content, stat.as_deref())
            {
                if let Some((cell, closed)) = range_l {
                    let op = if *closed { BinaryOp::Ge } else { BinaryOp::Gt };
                    summary.size *= predicate_selectivity(stat, schema.pk_index(), op, cell);
                }
                if let Some((cell, closed)) = range_r {
                    let op = if *closed { BinaryOp::Le } else { BinaryOp::Lt };
                    summary.size *= predicate_selectivity(stat, schema.pk_index(), op, cell);
                }
            }
            leaves.push(Leaf {
                plan,
                table_name,
                summary,
            });
        }

        // Dynamic programming over subsets.
        let full: u32 = (1 << n) - 1;
        let mut dp: Vec<Option<DpEntry>> = vec![None; (full + 1) as usize];
        for (i, leaf) in leaves.iter().enumerate() {
            let mask = 1u32 << i;
            let mut summary = leaf.summary.clone();
            if let Some(hint) = subset_hint(&options, &leaves, mask) {
                summary.size = hint;
            }
            dp[mask as usize] = Some(DpEntry {
                cost: options.scan_cost * summary.size,
                summary,
                split: None,
                build_min: i as u32,
            });
        }

        for mask in 1..=full {
            if mask.count_ones() < 2 {
                continue;
            }
            let mut best: Option<DpEntry> = None;
            let mut sub = (mask - 1) & mask;
            while sub > 0 {
                let other = mask ^ sub;
                if sub < other {
                    if let Some(candidate) =
                        join_candidate(sub, other, &dp, &edges, &leaves, &options)
                    {
                        best = pick_better(best, candidate);
                    }
                }
                sub = (sub - 1) & mask;
            }
            let mut best = best?;
            if let Some(hint) = subset_hint(&options, &leaves, mask) {
                best.summary.size = hint;
            }
            dp[mask as usize] = Some(best);
        }

        let plan = build_plan(full, &dp, &edges, &leaves);
        debug!(
            "join order chosen with estimated cost {}",
            dp[full as usize].as_ref().unwrap().cost
        );
        if post_filters.is_empty() {
            Some(plan)
        } else {
            Some(PlanNode::filter(plan, post_filters))
        }
    }
}

// Collect the join region: true if every leaf is a base-table scan.
fn collect_region(
    node: &PlanNode,
    leaves: &mut Vec<PlanNode>,
    elements: &mut Vec<PredicateElement>,
) -> bool {
    match &node.content {
        PlanContent::Join { predicate } => {
            elements.extend(predicate.elements().iter().cloned());
            collect_region(node.ch.as_ref().unwrap(), leaves, elements)
                && collect_region(node.ch2.as_ref().unwrap(), leaves, elements)
        }
        PlanContent::HashJoin {
            left_hash_exprs,
            right_hash_exprs,
            predicate,
        } => {
            elements.extend(predicate.elements().iter().cloned());
            for (l, r) in left_hash_exprs.iter().zip(right_hash_exprs.iter()) {
                elements.push(PredicateElement::new(CondExpr::new(
                    BinaryOp::Eq,
                    l.clone(),
                    r.clone(),
                )));
            }
            collect_region(node.ch.as_ref().unwrap(), leaves, elements)
                && collect_region(node.ch2.as_ref().unwrap(), leaves, elements)
        }
        PlanContent::SeqScan { .. } | PlanContent::RangeScan { .. } => {
            leaves.push(node.clone());
            true
        }
        _ => false,
    }
}

// An equality crossing exactly two distinct leaves, oriented.
fn edge_between(element: &PredicateElement, leaves: &[PlanNode]) -> Option<Edge> {
    if element.left_bits.is_empty() || element.right_bits.is_empty() {
        return None;
    }
    let l = leaves
        .iter()
        .position(|leaf| element.left_bits.is_subset_of(&leaf.table_bitset))?;
    let r = leaves
        .iter()
        .position(|leaf| element.right_bits.is_subset_of(&leaf.table_bitset))?;
    if l == r {
        return None;
    }
    Some(Edge {
        l,
        r,
        l_expr: element.expr.left.clone(),
        r_expr: element.expr.right.clone(),
    })
}

fn mask_min_table(mask: u32) -> u32 {
    mask.trailing_zeros()
}

// The true-cardinality hint for a subset, if configured.
fn subset_hint(options: &OptimizerOptions, leaves: &[Leaf], mask: u32) -> Option<f64> {
    let hints = options.true_cardinality_hints.as_ref()?;
    let names: Vec<&str> = (0..leaves.len())
        .filter(|i| mask & (1 << i) != 0)
        .map(|i| leaves[i].table_name.as_str())
        .sorted()
        .collect();
    for (hint_names, card) in hints {
        let mut sorted: Vec<&str> = hint_names.iter().map(|s| s.as_str()).collect();
        sorted.sort_unstable();
        if sorted == names {
            return Some(*card);
        }
    }
    None
}

// Edges crossing a split, oriented build -> probe.
fn split_edges<'a>(
    build_mask: u32,
    probe_mask: u32,
    edges: &'a [Edge],
) -> Vec<(&'a Expr, &'a Expr)> {
    let mut out = Vec::new();
    for edge in edges {
        let (lm, rm) = (1u32 << edge.l, 1u32 << edge.r);
        if lm & build_mask != 0 && rm & probe_mask != 0 {
            out.push((&edge.l_expr, &edge.r_expr));
        } else if rm & build_mask != 0 && lm & probe_mask != 0 {
            out.push((&edge.r_expr, &edge.l_expr));
        }
    }
    out
}

fn join_candidate(
    a: u32,
    b: u32,
    dp: &[Option<DpEntry>],
    edges: &[Edge],
    _leaves: &[Leaf],
    options: &OptimizerOptions,
) -> Option<DpEntry> {
    let entry_a = dp[a as usize].as_ref()?;
    let entry_b = dp[b as usize].as_ref()?;

    // The smaller estimated side builds; equal sizes prefer the side
    // with the smallest table id.
    let a_builds = if entry_a.summary.size != entry_b.summary.size {
        entry_a.summary.size < entry_b.summary.size
    } else {
        mask_min_table(a) < mask_min_table(b)
    };
    let (build_mask, probe_mask, build, probe) = if a_builds {
        (a, b, entry_a, entry_b)
    } else {
        (b, a, entry_b, entry_a)
    };

    let pairs = split_edges(build_mask, probe_mask, edges);
    if pairs.is_empty() {
        // Cross product: nested-loop cost.
        let summary = estimate_join_eq(&[], &build.summary, &probe.summary);
        let cost = build.cost
            + probe.cost
            + options.scan_cost * build.summary.size * probe.summary.size;
        return Some(DpEntry {
            cost,
            summary,
            split: Some((build_mask, probe_mask, false)),
            build_min: mask_min_table(build_mask),
        });
    }

    let keys: Vec<(Option<u32>, Option<u32>)> = pairs
        .iter()
        .map(|(b, p)| (b.as_column_id(), p.as_column_id()))
        .collect();
    let summary = estimate_join_eq(&keys, &build.summary, &probe.summary);
    let cost = build.cost
        + probe.cost
        + options.hash_join_cost * (build.summary.size + probe.summary.size)
        + options.scan_cost * summary.size;
    Some(DpEntry {
        cost,
        summary,
        split: Some((build_mask, probe_mask, true)),
        build_min: mask_min_table(build_mask),
    })
}

fn pick_better(best: Option<DpEntry>, candidate: DpEntry) -> Option<DpEntry> {
    match best {
        None => Some(candidate),
        Some(best) => {
            let scale = best.cost.abs().max(1.0);
            let tie = (best.cost - candidate.cost).abs() <= 1e-12 * scale;
            if (candidate.cost < best.cost && !tie)
                || (tie && candidate.build_min < best.build_min)
            {
                Some(candidate)
            } else {
                Some(best)
            }
        }
    }
}

fn build_plan(mask: u32, dp: &[Option<DpEntry>], edges: &[Edge], leaves: &[Leaf]) -> PlanNode {
    let entry = dp[mask as usize].as_ref().unwrap();
    match entry.split {
        None => {
            let i = mask.trailing_zeros() as usize;
            leaves[i].plan.clone()
        }
        Some((build_mask, probe_mask, is_hash)) => {
            let build = build_plan(build_mask, dp, edges, leaves);
            let probe = build_plan(probe_mask, dp, edges, leaves);
            if is_hash {
                let pairs = split_edges(build_mask, probe_mask, edges);
                let left_exprs: Vec<Expr> = pairs.iter().map(|(b, _)| (*b).clone()).collect();
                let right_exprs: Vec<Expr> = pairs.iter().map(|(_, p)| (*p).clone()).collect();
                PlanNode::hash_join(build, probe, left_exprs, right_exprs, PredicateVec::new())
            } else {
                PlanNode::join(build, probe, PredicateVec::new())
            }
        }
    }
}
