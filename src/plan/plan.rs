//! The plan-node tree produced by the planner and rewritten by the
//! optimizer. One struct header (output schema, table bitset, up to two
//! children) plus a content variant per operator; behavior dispatches on
//! the variant.

use std::fmt;

use crate::{
    plan::{
        bitset::TableBitset,
        expr::{Expr, RetType},
        output_schema::{OutputColumn, OutputSchema},
        predicate::PredicateVec,
    },
    storage::{schema::TableSchema, tuple::Cell},
};

/// Stable id of a base-table column in the plan. Chosen so that every
/// `(table occurrence, column)` pair in a statement gets a distinct id.
pub fn scan_column_id(table_id: u32, column_index: usize) -> u32 {
    table_id * 1000 + column_index as u32
}

/// A range endpoint in a RangeScan: the key value and whether the
/// endpoint is closed. `None` means unbounded.
pub type ScanBound = Option<(Cell, bool)>;

#[derive(Debug, Clone)]
pub enum PlanContent {
    SeqScan {
        table_name: String,
        table_id: u32,
        predicate: PredicateVec,
    },
    RangeScan {
        table_name: String,
        table_id: u32,
        range_l: ScanBound,
        range_r: ScanBound,
        predicate: PredicateVec,
    },
    Filter {
        predicate: PredicateVec,
    },
    Project {
        output_exprs: Vec<Expr>,
    },
    /// Nested-loop join.
    Join {
        predicate: PredicateVec,
    },
    /// `left_hash_exprs[i]` pairs with `right_hash_exprs[i]`; the left
    /// child is the build side.
    HashJoin {
        left_hash_exprs: Vec<Expr>,
        right_hash_exprs: Vec<Expr>,
        predicate: PredicateVec,
    },
    Aggregate {
        group_by_exprs: Vec<Expr>,
        output_exprs: Vec<Expr>,
        /// The HAVING predicate, applied after aggregation.
        group_predicate: PredicateVec,
    },
    /// The bool is true for ascending.
    Order {
        order_by_exprs: Vec<(Expr, bool)>,
    },
    Limit {
        limit: usize,
        offset: usize,
    },
    Distinct,
    /// Literal rows (the VALUES list of an INSERT).
    Print {
        values: Vec<Vec<Cell>>,
    },
    Insert {
        table_name: String,
    },
    Update {
        table_name: String,
        /// (logical column index, new-value expression)
        updates: Vec<(usize, Expr)>,
    },
    Delete {
        table_name: String,
    },
}

impl PlanContent {
    pub fn type_name(&self) -> &'static str {
        match self {
            PlanContent::SeqScan { .. } => "SeqScan",
            PlanContent::RangeScan { .. } => "RangeScan",
            PlanContent::Filter { .. } => "Filter",
            PlanContent::Project { .. } => "Project",
            PlanContent::Join { .. } => "Join",
            PlanContent::HashJoin { .. } => "HashJoin",
            PlanContent::Aggregate { .. } => "Aggregate",
            PlanContent::Order { .. } => "Order",
            PlanContent::Limit { .. } => "Limit",
            PlanContent::Distinct => "Distinct",
            PlanContent::Print { .. } => "Print",
            PlanContent::Insert { .. } => "Insert",
            PlanContent::Update { .. } => "Update",
            PlanContent::Delete { .. } => "Delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanNode {
    pub content: PlanContent,
    pub output_schema: OutputSchema,
    pub table_bitset: TableBitset,
    pub ch: Option<Box<PlanNode>>,
    pub ch2: Option<Box<PlanNode>>,
}

impl PlanNode {
    /// The output schema a scan of `schema` exposes: every logical
    /// column, the hidden primary key included.
    pub fn scan_output_schema(schema: &TableSchema, table_id: u32, alias: &str) -> OutputSchema {
        let mut out = OutputSchema::default();
        for (i, col) in schema.columns().iter().enumerate() {
            out.append(OutputColumn::new(
                scan_column_id(table_id, i),
                alias,
                &col.name,
                RetType::of_field(col.field_type),
                col.size,
            ));
        }
        out
    }

    pub fn seq_scan(
        schema: &TableSchema,
        table_id: u32,
        alias: &str,
        predicate: PredicateVec,
    ) -> PlanNode {
        PlanNode {
            content: PlanContent::SeqScan {
                table_name: schema.name().to_string(),
                table_id,
                predicate,
            },
            output_schema: Self::scan_output_schema(schema, table_id, alias),
            table_bitset: TableBitset::single(table_id),
            ch: None,
            ch2: None,
        }
    }

    pub fn range_scan(
        schema: &TableSchema,
        table_id: u32,
        alias: &str,
        range_l: ScanBound,
        range_r: ScanBound,
        predicate: PredicateVec,
    ) -> PlanNode {
        PlanNode {
            content: PlanContent::RangeScan {
                table_name: schema.name().to_string(),
                table_id,
                range_l,
                range_r,
                predicate,
            },
            output_schema: Self::scan_output_schema(schema, table_id, alias),
            table_bitset: TableBitset::single(table_id),
            ch: None,
            ch2: None,
        }
    }

    pub fn filter(child: PlanNode, predicate: PredicateVec) -> PlanNode {
        PlanNode {
            content: PlanContent::Filter { predicate },
            output_schema: child.output_schema.clone(),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn project(child: PlanNode, outputs: Vec<(Expr, String)>, first_id: u32) -> PlanNode {
        let mut schema = OutputSchema::default();
        let mut exprs = Vec::with_capacity(outputs.len());
        for (i, (expr, alias)) in outputs.into_iter().enumerate() {
            let ret = expr.ret_type();
            schema.append(OutputColumn::new(
                first_id + i as u32,
                "",
                &alias,
                ret,
                derived_size(ret),
            ));
            exprs.push(expr);
        }
        PlanNode {
            content: PlanContent::Project {
                output_exprs: exprs,
            },
            output_schema: schema,
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn join(left: PlanNode, right: PlanNode, predicate: PredicateVec) -> PlanNode {
        PlanNode {
            content: PlanContent::Join { predicate },
            output_schema: OutputSchema::concat(&left.output_schema, &right.output_schema),
            table_bitset: left.table_bitset.union(&right.table_bitset),
            ch: Some(Box::new(left)),
            ch2: Some(Box::new(right)),
        }
    }

    pub fn hash_join(
        left: PlanNode,
        right: PlanNode,
        left_hash_exprs: Vec<Expr>,
        right_hash_exprs: Vec<Expr>,
        predicate: PredicateVec,
    ) -> PlanNode {
        PlanNode {
            content: PlanContent::HashJoin {
                left_hash_exprs,
                right_hash_exprs,
                predicate,
            },
            output_schema: OutputSchema::concat(&left.output_schema, &right.output_schema),
            table_bitset: left.table_bitset.union(&right.table_bitset),
            ch: Some(Box::new(left)),
            ch2: Some(Box::new(right)),
        }
    }

    pub fn aggregate(
        child: PlanNode,
        group_by_exprs: Vec<Expr>,
        outputs: Vec<(Expr, String)>,
        group_predicate: PredicateVec,
        first_id: u32,
    ) -> PlanNode {
        let mut schema = OutputSchema::default();
        let mut exprs = Vec::with_capacity(outputs.len());
        for (i, (expr, alias)) in outputs.into_iter().enumerate() {
            let ret = expr.ret_type();
            schema.append(OutputColumn::new(
                first_id + i as u32,
                "",
                &alias,
                ret,
                derived_size(ret),
            ));
            exprs.push(expr);
        }
        PlanNode {
            content: PlanContent::Aggregate {
                group_by_exprs,
                output_exprs: exprs,
                group_predicate,
            },
            output_schema: schema,
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn order_by(child: PlanNode, order_by_exprs: Vec<(Expr, bool)>) -> PlanNode {
        PlanNode {
            content: PlanContent::Order { order_by_exprs },
            output_schema: child.output_schema.clone(),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn limit(child: PlanNode, limit: usize, offset: usize) -> PlanNode {
        PlanNode {
            content: PlanContent::Limit { limit, offset },
            output_schema: child.output_schema.clone(),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn distinct(child: PlanNode) -> PlanNode {
        PlanNode {
            content: PlanContent::Distinct,
            output_schema: child.output_schema.clone(),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    /// Literal rows, typed after the first row.
    pub fn print(values: Vec<Vec<Cell>>) -> PlanNode {
        let mut schema = OutputSchema::default();
        if let Some(first) = values.first() {
            for (i, cell) in first.iter().enumerate() {
                let ret = match cell {
                    Cell::Int32(_) | Cell::Int64(_) => RetType::Int,
                    Cell::Float64(_) => RetType::Float,
                    Cell::String(_) => RetType::String,
                };
                schema.append(OutputColumn::new(
                    u32::MAX - i as u32,
                    "",
                    "",
                    ret,
                    derived_size(ret),
                ));
            }
        }
        PlanNode {
            content: PlanContent::Print { values },
            output_schema: schema,
            table_bitset: TableBitset::new(),
            ch: None,
            ch2: None,
        }
    }

    pub fn insert(child: PlanNode, table_name: &str) -> PlanNode {
        PlanNode {
            content: PlanContent::Insert {
                table_name: table_name.to_string(),
            },
            output_schema: count_schema("inserted rows"),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn update(child: PlanNode, table_name: &str, updates: Vec<(usize, Expr)>) -> PlanNode {
        PlanNode {
            content: PlanContent::Update {
                table_name: table_name.to_string(),
                updates,
            },
            output_schema: count_schema("updated rows"),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    pub fn delete(child: PlanNode, table_name: &str) -> PlanNode {
        PlanNode {
            content: PlanContent::Delete {
                table_name: table_name.to_string(),
            },
            output_schema: count_schema("deleted rows"),
            table_bitset: child.table_bitset.clone(),
            ch: Some(Box::new(child)),
            ch2: None,
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        for _ in 0..indent {
            write!(f, "  ")?;
        }
        match &self.content {
            PlanContent::SeqScan {
                table_name,
                predicate,
                ..
            } => {
                if predicate.is_empty() {
                    writeln!(f, "SeqScan [table: {}]", table_name)?;
                } else {
                    writeln!(f, "SeqScan [table: {}, predicate: {}]", table_name, predicate)?;
                }
            }
            PlanContent::RangeScan {
                table_name,
                range_l,
                range_r,
                predicate,
                ..
            } => {
                writeln!(
                    f,
                    "RangeScan [table: {}, range: {}..{}{}]",
                    table_name,
                    fmt_bound(range_l, true),
                    fmt_bound(range_r, false),
                    if predicate.is_empty() {
                        String::new()
                    } else {
                        format!(", predicate: {}", predicate)
                    }
                )?;
            }
            PlanContent::Filter { predicate } => {
                writeln!(f, "Filter [{}]", predicate)?;
            }
            PlanContent::Project { output_exprs } => {
                let exprs: Vec<String> = output_exprs.iter().map(|e| e.to_string()).collect();
                writeln!(f, "Project [{}]", exprs.join(", "))?;
            }
            PlanContent::Join { predicate } => {
                writeln!(f, "Join [{}]", predicate)?;
            }
            PlanContent::HashJoin {
                left_hash_exprs,
                right_hash_exprs,
                predicate,
            } => {
                let l: Vec<String> = left_hash_exprs.iter().map(|e| e.to_string()).collect();
                let r: Vec<String> = right_hash_exprs.iter().map(|e| e.to_string()).collect();
                writeln!(
                    f,
                    "HashJoin [build keys: {}, probe keys: {}, predicate: {}]",
                    l.join(", "),
                    r.join(", "),
                    predicate
                )?;
            }
            PlanContent::Aggregate {
                group_by_exprs,
                output_exprs,
                group_predicate,
            } => {
                let g: Vec<String> = group_by_exprs.iter().map(|e| e.to_string()).collect();
                let o: Vec<String> = output_exprs.iter().map(|e| e.to_string()).collect();
                writeln!(
                    f,
                    "Aggregate [group by: {}, outputs: {}, having: {}]",
                    g.join(", "),
                    o.join(", "),
                    group_predicate
                )?;
            }
            PlanContent::Order { order_by_exprs } => {
                let keys: Vec<String> = order_by_exprs
                    .iter()
                    .map(|(e, asc)| format!("{} {}", e, if *asc { "asc" } else { "desc" }))
                    .collect();
                writeln!(f, "Order [{}]", keys.join(", "))?;
            }
            PlanContent::Limit { limit, offset } => {
                writeln!(f, "Limit [limit: {}, offset: {}]", limit, offset)?;
            }
            PlanContent::Distinct => writeln!(f, "Distinct")?,
            PlanContent::Print { values } => {
                writeln!(f, "Print [{} rows]", values.len())?;
            }
            PlanContent::Insert { table_name } => {
                writeln!(f, "Insert [table: {}]", table_name)?;
            }
            PlanContent::Update {
                table_name,
                updates,
            } => {
                let u: Vec<String> = updates
                    .iter()
                    .map(|(i, e)| format!("#{} = {}", i, e))
                    .collect();
                writeln!(f, "Update [table: {}, set: {}]", table_name, u.join(", "))?;
            }
            PlanContent::Delete { table_name } => {
                writeln!(f, "Delete [table: {}]", table_name)?;
            }
        }
        if let Some(ch) = &self.ch {
            ch.fmt_tree(f, indent + 1)?;
        }
        if let Some(ch2) = &self.ch2 {
            ch2.fmt_tree(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

fn fmt_bound(bound: &ScanBound, is_left: bool) -> String {
    match bound {
        None => {
            if is_left {
                "(-inf".to_string()
            } else {
                "+inf)".to_string()
            }
        }
        Some((cell, closed)) => {
            if is_left {
                format!("{}{}", if *closed { "[" } else { "(" }, cell)
            } else {
                format!("{}{}", cell, if *closed { "]" } else { ")" })
            }
        }
    }
}

fn derived_size(ret: RetType) -> u32 {
    match ret {
        RetType::Int | RetType::Float => 8,
        RetType::String => 256,
    }
}

fn count_schema(name: &str) -> OutputSchema {
    let mut schema = OutputSchema::default();
    schema.append(OutputColumn::new(u32::MAX, "", name, RetType::Int, 8));
    schema
}
