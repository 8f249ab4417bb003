//! Turn an optimized plan tree into an executor tree.

use crate::{
    error::WrenError,
    execution::{
        aggregate::AggregateExecutor,
        distinct::DistinctExecutor,
        executor::BoxedExecutor,
        expr_eval::{self, bind_predicate, promoted_key_type},
        filter::FilterExecutor,
        hash_join::HashJoinExecutor,
        join::JoinExecutor,
        limit::LimitExecutor,
        modify::{DeleteExecutor, InsertExecutor, UpdateExecutor},
        order_by::OrderByExecutor,
        print::PrintExecutor,
        project::ProjectExecutor,
        scan::{RangeScanExecutor, SeqScanExecutor},
        ExecContext,
    },
    plan::{plan::ScanBound, PlanContent, PlanNode, RetType},
    storage::{
        schema::TableSchema,
        table_storage::RangeBound,
        tuple::encode_key,
    },
    utils::HandyRwLock,
};

fn table_schema(ctx: &ExecContext, name: &str) -> Result<TableSchema, WrenError> {
    Ok(ctx.storage.rl().schema_of(name)?.clone())
}

fn to_range_bound(bound: &ScanBound, schema: &TableSchema) -> Result<RangeBound, WrenError> {
    match bound {
        None => Ok(RangeBound::unbounded()),
        Some((cell, closed)) => {
            let pk = schema.primary_key();
            let cell = cell.coerce_to(pk)?;
            let key = encode_key(&cell, pk)?;
            if *closed {
                Ok(RangeBound::inclusive(key))
            } else {
                Ok(RangeBound::exclusive(key))
            }
        }
    }
}

pub fn generate_executor(plan: &PlanNode, ctx: &ExecContext) -> Result<BoxedExecutor, WrenError> {
    match &plan.content {
        PlanContent::SeqScan {
            table_name,
            predicate,
            ..
        } => {
            let schema = table_schema(ctx, table_name)?;
            let bound = bind_predicate(predicate, &plan.output_schema)?;
            Ok(Box::new(SeqScanExecutor::new(
                ctx.clone(),
                table_name,
                schema,
                bound,
            )))
        }
        PlanContent::RangeScan {
            table_name,
            range_l,
            range_r,
            predicate,
            ..
        } => {
            let schema = table_schema(ctx, table_name)?;
            let bound = bind_predicate(predicate, &plan.output_schema)?;
            let left = to_range_bound(range_l, &schema)?;
            let right = to_range_bound(range_r, &schema)?;
            Ok(Box::new(RangeScanExecutor::new(
                ctx.clone(),
                table_name,
                schema,
                left,
                right,
                bound,
            )))
        }
        PlanContent::Filter { predicate } => {
            let child_plan = plan.ch.as_ref().unwrap();
            let child = generate_executor(child_plan, ctx)?;
            let bound = bind_predicate(predicate, &child_plan.output_schema)?;
            Ok(Box::new(FilterExecutor::new(child, bound)))
        }
        PlanContent::Project { output_exprs } => {
            let child_plan = plan.ch.as_ref().unwrap();
            let child = generate_executor(child_plan, ctx)?;
            let bound = output_exprs
                .iter()
                .map(|e| expr_eval::bind(e, &child_plan.output_schema))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Box::new(ProjectExecutor::new(child, bound)))
        }
        PlanContent::Join { predicate } => {
            let left = generate_executor(plan.ch.as_ref().unwrap(), ctx)?;
            let right = generate_executor(plan.ch2.as_ref().unwrap(), ctx)?;
            let bound = bind_predicate(predicate, &plan.output_schema)?;
            Ok(Box::new(JoinExecutor::new(left, right, bound)))
        }
        PlanContent::HashJoin {
            left_hash_exprs,
            right_hash_exprs,
            predicate,
        } => {
            let left_plan = plan.ch.as_ref().unwrap();
            let right_plan = plan.ch2.as_ref().unwrap();
            let left = generate_executor(left_plan, ctx)?;
            let right = generate_executor(right_plan, ctx)?;
            let key_types: Vec<RetType> = left_hash_exprs
                .iter()
                .zip(right_hash_exprs.iter())
                .map(|(l, r)| promoted_key_type(l.ret_type(), r.ret_type()))
                .collect::<Result<Vec<_>, _>>()?;
            let build_exprs = left_hash_exprs
                .iter()
                .map(|e| expr_eval::bind(e, &left_plan.output_schema))
                .collect::<Result<Vec<_>, _>>()?;
            let probe_exprs = right_hash_exprs
                .iter()
                .map(|e| expr_eval::bind(e, &right_plan.output_schema))
                .collect::<Result<Vec<_>, _>>()?;
            let bound = bind_predicate(predicate, &plan.output_schema)?;
            Ok(Box::new(HashJoinExecutor::new(
                left, right, build_exprs, probe_exprs, key_types, bound,
            )))
        }
        PlanContent::Aggregate {
            group_by_exprs,
            output_exprs,
            group_predicate,
        } => {
            let child_plan = plan.ch.as_ref().unwrap();
            let child = generate_executor(child_plan, ctx)?;
            Ok(Box::new(AggregateExecutor::build(
                child,
                &child_plan.output_schema,
                group_by_exprs,
                output_exprs,
                group_predicate,
            )?))
        }
        PlanContent::Order { order_by_exprs } => {
            let child_plan = plan.ch.as_ref().unwrap();
            let child = generate_executor(child_plan, ctx)?;
            let keys = order_by_exprs
                .iter()
                .map(|(e, asc)| Ok((expr_eval::bind(e, &child_plan.output_schema)?, *asc)))
                .collect::<Result<Vec<_>, WrenError>>()?;
            Ok(Box::new(OrderByExecutor::new(child, keys)))
        }
        PlanContent::Limit { limit, offset } => {
            let child = generate_executor(plan.ch.as_ref().unwrap(), ctx)?;
            Ok(Box::new(LimitExecutor::new(child, *limit, *offset)))
        }
        PlanContent::Distinct => {
            let child = generate_executor(plan.ch.as_ref().unwrap(), ctx)?;
            Ok(Box::new(DistinctExecutor::new(child)))
        }
        PlanContent::Print { values } => Ok(Box::new(PrintExecutor::new(values.clone()))),
        PlanContent::Insert { table_name } => {
            let child = generate_executor(plan.ch.as_ref().unwrap(), ctx)?;
            let schema = table_schema(ctx, table_name)?;
            Ok(Box::new(InsertExecutor::new(
                ctx.clone(),
                table_name,
                schema,
                child,
            )))
        }
        PlanContent::Update {
            table_name,
            updates,
        } => {
            let child_plan = plan.ch.as_ref().unwrap();
            let child = generate_executor(child_plan, ctx)?;
            let schema = table_schema(ctx, table_name)?;
            let bound = updates
                .iter()
                .map(|(idx, e)| Ok((*idx, expr_eval::bind(e, &child_plan.output_schema)?)))
                .collect::<Result<Vec<_>, WrenError>>()?;
            Ok(Box::new(UpdateExecutor::new(
                ctx.clone(),
                table_name,
                schema,
                child,
                bound,
            )))
        }
        PlanContent::Delete { table_name } => {
            let child = generate_executor(plan.ch.as_ref().unwrap(), ctx)?;
            let schema = table_schema(ctx, table_name)?;
            Ok(Box::new(DeleteExecutor::new(
                ctx.clone(),
                table_name,
                schema,
                child,
            )))
        }
    }
}
