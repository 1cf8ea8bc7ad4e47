//! SUM/MEAN aggregate operator (spec §4.8), grounded on
//! `operators/aggregate/Aggregate.cc`'s group-enumeration-by-odometer
//! structure.
//!
//! Group-by columns each contribute a sorted, deduped list of unique
//! values; the Cartesian product of those lists (an odometer of nested
//! counters, one per group column) enumerates every candidate group. A
//! candidate is elided only when the conjunctive `Eq` filter built from
//! its tuple of values selects zero rows — not merely because the
//! resulting SUM happens to be zero, which is the fix for the original's
//! "empty group" bug the spec calls out.

use std::sync::Arc;

use crate::block::Value;
use crate::error::{HustleError, Result};
use crate::lazy::LazyTable;
use crate::predicate::{compare_values, CompareOp, PredicateTree};
use crate::schema::{DataType, Field, Schema};
use crate::table::Table;

use super::select::select;

/// The aggregate kernel to apply to the aggregate column. `Count` is
/// accepted as a variant so callers can name it, but `aggregate` always
/// refuses to run it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggregateKernel {
    Sum,
    Mean,
    Count,
}

/// One aggregate request: a kernel over `agg_col`, grouped by
/// `group_by` (in the order group fields appear in the output schema),
/// with `order_by` naming a subset of `group_by` to sort the output by
/// (applied in reverse, so the first entry is the primary sort key).
#[derive(Clone, Debug)]
pub struct AggregateSpec {
    pub kernel: AggregateKernel,
    pub agg_col: usize,
    pub group_by: Vec<usize>,
    pub order_by: Vec<usize>,
}

fn compute_kernel(kernel: AggregateKernel, values: &[Value]) -> Result<Value> {
    match kernel {
        AggregateKernel::Sum => {
            let mut sum = 0i64;
            for v in values {
                match v {
                    Value::Int(i) => sum += i,
                    Value::Float(f) => sum += *f as i64,
                    other => {
                        return Err(HustleError::Schema(format!(
                            "SUM requires a numeric column, found {other:?}"
                        )))
                    }
                }
            }
            Ok(Value::Int(sum))
        }
        AggregateKernel::Mean => {
            if values.is_empty() {
                return Err(HustleError::Invariant("MEAN over an empty group".into()));
            }
            let mut sum = 0.0f64;
            for v in values {
                match v {
                    Value::Int(i) => sum += *i as f64,
                    Value::Float(f) => sum += f,
                    other => {
                        return Err(HustleError::Schema(format!(
                            "MEAN requires a numeric column, found {other:?}"
                        )))
                    }
                }
            }
            Ok(Value::Float(sum / values.len() as f64))
        }
        AggregateKernel::Count => unreachable!("aggregate() refuses COUNT before reaching the kernel"),
    }
}

/// Run `spec` over `input`, returning a freshly materialized single-block
/// output table whose schema is the group-by fields followed by a final
/// `"aggregate"` field of the kernel's output type.
pub fn aggregate(input: &LazyTable, spec: &AggregateSpec) -> Result<LazyTable> {
    if spec.kernel == AggregateKernel::Count {
        return Err(HustleError::Unimplemented("COUNT aggregate".into()));
    }

    let schema = input.table.schema().clone();

    // Stage 1: unique values per group-by column, sorted ascending.
    let unique: Vec<Vec<Value>> = spec
        .group_by
        .iter()
        .map(|&col| {
            let mut values = input.materialize_column(col);
            values.sort_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            values
        })
        .collect();

    let mut out_fields: Vec<Field> = spec
        .group_by
        .iter()
        .map(|&c| schema.fields[c].clone())
        .collect();
    let agg_type = match spec.kernel {
        AggregateKernel::Sum => DataType::Int64,
        AggregateKernel::Mean => DataType::Float64,
        AggregateKernel::Count => unreachable!(),
    };
    out_fields.push(Field::new("aggregate", agg_type));
    let out_schema = Arc::new(Schema::new(out_fields));
    let out_table = Table::new(format!("{}_aggregate", input.table.name()), out_schema);

    // Stage 2: enumerate the Cartesian product of unique-value positions
    // with a nested-counter odometer, one digit per group column.
    let maxes: Vec<usize> = unique.iter().map(|u| u.len()).collect();
    let total_groups: usize = maxes.iter().product::<usize>().max(1);
    let mut its = vec![0usize; spec.group_by.len()];

    for _ in 0..total_groups {
        let mut predicate: Option<PredicateTree> = None;
        for (i, &col) in spec.group_by.iter().enumerate() {
            let leaf = PredicateTree::leaf(col, CompareOp::Eq, unique[i][its[i]].clone());
            predicate = Some(match predicate {
                None => leaf,
                Some(p) => p.and(leaf),
            });
        }

        let group_view = match &predicate {
            Some(p) => select(input, p),
            None => input.clone(),
        };

        if group_view.num_rows() > 0 {
            let values = group_view.materialize_column(spec.agg_col);
            let agg_value = compute_kernel(spec.kernel, &values)?;
            let mut row: Vec<Value> = (0..spec.group_by.len()).map(|i| unique[i][its[i]].clone()).collect();
            row.push(agg_value);
            out_table.insert_record(&row)?;
        }

        for i in (0..its.len()).rev() {
            its[i] += 1;
            if its[i] < maxes[i] {
                break;
            }
            its[i] = 0;
        }
    }

    let out_view = LazyTable::new(Arc::new(out_table));

    // Stage 3: order-by, reverse order given so the first named column
    // ends up as the primary sort key.
    if spec.order_by.is_empty() {
        return Ok(out_view);
    }

    let mut rows = out_view.materialize();
    for &col in spec.order_by.iter().rev() {
        let out_idx = spec
            .group_by
            .iter()
            .position(|&g| g == col)
            .ok_or_else(|| HustleError::Schema("order-by column must be a group-by column".into()))?;
        rows.sort_by(|a, b| compare_values(&a[out_idx], &b[out_idx]).unwrap_or(std::cmp::Ordering::Equal));
    }

    let sorted = Table::new(out_view.table.name().to_string(), out_view.table.schema().clone());
    for row in rows {
        sorted.insert_record(&row)?;
    }
    Ok(LazyTable::new(Arc::new(sorted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType as DT;

    fn sales_table() -> Arc<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("dept", DT::Int64),
            Field::new("amount", DT::Int64),
        ]));
        let table = Table::new("sales", schema);
        for (dept, amount) in [(1, 10), (1, 20), (2, 5), (2, -5), (3, 7)] {
            table
                .insert_record(&[Value::Int(dept), Value::Int(amount)])
                .unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn sum_grouped_and_ordered_by_group_column() {
        let input = LazyTable::new(sales_table());
        let spec = AggregateSpec {
            kernel: AggregateKernel::Sum,
            agg_col: 1,
            group_by: vec![0],
            order_by: vec![0],
        };
        let result = aggregate(&input, &spec).unwrap();
        let rows = result.materialize();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Int(30)],
                vec![Value::Int(2), Value::Int(0)],
                vec![Value::Int(3), Value::Int(7)],
            ]
        );
    }

    #[test]
    fn a_group_summing_to_zero_is_not_elided() {
        let input = LazyTable::new(sales_table());
        let spec = AggregateSpec {
            kernel: AggregateKernel::Sum,
            agg_col: 1,
            group_by: vec![0],
            order_by: vec![],
        };
        let result = aggregate(&input, &spec).unwrap();
        let rows = result.materialize();
        assert!(
            rows.iter().any(|r| r[0] == Value::Int(2) && r[1] == Value::Int(0)),
            "dept 2 sums to zero but has real rows and must still appear"
        );
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn a_group_combination_with_no_matching_rows_is_elided() {
        // Two group columns whose unique values are each real, but whose
        // cross product includes a combination no row actually has.
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DT::Int64),
            Field::new("dept", DT::Int64),
            Field::new("amount", DT::Int64),
        ]));
        let table = Table::new("sales2", schema);
        // (region=1, dept=1) and (region=2, dept=2) exist; (region=1,
        // dept=2) and (region=2, dept=1) never occur together.
        for (region, dept, amount) in [(1, 1, 10), (2, 2, 20)] {
            table
                .insert_record(&[Value::Int(region), Value::Int(dept), Value::Int(amount)])
                .unwrap();
        }
        let input = LazyTable::new(Arc::new(table));
        let spec = AggregateSpec {
            kernel: AggregateKernel::Sum,
            agg_col: 2,
            group_by: vec![0, 1],
            order_by: vec![0, 1],
        };
        let result = aggregate(&input, &spec).unwrap();
        assert_eq!(result.num_rows(), 2);
    }

    #[test]
    fn mean_of_a_group() {
        let input = LazyTable::new(sales_table());
        let spec = AggregateSpec {
            kernel: AggregateKernel::Mean,
            agg_col: 1,
            group_by: vec![0],
            order_by: vec![],
        };
        let result = aggregate(&input, &spec).unwrap();
        let rows = result.materialize();
        let dept1 = rows.iter().find(|r| r[0] == Value::Int(1)).unwrap();
        assert_eq!(dept1[1], Value::Float(15.0));
    }

    #[test]
    fn count_is_refused() {
        let input = LazyTable::new(sales_table());
        let spec = AggregateSpec {
            kernel: AggregateKernel::Count,
            agg_col: 1,
            group_by: vec![],
            order_by: vec![],
        };
        assert!(matches!(aggregate(&input, &spec), Err(HustleError::Unimplemented(_))));
    }

    #[test]
    fn no_group_by_runs_exactly_once() {
        let input = LazyTable::new(sales_table());
        let spec = AggregateSpec {
            kernel: AggregateKernel::Sum,
            agg_col: 1,
            group_by: vec![],
            order_by: vec![],
        };
        let result = aggregate(&input, &spec).unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.materialize()[0], vec![Value::Int(37)]);
    }
}
