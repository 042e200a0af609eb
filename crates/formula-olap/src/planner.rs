//! Turns the leaves of a step graph into the minimal set of table scans.

use crate::dag::{QueryStepsDag, StepId};
use crate::error::{OlapError, OlapResult};
use crate::filter::Filter;
use crate::measure::{Aggregator, Measure};
use crate::query::GroupBy;
use crate::table::TableQuery;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// A table query without its aggregators: leaves sharing one are served by one scan.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasurelessQuery {
    pub filter: Filter,
    pub group_by: GroupBy,
}

impl fmt::Display for MeasurelessQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter={} groupBy={}", self.filter, self.group_by)
    }
}

/// A table query ready to be sent, with what is needed to map its rows back onto steps.
#[derive(Clone, Debug)]
pub struct PlannedTableQuery {
    /// What is sent to the table, generated columns removed.
    pub table_query: TableQuery,
    /// The group-by the leaf steps were expressed in.
    pub group_by: GroupBy,
    /// Generated group-by columns to add back to every slice.
    pub suppressed: Vec<Arc<str>>,
    /// The leaf step each aggregator feeds.
    pub steps: BTreeMap<Aggregator, StepId>,
}

impl PlannedTableQuery {
    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.steps.values().copied()
    }
}

/// Group the aggregator leaves of `dag` by filter and group-by.
///
/// Empty measures and inactive columnators are legitimate leaves that need no data; any other
/// non-aggregator leaf fails.
pub fn plan_table_queries(
    dag: &QueryStepsDag,
    generated_columns: &BTreeSet<Arc<str>>,
    explain: bool,
) -> OlapResult<Vec<PlannedTableQuery>> {
    let mut grouped: BTreeMap<MeasurelessQuery, BTreeMap<Aggregator, StepId>> = BTreeMap::new();
    let mut marker: Option<Value> = None;

    for id in dag.leaves() {
        let step = dag.step(id);
        match step.measure.as_ref() {
            Measure::Aggregator(aggregator) => {
                let key = MeasurelessQuery {
                    filter: step.filter.clone(),
                    group_by: step.group_by.clone(),
                };
                grouped
                    .entry(key)
                    .or_default()
                    .insert(aggregator.clone(), id);
                if marker.is_none() {
                    marker = step.custom_marker.clone();
                }
            }
            Measure::Empty(_) => {
                log::debug!("leaf {step} is empty; no table query needed");
            }
            Measure::Columnator(c) if !c.is_active(&step.group_by) => {
                log::debug!("leaf {step} is inactive for {}", step.group_by);
            }
            _ => {
                return Err(OlapError::ExpectedSimpleAggregator {
                    step: step.to_string(),
                })
            }
        }
    }

    let generated: HashSet<Arc<str>> = generated_columns.iter().cloned().collect();
    let planned: Vec<PlannedTableQuery> = grouped
        .into_iter()
        .map(|(key, steps)| {
            let suppressed: Vec<Arc<str>> = key
                .group_by
                .columns()
                .iter()
                .filter(|c| generated.contains(*c))
                .cloned()
                .collect();
            let filter = if key.filter.columns().iter().any(|c| generated.contains(c)) {
                key.filter.without_columns(&generated)
            } else {
                key.filter.clone()
            };
            if !suppressed.is_empty() || filter != key.filter {
                log::debug!("suppressing generated columns {suppressed:?} from {key}");
            }
            let table_query = TableQuery {
                filter,
                group_by: key.group_by.without(suppressed.iter().map(|c| c.as_ref())),
                aggregators: steps.keys().cloned().collect(),
                custom_marker: marker.clone(),
                explain,
            };
            PlannedTableQuery {
                table_query,
                group_by: key.group_by,
                suppressed,
                steps,
            }
        })
        .collect();

    log::debug!(
        "{} leaves planned into {} table queries",
        planned.iter().map(|p| p.steps.len()).sum::<usize>(),
        planned.len()
    );
    Ok(planned)
}
