//! Bottom-up evaluation of the step graph once every table query has completed.

use crate::column::{FrozenColumn, MultitypeColumn, ValueReceiver};
use crate::dag::{QueryStepsDag, StepId};
use crate::error::{OlapError, OlapResult};
use crate::events::{QueryEvent, QueryEventSink};
use crate::measure::{Combination, Dispatchor, Measure, Partitionor};
use crate::query::GroupBy;
use crate::slice::{Slice, SliceFactory};
use crate::step::QueryStep;
use crate::value::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Per-step results, indexed by [`StepId`].
pub type StepColumns = Vec<Option<Arc<FrozenColumn>>>;

/// A column holding a single slice, every coordinate of which is the error itself.
pub fn error_column(group_by: &GroupBy, message: &str) -> FrozenColumn {
    let error = Value::error(message);
    let slice = Slice::from_pairs(group_by.columns().iter().map(|c| (c.clone(), error.clone())));
    std::iter::once((slice, error)).collect()
}

pub struct DagEvaluator<'a> {
    dag: &'a QueryStepsDag,
    sink: &'a dyn QueryEventSink,
    exceptions_as_values: bool,
    debug: bool,
}

impl<'a> DagEvaluator<'a> {
    pub fn new(dag: &'a QueryStepsDag, sink: &'a dyn QueryEventSink) -> Self {
        Self {
            dag,
            sink,
            exceptions_as_values: false,
            debug: false,
        }
    }

    pub fn exceptions_as_values(mut self, enabled: bool) -> Self {
        self.exceptions_as_values = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Fill in every step not already present in `columns`, children before parents.
    pub fn evaluate(&self, columns: &mut StepColumns) -> OlapResult<()> {
        columns.resize(self.dag.len(), None);
        for id in self.dag.evaluation_order()? {
            if columns[id].is_some() {
                continue;
            }
            let step = self.dag.step(id);
            let column = match self.evaluate_step(id, columns) {
                Ok(column) => column,
                Err(err) if self.exceptions_as_values && !err.is_state() => {
                    log::debug!("{step} failed, captured as value: {err}");
                    error_column(&step.group_by, &err.to_string())
                }
                Err(err) => return Err(err.at_step(step)),
            };
            log::trace!("{step} -> {} slices", column.len());
            if self.debug {
                self.sink.on_event(&QueryEvent::StepEvaluated {
                    step: step.to_string(),
                    slices: column.len(),
                });
            }
            columns[id] = Some(Arc::new(column));
        }
        Ok(())
    }

    fn underlying_columns(
        &self,
        id: StepId,
        columns: &StepColumns,
    ) -> OlapResult<Vec<Arc<FrozenColumn>>> {
        self.dag
            .underlying_positions(id)
            .iter()
            .map(|&child| {
                columns
                    .get(child)
                    .cloned()
                    .flatten()
                    .ok_or_else(|| OlapError::DagMissedStep {
                        step: self.dag.step(child).to_string(),
                    })
            })
            .collect()
    }

    fn evaluate_step(&self, id: StepId, columns: &StepColumns) -> OlapResult<FrozenColumn> {
        let step = self.dag.step(id);
        match step.measure.as_ref() {
            // Leaves are populated by table queries; reaching one here is a planning bug.
            Measure::Aggregator(_) => Err(OlapError::DagMissedStep {
                step: step.to_string(),
            }),
            Measure::Empty(_) => Ok(FrozenColumn::empty()),
            Measure::Columnator(c) if !c.is_active(&step.group_by) => Ok(FrozenColumn::empty()),
            Measure::Columnator(c) => {
                let underlyings = self.underlying_columns(id, columns)?;
                combine(step, c.combination.as_ref(), &underlyings)
            }
            Measure::Combinator(c) => {
                let underlyings = self.underlying_columns(id, columns)?;
                combine(step, c.combination.as_ref(), &underlyings)
            }
            Measure::Filtrator(_) | Measure::Unfiltrator(_) => {
                let underlyings = self.underlying_columns(id, columns)?;
                let [underlying] = underlyings.as_slice() else {
                    return Err(OlapError::InconsistentDag(format!(
                        "{step} expects one underlying, got {}",
                        underlyings.len()
                    )));
                };
                Ok(underlying.as_ref().clone())
            }
            Measure::Partitionor(p) => {
                let underlyings = self.underlying_columns(id, columns)?;
                partition(step, p, &underlyings)
            }
            Measure::Dispatchor(d) => {
                let underlyings = self.underlying_columns(id, columns)?;
                let [underlying] = underlyings.as_slice() else {
                    return Err(OlapError::InconsistentDag(format!(
                        "{step} expects one underlying, got {}",
                        underlyings.len()
                    )));
                };
                dispatch(step, d, underlying)
            }
        }
    }
}

// Sorted union so combinations see slices in a reproducible order.
fn slice_union(columns: &[Arc<FrozenColumn>]) -> BTreeSet<Slice> {
    columns
        .iter()
        .flat_map(|c| c.slices().cloned())
        .collect()
}

/// Combine the underlying values of one slice. An error value among them wins over the
/// combination.
fn combine_slice(
    combination: &dyn Combination,
    slice: &Slice,
    columns: &[Arc<FrozenColumn>],
) -> OlapResult<Option<Value>> {
    let values: Vec<Option<Value>> = columns.iter().map(|c| c.get(slice)).collect();
    if let Some(error) = values.iter().flatten().find(|v| v.is_error()) {
        return Ok(Some(error.clone()));
    }
    combination.combine(slice, &values)
}

fn combine(
    step: &QueryStep,
    combination: &dyn Combination,
    underlyings: &[Arc<FrozenColumn>],
) -> OlapResult<FrozenColumn> {
    let mut out = FrozenColumn::empty();
    for slice in slice_union(underlyings) {
        if let Some(value) = combine_slice(combination, &slice, underlyings)? {
            out.insert(slice, value);
        }
    }
    log::trace!("{} combined {} underlyings", step.measure.name(), underlyings.len());
    Ok(out)
}

fn partition(
    step: &QueryStep,
    partitionor: &Partitionor,
    underlyings: &[Arc<FrozenColumn>],
) -> OlapResult<FrozenColumn> {
    let mut rolled = MultitypeColumn::new(partitionor.aggregation);
    for fine in slice_union(underlyings) {
        let Some(value) = combine_slice(partitionor.combination.as_ref(), &fine, underlyings)? else {
            continue;
        };
        let coarse = fine.project(&step.group_by)?;
        rolled.contribute_raw(coarse).on_value(value);
    }
    Ok(rolled.freeze())
}

fn dispatch(
    step: &QueryStep,
    dispatchor: &Dispatchor,
    underlying: &FrozenColumn,
) -> OlapResult<FrozenColumn> {
    // The underlying step was queried without the constraints on the dispatched columns, so
    // they are applied here to each dispatched coordinate set.
    let outputs: HashSet<Arc<str>> = dispatchor
        .decomposition
        .output_columns()
        .into_iter()
        .collect();
    let other_columns: HashSet<Arc<str>> = step
        .filter
        .columns()
        .into_iter()
        .filter(|c| !outputs.contains(c))
        .collect();
    let output_filter = step.filter.without_columns(&other_columns);

    let mut factory = SliceFactory::new();
    let mut dispatched = MultitypeColumn::new(dispatchor.aggregation);
    for (slice, value) in underlying.iter() {
        if let Value::Error(message) = &value {
            let error_slice = error_column(&step.group_by, message);
            for (s, v) in error_slice.iter() {
                dispatched.contribute_raw(s.clone()).on_value(v);
            }
            continue;
        }
        for (coordinates, weighted) in dispatchor.decomposition.decompose(slice, &value)? {
            let lookup = |column: &str| {
                coordinates
                    .iter()
                    .find(|(c, _)| &**c == column)
                    .map(|(_, v)| v)
            };
            if !output_filter.matches(&lookup) {
                continue;
            }
            let mut builder = factory.builder(&step.group_by);
            for column in step.group_by.columns() {
                let coordinate = match coordinates.iter().find(|(c, _)| c == column) {
                    Some((_, v)) => v.clone(),
                    None => slice.get(column).cloned().ok_or_else(|| {
                        OlapError::IllegalState(format!(
                            "{column} is neither dispatched nor in underlying slice {slice}"
                        ))
                    })?,
                };
                builder.append(column, coordinate)?;
            }
            dispatched.contribute_raw(builder.build()?).on_value(weighted);
        }
    }
    Ok(dispatched.freeze())
}
