//! Streaming aggregation of one table query.
//!
//! Rows are consumed one at a time; nothing but the per-aggregator columns is retained. Each
//! row is first mapped to its slice (rows lacking a group-by column are skipped), then every
//! aggregator of the query receives either the value the source pre-aggregated for it or the
//! raw value of its column.

use crate::column::{FrozenColumn, MultitypeColumn, ValueReceiver};
use crate::columns::ColumnsManager;
use crate::dag::StepId;
use crate::error::OlapResult;
use crate::measure::Aggregator;
use crate::planner::PlannedTableQuery;
use crate::slice::{Slice, SliceFactory};
use crate::table::{RowStream, TableRow};
use crate::value::Value;

/// The columns one table query produced, keyed by the leaf step each feeds.
#[derive(Debug, Default)]
pub struct ReducedTableQuery {
    pub columns: Vec<(StepId, FrozenColumn)>,
    pub rows: usize,
    /// Rows skipped because they lack a group-by column.
    pub excluded_rows: usize,
}

pub struct TableQueryReducer<'a> {
    planned: &'a PlannedTableQuery,
    columns_manager: &'a dyn ColumnsManager,
    generated_placeholder: &'a Value,
    aggregators: Vec<&'a Aggregator>,
    columns: Vec<MultitypeColumn>,
    factory: SliceFactory,
    rows: usize,
    excluded_rows: usize,
    warned_generated: bool,
}

impl<'a> TableQueryReducer<'a> {
    pub fn new(
        planned: &'a PlannedTableQuery,
        columns_manager: &'a dyn ColumnsManager,
        generated_placeholder: &'a Value,
    ) -> Self {
        let aggregators: Vec<&Aggregator> = planned.steps.keys().collect();
        let columns = aggregators
            .iter()
            .map(|a| MultitypeColumn::new(a.aggregation))
            .collect();
        Self {
            planned,
            columns_manager,
            generated_placeholder,
            aggregators,
            columns,
            factory: SliceFactory::new(),
            rows: 0,
            excluded_rows: 0,
            warned_generated: false,
        }
    }

    /// Drain `stream`. The stream is dropped, and its close hook run, before this returns,
    /// whatever the outcome.
    pub fn consume(&mut self, stream: RowStream) -> OlapResult<()> {
        for row in stream {
            self.accept(&row?)?;
        }
        Ok(())
    }

    pub fn accept(&mut self, row: &TableRow) -> OlapResult<()> {
        self.rows += 1;
        let Some(slice) = self.slice_of(row)? else {
            self.excluded_rows += 1;
            return Ok(());
        };

        // One pass over the aggregators; several of them may read the same raw column.
        for (aggregator, column) in self.aggregators.iter().zip(self.columns.iter_mut()) {
            if let Some(value) = row.aggregate(&aggregator.name) {
                column.contribute_pre(slice.clone()).on_value(value.clone());
            } else if aggregator.counts_rows() {
                column.contribute_raw(slice.clone()).on_long(1);
            } else if let Some(value) = row.get(&aggregator.column) {
                column.contribute_raw(slice.clone()).on_value(value.clone());
            }
        }
        Ok(())
    }

    fn slice_of(&mut self, row: &TableRow) -> OlapResult<Option<Slice>> {
        let planned = self.planned;
        let mut builder = self.factory.builder(&planned.group_by);
        for column in planned.group_by.columns() {
            if planned.suppressed.contains(column) {
                if row.get(column).is_some() && !self.warned_generated {
                    log::warn!(
                        "source returned generated column {column}; using placeholder {}",
                        self.generated_placeholder
                    );
                    self.warned_generated = true;
                }
                builder.append(column, self.generated_placeholder.clone())?;
                continue;
            }
            let coordinate = match row.get(column) {
                None => return Ok(None),
                Some(Value::Null) => self.columns_manager.on_missing_column(column),
                Some(value) => value.clone(),
            };
            builder.append(column, coordinate)?;
        }
        builder.build().map(Some)
    }

    pub fn finish(self) -> ReducedTableQuery {
        let steps = &self.planned.steps;
        let columns = self
            .aggregators
            .iter()
            .zip(self.columns)
            .filter_map(|(aggregator, column)| {
                steps.get(*aggregator).map(|&id| (id, column.freeze()))
            })
            .collect();
        ReducedTableQuery {
            columns,
            rows: self.rows,
            excluded_rows: self.excluded_rows,
        }
    }
}

/// Aggregate a whole stream for `planned`.
pub fn reduce(
    planned: &PlannedTableQuery,
    stream: RowStream,
    columns_manager: &dyn ColumnsManager,
    generated_placeholder: &Value,
) -> OlapResult<ReducedTableQuery> {
    let mut reducer = TableQueryReducer::new(planned, columns_manager, generated_placeholder);
    reducer.consume(stream)?;
    let reduced = reducer.finish();
    if reduced.excluded_rows > 0 {
        log::debug!(
            "{}: {} of {} rows lack a group-by column",
            planned.table_query,
            reduced.excluded_rows,
            reduced.rows
        );
    }
    Ok(reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::StandardColumnsManager;
    use crate::filter::Filter;
    use crate::query::GroupBy;
    use crate::table::TableQuery;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn planned(group_by: &[&str], aggregators: &[Aggregator]) -> PlannedTableQuery {
        let group_by = GroupBy::of(group_by.iter().copied());
        let steps: BTreeMap<Aggregator, StepId> = aggregators
            .iter()
            .cloned()
            .enumerate()
            .map(|(id, a)| (a, id))
            .collect();
        PlannedTableQuery {
            table_query: TableQuery {
                filter: Filter::MatchAll,
                group_by: group_by.clone(),
                aggregators: steps.keys().cloned().collect(),
                custom_marker: None,
                explain: false,
            },
            group_by,
            suppressed: Vec::new(),
            steps,
        }
    }

    fn column(reduced: &ReducedTableQuery, id: StepId) -> &FrozenColumn {
        &reduced.columns.iter().find(|(i, _)| *i == id).unwrap().1
    }

    #[test]
    fn absent_group_by_column_excludes_the_row() {
        let planned = planned(&["a"], &[Aggregator::sum("k1Sum", "k1")]);
        let rows = vec![
            TableRow::new().with("a", "a1").with("k1", 123),
            TableRow::new().with("k1", 1000),
            TableRow::new().with("a", "a1").with("k1", 234),
        ];
        let reduced = reduce(
            &planned,
            RowStream::from_rows(rows),
            &StandardColumnsManager::new(),
            &Value::from("*"),
        )
        .unwrap();
        assert_eq!(reduced.rows, 3);
        assert_eq!(reduced.excluded_rows, 1);
        let k1 = column(&reduced, 0);
        assert_eq!(k1.len(), 1);
        assert_eq!(k1.get(&Slice::from_pairs([("a", "a1")])), Some(Value::Long(357)));
    }

    #[test]
    fn null_group_by_column_is_replaced() {
        let planned = planned(&["a"], &[Aggregator::sum("k1Sum", "k1")]);
        let rows = vec![TableRow::new().with("a", Value::Null).with("k1", 5)];
        let manager = StandardColumnsManager::new().with_null_replacement("a", "N/A");
        let reduced = reduce(&planned, RowStream::from_rows(rows), &manager, &Value::from("*"))
            .unwrap();
        assert_eq!(
            column(&reduced, 0).get(&Slice::from_pairs([("a", "N/A")])),
            Some(Value::Long(5))
        );
    }

    #[test]
    fn one_column_feeds_several_aggregators() {
        let aggregators = [
            Aggregator::sum("k1Sum", "k1"),
            Aggregator::new("k1Max", "k1", crate::aggregation::AggregationKind::Max),
            Aggregator::count_rows("count"),
        ];
        let planned = planned(&[], &aggregators);
        let rows = vec![
            TableRow::new().with("k1", 3),
            TableRow::new().with("k1", 7.5),
            TableRow::new(),
        ];
        let reduced = reduce(
            &planned,
            RowStream::from_rows(rows),
            &StandardColumnsManager::new(),
            &Value::from("*"),
        )
        .unwrap();
        let total = Slice::grand_total();
        let by_name = |name: &str| {
            let id = planned.steps.iter().find(|(a, _)| a.name == name).unwrap().1;
            column(&reduced, *id).get(&total)
        };
        assert_eq!(by_name("k1Sum"), Some(Value::Double(10.5)));
        assert_eq!(by_name("k1Max"), Some(Value::Double(7.5)));
        assert_eq!(by_name("count"), Some(Value::Long(3)));
    }

    #[test]
    fn pre_aggregated_values_are_recorded() {
        let planned = planned(&["a"], &[Aggregator::sum("k1Sum", "k1")]);
        let rows = vec![
            TableRow::new().with("a", "a1").with_aggregate("k1Sum", 357),
            TableRow::new().with("a", "a2").with_aggregate("k1Sum", 1.5),
        ];
        let reduced = reduce(
            &planned,
            RowStream::from_rows(rows),
            &StandardColumnsManager::new(),
            &Value::from("*"),
        )
        .unwrap();
        let k1 = column(&reduced, 0);
        assert_eq!(k1.get(&Slice::from_pairs([("a", "a1")])), Some(Value::Long(357)));
        assert_eq!(k1.get(&Slice::from_pairs([("a", "a2")])), Some(Value::Double(1.5)));
    }

    #[test]
    fn suppressed_columns_get_the_placeholder() {
        let mut planned = planned(&["a", "gen"], &[Aggregator::sum("k1Sum", "k1")]);
        planned.suppressed = vec![Arc::from("gen")];
        let rows = vec![TableRow::new().with("a", "a1").with("k1", 1)];
        let reduced = reduce(
            &planned,
            RowStream::from_rows(rows),
            &StandardColumnsManager::new(),
            &Value::from("*"),
        )
        .unwrap();
        assert_eq!(
            column(&reduced, 0).get(&Slice::from_pairs([("a", "a1"), ("gen", "*")])),
            Some(Value::Long(1))
        );
    }

    #[test]
    fn stream_is_closed_on_failure() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let planned = planned(&[], &[Aggregator::sum("k1Sum", "k1")]);
        let stream = RowStream::new(
            vec![
                Ok(TableRow::new().with("k1", 1)),
                Err(crate::error::OlapError::Source("connection reset".into())),
            ]
            .into_iter(),
        )
        .on_close(move || flag.store(true, Ordering::SeqCst));
        let err = reduce(
            &planned,
            stream,
            &StandardColumnsManager::new(),
            &Value::from("*"),
        )
        .unwrap_err();
        assert!(err.is_source());
        assert!(closed.load(Ordering::SeqCst));
    }
}
