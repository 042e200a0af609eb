//! Row sources.
//!
//! A [`TableWrapper`] turns a [`TableQuery`] into a [`RowStream`]. Rows distinguish a column the
//! source did not provide (absent key) from a column it provided as null ([`Value::Null`]), and
//! carry either raw measured values or values the source already aggregated.

use crate::column::{MultitypeColumn, ValueReceiver};
use crate::error::{OlapError, OlapResult};
use crate::filter::Filter;
use crate::measure::Aggregator;
use crate::query::GroupBy;
use crate::slice::Slice;
use crate::value::Value;
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// One physical scan: filter, group-by, and every aggregator needed from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableQuery {
    pub filter: Filter,
    pub group_by: GroupBy,
    pub aggregators: BTreeSet<Aggregator>,
    pub custom_marker: Option<Value>,
    pub explain: bool,
}

impl TableQuery {
    /// Every column the scan reads: group-by, filtered, and aggregated (except `*`).
    pub fn referenced_columns(&self) -> BTreeSet<Arc<str>> {
        let mut columns = self.filter.columns();
        columns.extend(self.group_by.columns().iter().cloned());
        columns.extend(
            self.aggregators
                .iter()
                .filter(|a| !a.counts_rows())
                .map(|a| a.column.clone()),
        );
        columns
    }
}

impl fmt::Display for TableQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableQuery(")?;
        if !self.filter.is_match_all() {
            write!(f, "filter={}, ", self.filter)?;
        }
        write!(f, "groupBy={}, aggregators=[", self.group_by)?;
        for (idx, a) in self.aggregators.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}({})", a.aggregation, a.column)?;
        }
        f.write_str("])")
    }
}

/// A row as yielded by a source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableRow {
    columns: AHashMap<Arc<str>, Value>,
    aggregates: AHashMap<Arc<str>, Value>,
}

impl TableRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Attach a value the source aggregated itself, keyed by aggregator name.
    pub fn with_aggregate(mut self, aggregator: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.aggregates.insert(aggregator.into(), value.into());
        self
    }

    /// `None` when the column is absent from the row, `Some(Value::Null)` when it is null.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn aggregate(&self, aggregator: &str) -> Option<&Value> {
        self.aggregates.get(aggregator)
    }

    pub fn is_pre_aggregated(&self) -> bool {
        !self.aggregates.is_empty()
    }
}

type RowIter = Box<dyn Iterator<Item = OlapResult<TableRow>> + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// A lazily produced sequence of rows. The close hook runs exactly once, when the stream is
/// dropped, whether or not it was drained.
pub struct RowStream {
    rows: RowIter,
    on_close: Option<CloseHook>,
}

impl RowStream {
    pub fn new(rows: impl Iterator<Item = OlapResult<TableRow>> + Send + 'static) -> Self {
        Self {
            rows: Box::new(rows),
            on_close: None,
        }
    }

    pub fn from_rows(rows: Vec<TableRow>) -> Self {
        Self::new(rows.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        let previous = self.on_close.take();
        self.on_close = Some(Box::new(move || {
            if let Some(previous) = previous {
                previous();
            }
            hook();
        }));
        self
    }
}

impl Iterator for RowStream {
    type Item = OlapResult<TableRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("has_close_hook", &self.on_close.is_some())
            .finish()
    }
}

pub trait TableWrapper: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn column_names(&self) -> Vec<Arc<str>>;

    /// Open a stream for `query`. Unknown tables or columns must fail here rather than yield
    /// an empty stream.
    fn stream_rows(&self, query: &TableQuery) -> OlapResult<RowStream>;
}

/// Row-major table held in memory. Cells may be absent, which is distinct from null.
///
/// By default rows are streamed raw and the engine aggregates them. With
/// [`pre_aggregate`](Self::pre_aggregate) the table groups and aggregates itself and streams
/// one row per group.
#[derive(Clone, Debug)]
pub struct InMemoryTable {
    name: String,
    columns: Vec<Arc<str>>,
    column_index: HashMap<Arc<str>, usize>,
    rows: Arc<Vec<Vec<Option<Value>>>>,
    pre_aggregate: bool,
}

impl InMemoryTable {
    pub fn new<C: Into<Arc<str>>>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        let columns: Vec<Arc<str>> = columns.into_iter().map(Into::into).collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
        Self {
            name: name.into(),
            columns,
            column_index,
            rows: Arc::new(Vec::new()),
            pre_aggregate: false,
        }
    }

    pub fn pre_aggregate(mut self, pre_aggregate: bool) -> Self {
        self.pre_aggregate = pre_aggregate;
        self
    }

    /// Append a row given as `(column, value)` pairs; columns not listed are absent.
    pub fn push_row<C, V>(&mut self, cells: impl IntoIterator<Item = (C, V)>) -> OlapResult<()>
    where
        C: AsRef<str>,
        V: Into<Value>,
    {
        let mut row = vec![None; self.columns.len()];
        for (column, value) in cells {
            let idx = self.index_of(column.as_ref())?;
            row[idx] = Some(value.into());
        }
        Arc::make_mut(&mut self.rows).push(row);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn index_of(&self, column: &str) -> OlapResult<usize> {
        self.column_index
            .get(column)
            .copied()
            .ok_or_else(|| OlapError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    fn scan(&self, query: &TableQuery) -> OlapResult<Vec<TableRow>> {
        let group_by: Vec<(Arc<str>, usize)> = query
            .group_by
            .columns()
            .iter()
            .map(|c| Ok((c.clone(), self.index_of(c)?)))
            .collect::<OlapResult<_>>()?;
        let measured: BTreeMap<Arc<str>, Option<usize>> = query
            .aggregators
            .iter()
            .map(|a| {
                let idx = if a.counts_rows() {
                    None
                } else {
                    Some(self.index_of(&a.column)?)
                };
                Ok((a.column.clone(), idx))
            })
            .collect::<OlapResult<_>>()?;
        for column in query.filter.columns() {
            self.index_of(&column)?;
        }

        let mut out = Vec::new();
        for row in self.rows.iter() {
            let lookup = |column: &str| {
                self.column_index
                    .get(column)
                    .and_then(|&idx| row[idx].as_ref())
            };
            if !query.filter.matches(&lookup) {
                continue;
            }
            let mut table_row = TableRow::new();
            for (column, idx) in &group_by {
                if let Some(value) = &row[*idx] {
                    table_row = table_row.with(column.clone(), value.clone());
                }
            }
            for (column, idx) in &measured {
                if let Some(value) = idx.and_then(|idx| row[idx].as_ref()) {
                    table_row = table_row.with(column.clone(), value.clone());
                }
            }
            out.push(table_row);
        }
        Ok(out)
    }

    fn aggregate(&self, query: &TableQuery, rows: Vec<TableRow>) -> Vec<TableRow> {
        let mut groups: BTreeSet<Slice> = BTreeSet::new();
        let mut columns: Vec<(&Aggregator, MultitypeColumn)> = query
            .aggregators
            .iter()
            .map(|a| (a, MultitypeColumn::new(a.aggregation)))
            .collect();

        'rows: for row in rows {
            let mut pairs = Vec::with_capacity(query.group_by.len());
            for column in query.group_by.columns() {
                let Some(value) = row.get(column) else {
                    continue 'rows;
                };
                pairs.push((column.clone(), value.clone()));
            }
            let slice = Slice::from_pairs(pairs);
            groups.insert(slice.clone());
            for (aggregator, column) in &mut columns {
                if aggregator.counts_rows() {
                    column.contribute_raw(slice.clone()).on_long(1);
                } else if let Some(value) = row.get(&aggregator.column) {
                    column.contribute_raw(slice.clone()).on_value(value.clone());
                }
            }
        }

        let frozen: Vec<(&Aggregator, _)> = columns
            .into_iter()
            .map(|(a, column)| (a, column.freeze()))
            .collect();
        groups
            .into_iter()
            .map(|slice| {
                let mut row = TableRow::new();
                for (column, value) in slice.iter() {
                    row = row.with(column, value.clone());
                }
                for (aggregator, column) in &frozen {
                    if let Some(value) = column.get(&slice) {
                        row = row.with_aggregate(aggregator.name.as_str(), value);
                    }
                }
                row
            })
            .collect()
    }
}

impl TableWrapper for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> Vec<Arc<str>> {
        self.columns.clone()
    }

    fn stream_rows(&self, query: &TableQuery) -> OlapResult<RowStream> {
        let rows = self.scan(query)?;
        log::trace!("{}: {} rows match {query}", self.name, rows.len());
        if self.pre_aggregate {
            return Ok(RowStream::from_rows(self.aggregate(query, rows)));
        }
        Ok(RowStream::from_rows(rows))
    }
}
