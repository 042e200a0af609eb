use crate::filter::Filter;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// The sorted, de-duplicated set of columns a query groups by. Empty means grand total.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<Arc<str>>", into = "Vec<Arc<str>>")]
pub struct GroupBy {
    columns: Vec<Arc<str>>,
}

impl GroupBy {
    pub fn grand_total() -> Self {
        Self::default()
    }

    pub fn of<C: Into<Arc<str>>>(columns: impl IntoIterator<Item = C>) -> Self {
        let set: BTreeSet<Arc<str>> = columns.into_iter().map(Into::into).collect();
        Self {
            columns: set.into_iter().collect(),
        }
    }

    pub fn is_grand_total(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns
            .binary_search_by(|c| c.as_ref().cmp(column))
            .is_ok()
    }

    pub fn union(&self, other: &GroupBy) -> GroupBy {
        GroupBy::of(self.columns.iter().chain(other.columns.iter()).cloned())
    }

    pub fn without<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> GroupBy {
        let removed: BTreeSet<&str> = columns.into_iter().collect();
        GroupBy {
            columns: self
                .columns
                .iter()
                .filter(|c| !removed.contains(c.as_ref()))
                .cloned()
                .collect(),
        }
    }
}

impl From<Vec<Arc<str>>> for GroupBy {
    fn from(columns: Vec<Arc<str>>) -> Self {
        GroupBy::of(columns)
    }
}

impl From<GroupBy> for Vec<Arc<str>> {
    fn from(group_by: GroupBy) -> Self {
        group_by.columns
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return f.write_str("grandTotal");
        }
        f.write_str("(")?;
        for (idx, c) in self.columns.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            f.write_str(c)?;
        }
        f.write_str(")")
    }
}

/// Flags altering how a [`CubeQuery`] is planned, executed, and reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOption {
    /// Render the step DAG through the event sink before executing.
    Explain,
    /// Emit per-step evaluation events.
    Debug,
    /// Resolve unknown measure names to empty measures instead of failing.
    UnknownMeasuresAreEmpty,
    /// Report every step reachable from the queried measures, not only the roots.
    ReturnUnderlyingMeasures,
    /// Run independent table queries on the worker pool.
    Concurrent,
    /// Capture source and evaluation failures as [`Value::Error`] instead of aborting.
    ExceptionsAsMeasureValue,
}

/// The query value object: which measures, on which filter, grouped by which columns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeQuery {
    pub measures: Vec<String>,
    pub filter: Filter,
    pub group_by: GroupBy,
    /// Opaque marker forwarded to every query step and to the table.
    pub custom_marker: Option<Value>,
    pub options: BTreeSet<QueryOption>,
}

impl CubeQuery {
    pub fn builder() -> CubeQueryBuilder {
        CubeQueryBuilder::default()
    }

    pub fn has_option(&self, option: QueryOption) -> bool {
        self.options.contains(&option)
    }
}

#[derive(Debug, Default)]
pub struct CubeQueryBuilder {
    query: CubeQuery,
}

impl CubeQueryBuilder {
    pub fn measure(mut self, name: impl Into<String>) -> Self {
        self.query.measures.push(name.into());
        self
    }

    pub fn measures<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.query.measures.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filter = Filter::and([self.query.filter, filter]);
        self
    }

    pub fn group_by<C: Into<Arc<str>>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.query.group_by = self.query.group_by.union(&GroupBy::of(columns));
        self
    }

    pub fn custom_marker(mut self, marker: impl Into<Value>) -> Self {
        self.query.custom_marker = Some(marker.into());
        self
    }

    pub fn option(mut self, option: QueryOption) -> Self {
        self.query.options.insert(option);
        self
    }

    pub fn build(self) -> CubeQuery {
        self.query
    }
}
