use crate::error::OlapResult;
use crate::table::{RowStream, TableQuery, TableWrapper};
use crate::value::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Sits between the engine and the table: knows which columns only exist logically and how
/// null group-by coordinates are represented.
pub trait ColumnsManager: fmt::Debug + Send + Sync {
    /// Columns produced by a transformation rather than stored in the table. They are removed
    /// from table queries and reconstituted with a placeholder coordinate.
    fn generated_columns(&self) -> BTreeSet<Arc<str>> {
        BTreeSet::new()
    }

    /// Coordinate used when a row provides `column` as null.
    fn on_missing_column(&self, column: &str) -> Value;

    fn open_table_stream(
        &self,
        table: &dyn TableWrapper,
        query: &TableQuery,
    ) -> OlapResult<RowStream> {
        table.stream_rows(query)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StandardColumnsManager {
    generated: BTreeSet<Arc<str>>,
    null_replacements: HashMap<Arc<str>, Value>,
    default_null: Value,
}

impl StandardColumnsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generated_column(mut self, column: impl Into<Arc<str>>) -> Self {
        self.generated.insert(column.into());
        self
    }

    pub fn with_null_replacement(
        mut self,
        column: impl Into<Arc<str>>,
        value: impl Into<Value>,
    ) -> Self {
        self.null_replacements.insert(column.into(), value.into());
        self
    }

    /// Replacement for columns without a specific one.
    pub fn with_default_null(mut self, value: impl Into<Value>) -> Self {
        self.default_null = value.into();
        self
    }
}

impl ColumnsManager for StandardColumnsManager {
    fn generated_columns(&self) -> BTreeSet<Arc<str>> {
        self.generated.clone()
    }

    fn on_missing_column(&self, column: &str) -> Value {
        self.null_replacements
            .get(column)
            .unwrap_or(&self.default_null)
            .clone()
    }
}
