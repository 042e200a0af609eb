use crate::parallel::{available_threads, desired_threads};
use crate::value::Value;

/// Engine-wide settings, shared by every query the engine runs.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on table queries running at once under [`QueryOption::Concurrent`].
    ///
    /// [`QueryOption::Concurrent`]: crate::QueryOption::Concurrent
    pub max_table_threads: usize,
    /// Group-by coordinate for null cells when the columns manager has no specific replacement.
    pub null_placeholder: Value,
    /// Coordinate given to generated group-by columns removed from table queries.
    pub generated_placeholder: Value,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_table_threads: available_threads(),
            null_placeholder: Value::Null,
            generated_placeholder: Value::from("*"),
        }
    }
}

impl EngineConfig {
    /// Defaults, with the worker count read from `FORMULA_OLAP_THREADS` or `RAYON_NUM_THREADS`.
    pub fn from_env() -> Self {
        Self {
            max_table_threads: desired_threads(),
            ..Self::default()
        }
    }

    pub fn with_max_table_threads(mut self, threads: usize) -> Self {
        self.max_table_threads = threads.max(1);
        self
    }

    pub fn with_null_placeholder(mut self, value: impl Into<Value>) -> Self {
        self.null_placeholder = value.into();
        self
    }

    pub fn with_generated_placeholder(mut self, value: impl Into<Value>) -> Self {
        self.generated_placeholder = value.into();
        self
    }
}
