//! Measure evaluation engine for cube queries.
//!
//! Measures are named definitions: aggregations of a table column, or transformations of other
//! measures. A [`CubeQuery`] asks for some measures on a filter and a group-by; the
//! [`CubeEngine`] expands them into a graph of [`QueryStep`]s, scans the table once per
//! distinct filter and group-by, and evaluates the derived measures bottom-up into a
//! [`TabularView`].

mod aggregation;
mod column;
mod columns;
mod config;
mod dag;
mod engine;
mod error;
mod evaluator;
mod events;
mod filter;
mod measure;
mod parallel;
mod planner;
mod query;
mod reducer;
mod registry;
mod slice;
mod step;
mod table;
mod value;
mod view;

pub use crate::engine::CubeEngine;
pub use crate::error::{OlapError, OlapResult};
pub use crate::query::{CubeQuery, CubeQueryBuilder, GroupBy, QueryOption};
pub use crate::registry::{MeasureGraph, MeasureRegistry};
pub use crate::value::Value;
pub use crate::view::{assemble_view, TabularView};

pub use crate::aggregation::{AggregationKind, Carrier, Stored};
pub use crate::filter::{Filter, ValueMatcher};
pub use crate::measure::{
    Aggregator, Columnator, ColumnatorMode, Combination, Combinator, Decomposition, Dispatched,
    Dispatchor, DivideCombination, EmptyMeasure, Filtrator, FnCombination, MappingDecomposition,
    MaxCombination, Measure, MinCombination, Partitionor, ProductCombination, SumCombination,
    Unfiltrator,
};
pub use crate::slice::{Slice, SliceBuilder, SliceFactory};

pub use crate::column::{
    FrozenColumn, MultitypeColumn, PreAggregatedReceiver, RawReceiver, ValueReceiver,
};
pub use crate::columns::{ColumnsManager, StandardColumnsManager};
pub use crate::config::EngineConfig;
pub use crate::dag::{QueryStepsDag, StepId};
pub use crate::evaluator::{error_column, DagEvaluator, StepColumns};
pub use crate::events::{explain_dag, LogEventSink, NoopEventSink, QueryEvent, QueryEventSink};
pub use crate::planner::{plan_table_queries, MeasurelessQuery, PlannedTableQuery};
pub use crate::reducer::{reduce, ReducedTableQuery, TableQueryReducer};
pub use crate::step::QueryStep;
pub use crate::table::{InMemoryTable, RowStream, TableQuery, TableRow, TableWrapper};
