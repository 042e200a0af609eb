use crate::columns::{ColumnsManager, StandardColumnsManager};
use crate::column::FrozenColumn;
use crate::config::EngineConfig;
use crate::dag::{QueryStepsDag, StepId};
use crate::error::OlapResult;
use crate::evaluator::{error_column, DagEvaluator, StepColumns};
use crate::events::{explain_dag, NoopEventSink, QueryEvent, QueryEventSink};
use crate::measure::Measure;
use crate::planner::{plan_table_queries, PlannedTableQuery};
use crate::query::{CubeQuery, QueryOption};
use crate::reducer::reduce;
use crate::registry::MeasureRegistry;
use crate::slice::Slice;
use crate::step::QueryStep;
use crate::table::TableWrapper;
use crate::view::{assemble_view, TabularView};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::parallel::TableQueryPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use dashmap::DashMap;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::prelude::*;

/// Runs [`CubeQuery`]s against one table with one set of measures.
///
/// A query goes through five phases: the requested measures are expanded into a step graph,
/// its aggregator leaves are grouped into table queries, each table query is streamed and
/// aggregated, the remaining steps are evaluated bottom-up, and the queried steps are copied
/// into a [`TabularView`]. Only the third phase may run in parallel; evaluation starts once
/// every table query has completed.
pub struct CubeEngine {
    registry: Arc<MeasureRegistry>,
    table: Arc<dyn TableWrapper>,
    columns_manager: Arc<dyn ColumnsManager>,
    custom_columns_manager: bool,
    sink: Arc<dyn QueryEventSink>,
    config: EngineConfig,
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    pool: TableQueryPool,
}

impl fmt::Debug for CubeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CubeEngine")
            .field("measures", &self.registry.len())
            .field("table", &self.table.name())
            .field("columns_manager", &self.columns_manager)
            .field("config", &self.config)
            .finish()
    }
}

impl CubeEngine {
    pub fn new(registry: MeasureRegistry, table: impl TableWrapper + 'static) -> Self {
        Self::with_shared(Arc::new(registry), Arc::new(table))
    }

    /// Share one registry and table between several engines.
    pub fn with_shared(registry: Arc<MeasureRegistry>, table: Arc<dyn TableWrapper>) -> Self {
        let config = EngineConfig::default();
        Self {
            registry,
            table,
            columns_manager: Arc::new(default_columns_manager(&config)),
            custom_columns_manager: false,
            sink: Arc::new(NoopEventSink),
            #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
            pool: TableQueryPool::new(config.max_table_threads),
            config,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if !self.custom_columns_manager {
            self.columns_manager = Arc::new(default_columns_manager(&config));
        }
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            self.pool = TableQueryPool::new(config.max_table_threads);
        }
        self.config = config;
        self
    }

    pub fn with_columns_manager(mut self, columns_manager: impl ColumnsManager + 'static) -> Self {
        self.columns_manager = Arc::new(columns_manager);
        self.custom_columns_manager = true;
        self
    }

    pub fn with_event_sink(mut self, sink: impl QueryEventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn registry(&self) -> &MeasureRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn execute(&self, query: &CubeQuery) -> OlapResult<TabularView> {
        let started = Instant::now();
        self.sink.on_event(&QueryEvent::QueryStarted {
            query: describe(query),
        });

        let dag = self.build_dag(query)?;
        if query.has_option(QueryOption::Explain) || query.has_option(QueryOption::Debug) {
            self.sink.on_event(&QueryEvent::Explain {
                lines: explain_dag(&dag),
            });
        }

        let planned = plan_table_queries(
            &dag,
            &self.columns_manager.generated_columns(),
            query.has_option(QueryOption::Explain),
        )?;
        for p in &planned {
            self.sink.on_event(&QueryEvent::TableQueryPlanned {
                table_query: p.table_query.to_string(),
            });
        }

        let mut columns: StepColumns = vec![None; dag.len()];
        self.run_table_queries(&planned, query, &mut columns)?;

        DagEvaluator::new(&dag, self.sink.as_ref())
            .exceptions_as_values(query.has_option(QueryOption::ExceptionsAsMeasureValue))
            .debug(query.has_option(QueryOption::Debug))
            .evaluate(&mut columns)?;

        let mut view = assemble_view(
            &dag,
            &columns,
            query.has_option(QueryOption::ReturnUnderlyingMeasures),
        );
        // A grand-total query reports its single slice even when nothing matched.
        if query.group_by.is_grand_total() {
            view.ensure_slice(Slice::grand_total());
        }
        self.sink.on_event(&QueryEvent::QueryCompleted {
            slices: view.len(),
            duration: started.elapsed(),
        });
        Ok(view)
    }

    fn build_dag(&self, query: &CubeQuery) -> OlapResult<QueryStepsDag> {
        let lenient = query.has_option(QueryOption::UnknownMeasuresAreEmpty);
        self.registry.check_reachable(&query.measures, lenient)?;

        let registry = &self.registry;
        let resolve = move |name: &str| -> OlapResult<Arc<Measure>> {
            if lenient {
                Ok(registry.resolve_lenient(name))
            } else {
                registry.resolve(name)
            }
        };
        let roots = query
            .measures
            .iter()
            .map(|name| {
                Ok(QueryStep::new(
                    resolve(name)?,
                    query.filter.clone(),
                    query.group_by.clone(),
                    query.custom_marker.clone(),
                ))
            })
            .collect::<OlapResult<Vec<_>>>()?;
        QueryStepsDag::build(roots, &resolve)
    }

    fn run_table_queries(
        &self,
        planned: &[PlannedTableQuery],
        query: &CubeQuery,
        columns: &mut StepColumns,
    ) -> OlapResult<()> {
        let capture = query.has_option(QueryOption::ExceptionsAsMeasureValue);

        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            if query.has_option(QueryOption::Concurrent) && planned.len() > 1 {
                if let Some(pool) = self.pool.get() {
                    let results: DashMap<StepId, FrozenColumn> = DashMap::new();
                    pool.install(|| {
                        planned.par_iter().try_for_each(|p| {
                            for (id, column) in self.table_query_columns(p, capture)? {
                                results.insert(id, column);
                            }
                            Ok::<(), crate::error::OlapError>(())
                        })
                    })?;
                    for (id, column) in results {
                        columns[id] = Some(Arc::new(column));
                    }
                    return Ok(());
                }
            }
        }

        for p in planned {
            for (id, column) in self.table_query_columns(p, capture)? {
                columns[id] = Some(Arc::new(column));
            }
        }
        Ok(())
    }

    fn table_query_columns(
        &self,
        planned: &PlannedTableQuery,
        capture: bool,
    ) -> OlapResult<Vec<(StepId, FrozenColumn)>> {
        match self.run_table_query(planned) {
            Ok(columns) => Ok(columns),
            Err(err) if capture && !err.is_state() => {
                log::debug!("{} failed, captured as value: {err}", planned.table_query);
                let message = err.to_string();
                Ok(planned
                    .step_ids()
                    .map(|id| (id, error_column(&planned.group_by, &message)))
                    .collect())
            }
            Err(err) => Err(err),
        }
    }

    fn run_table_query(&self, planned: &PlannedTableQuery) -> OlapResult<Vec<(StepId, FrozenColumn)>> {
        let started = Instant::now();
        let stream = self
            .columns_manager
            .open_table_stream(self.table.as_ref(), &planned.table_query)?;
        let reduced = reduce(
            planned,
            stream,
            self.columns_manager.as_ref(),
            &self.config.generated_placeholder,
        )?;
        self.sink.on_event(&QueryEvent::TableQueryCompleted {
            table_query: planned.table_query.to_string(),
            rows: reduced.rows,
            duration: started.elapsed(),
        });
        Ok(reduced.columns)
    }
}

fn default_columns_manager(config: &EngineConfig) -> StandardColumnsManager {
    StandardColumnsManager::new().with_default_null(config.null_placeholder.clone())
}

fn describe(query: &CubeQuery) -> String {
    let mut out = format!("measures={:?}", query.measures);
    if !query.filter.is_match_all() {
        out.push_str(&format!(" filter={}", query.filter));
    }
    out.push_str(&format!(" groupBy={}", query.group_by));
    out
}
