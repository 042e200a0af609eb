//! Query lifecycle events and the explain renderer.
//!
//! The engine never logs tracing output on its own: it reports to the [`QueryEventSink`] the
//! caller injected. [`LogEventSink`] forwards to the `log` facade.

use crate::dag::{QueryStepsDag, StepId};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    QueryStarted {
        query: String,
    },
    TableQueryPlanned {
        table_query: String,
    },
    TableQueryCompleted {
        table_query: String,
        rows: usize,
        duration: Duration,
    },
    StepEvaluated {
        step: String,
        slices: usize,
    },
    Explain {
        lines: Vec<String>,
    },
    QueryCompleted {
        slices: usize,
        duration: Duration,
    },
}

/// Receives events, possibly from several table-query workers at once.
pub trait QueryEventSink: Send + Sync {
    fn on_event(&self, event: &QueryEvent);
}

impl<T: QueryEventSink + ?Sized> QueryEventSink for Arc<T> {
    fn on_event(&self, event: &QueryEvent) {
        (**self).on_event(event)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl QueryEventSink for NoopEventSink {
    fn on_event(&self, _event: &QueryEvent) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventSink;

impl QueryEventSink for LogEventSink {
    fn on_event(&self, event: &QueryEvent) {
        match event {
            QueryEvent::QueryStarted { query } => log::debug!("executing {query}"),
            QueryEvent::TableQueryPlanned { table_query } => log::debug!("planned {table_query}"),
            QueryEvent::TableQueryCompleted {
                table_query,
                rows,
                duration,
            } => log::debug!("{table_query} streamed {rows} rows in {duration:?}"),
            QueryEvent::StepEvaluated { step, slices } => {
                log::trace!("evaluated {step}: {slices} slices")
            }
            QueryEvent::Explain { lines } => {
                for line in lines {
                    log::info!("{line}");
                }
            }
            QueryEvent::QueryCompleted { slices, duration } => {
                log::debug!("query returned {slices} slices in {duration:?}")
            }
        }
    }
}

/// Render the step graph as one tree per root. Children are listed per underlying position;
/// a step already printed is referenced as `!<id>` instead of being expanded again.
pub fn explain_dag(dag: &QueryStepsDag) -> Vec<String> {
    let mut lines = Vec::new();
    let mut printed = vec![false; dag.len()];
    for &root in dag.roots() {
        explain_step(dag, root, "", true, &mut printed, &mut lines);
    }
    lines
}

fn explain_step(
    dag: &QueryStepsDag,
    id: StepId,
    indent: &str,
    is_root: bool,
    printed: &mut [bool],
    lines: &mut Vec<String>,
) {
    let branch = if is_root { "" } else { "\\-- " };
    if printed[id] {
        lines.push(format!("{indent}{branch}!{id}"));
        return;
    }
    printed[id] = true;
    lines.push(format!("{indent}{branch}#{id} {}", dag.step(id)));

    let child_indent = if is_root {
        indent.to_string()
    } else {
        format!("{indent}    ")
    };
    for &child in dag.underlying_positions(id) {
        explain_step(dag, child, &child_indent, false, printed, lines);
    }
}
