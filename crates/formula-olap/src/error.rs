pub type OlapResult<T> = Result<T, OlapError>;

#[derive(Debug, thiserror::Error)]
pub enum OlapError {
    #[error("duplicate measure: {measure}")]
    DuplicateMeasure { measure: String },

    #[error("unknown measure: {0}")]
    UnknownMeasure(String),

    #[error("measure {measure} references unknown measure {underlying}")]
    UnknownUnderlying { measure: String, underlying: String },

    #[error("cyclic measure dependency: {}", path.join(" -> "))]
    CyclicMeasures { path: Vec<String> },

    #[error("expected simple aggregator at leaf step {step}")]
    ExpectedSimpleAggregator { step: String },

    #[error("edge {parent} -> {child} would complete a cycle")]
    CyclicSteps { parent: String, child: String },

    #[error("inconsistent step graph: {0}")]
    InconsistentDag(String),

    #[error("DAG missed step {step}")]
    DagMissedStep { step: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid measure configuration at step {step}: {source}")]
    StepArgument {
        step: String,
        #[source]
        source: Box<OlapError>,
    },

    #[error("internal failure at step {step}: {source}")]
    StepState {
        step: String,
        #[source]
        source: Box<OlapError>,
    },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}[{column}]")]
    UnknownColumn { table: String, column: String },

    #[error("source error: {0}")]
    Source(String),
}

impl OlapError {
    /// Whether this error denotes an internal inconsistency rather than a bad definition or query.
    pub fn is_state(&self) -> bool {
        match self {
            OlapError::ExpectedSimpleAggregator { .. }
            | OlapError::CyclicSteps { .. }
            | OlapError::InconsistentDag(_)
            | OlapError::DagMissedStep { .. }
            | OlapError::IllegalState(_)
            | OlapError::StepState { .. } => true,
            OlapError::DuplicateMeasure { .. }
            | OlapError::UnknownMeasure(_)
            | OlapError::UnknownUnderlying { .. }
            | OlapError::CyclicMeasures { .. }
            | OlapError::InvalidArgument(_)
            | OlapError::StepArgument { .. }
            | OlapError::UnknownTable(_)
            | OlapError::UnknownColumn { .. }
            | OlapError::Source(_) => false,
        }
    }

    /// Wrap a failure raised while expanding or evaluating `step`.
    pub(crate) fn at_step(self, step: impl ToString) -> OlapError {
        let step = step.to_string();
        if self.is_state() {
            OlapError::StepState {
                step,
                source: Box::new(self),
            }
        } else {
            OlapError::StepArgument {
                step,
                source: Box::new(self),
            }
        }
    }

    /// Failures of the row source, as opposed to definition/planning failures.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            OlapError::UnknownTable(_) | OlapError::UnknownColumn { .. } | OlapError::Source(_)
        )
    }
}
