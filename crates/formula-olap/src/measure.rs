//! Measure definitions.
//!
//! Measure kinds form a closed enum so every consumer (step expansion, evaluation, planning,
//! explain) matches exhaustively. The operators a derived measure applies are open traits:
//! [`Combination`] for per-slice combinations of underlying values and [`Decomposition`] for
//! dispatching one underlying coordinate onto several output coordinates.

use crate::aggregation::AggregationKind;
use crate::error::{OlapError, OlapResult};
use crate::filter::Filter;
use crate::query::GroupBy;
use crate::slice::Slice;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Combines the ordered underlying values of one slice. `None` inputs are underlyings without
/// a value for the slice; returning `None` leaves the slice out of the result.
pub trait Combination: Send + Sync + fmt::Debug {
    fn key(&self) -> &str;

    /// Reject an unsupported number of underlyings when the measure is expanded.
    fn check_arity(&self, _arity: usize) -> OlapResult<()> {
        Ok(())
    }

    fn combine(&self, slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SumCombination;

impl Combination for SumCombination {
    fn key(&self) -> &str {
        "SUM"
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        Ok(fold_present(AggregationKind::Sum, underlyings))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MaxCombination;

impl Combination for MaxCombination {
    fn key(&self) -> &str {
        "MAX"
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        Ok(fold_present(AggregationKind::Max, underlyings))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MinCombination;

impl Combination for MinCombination {
    fn key(&self) -> &str {
        "MIN"
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        Ok(fold_present(AggregationKind::Min, underlyings))
    }
}

fn fold_present(kind: AggregationKind, underlyings: &[Option<Value>]) -> Option<Value> {
    let value = kind.aggregate_values(underlyings.iter().flatten().cloned());
    (!value.is_null()).then_some(value)
}

/// Product of all underlyings; absent when any underlying is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProductCombination;

impl Combination for ProductCombination {
    fn key(&self) -> &str {
        "PRODUCT"
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        let mut long: Option<i64> = Some(1);
        let mut double = 1.0f64;
        for value in underlyings {
            let Some(value) = value else {
                return Ok(None);
            };
            match value {
                Value::Long(v) => {
                    long = long.and_then(|acc| acc.checked_mul(*v));
                    double *= *v as f64;
                }
                Value::Double(v) => {
                    long = None;
                    double *= v;
                }
                other => {
                    return Err(OlapError::InvalidArgument(format!(
                        "PRODUCT expects numbers, got {other}"
                    )))
                }
            }
        }
        Ok(Some(match long {
            Some(v) => Value::Long(v),
            None => Value::Double(double),
        }))
    }
}

/// `numerator / denominator`; absent when the numerator is absent or the denominator is zero
/// or absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DivideCombination;

impl Combination for DivideCombination {
    fn key(&self) -> &str {
        "DIVIDE"
    }

    fn check_arity(&self, arity: usize) -> OlapResult<()> {
        if arity != 2 {
            return Err(OlapError::InvalidArgument(format!(
                "DIVIDE expects 2 underlyings, got {arity}"
            )));
        }
        Ok(())
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        let [Some(numerator), Some(denominator)] = underlyings else {
            return Ok(None);
        };
        let (Some(n), Some(d)) = (numerator.as_f64(), denominator.as_f64()) else {
            return Err(OlapError::InvalidArgument(format!(
                "DIVIDE expects numbers, got {numerator} / {denominator}"
            )));
        };
        if d == 0.0 {
            return Ok(None);
        }
        Ok(Some(Value::Double(n / d)))
    }
}

type CombineFn = dyn Fn(&[Option<Value>]) -> Option<Value> + Send + Sync;

/// A combination backed by a closure, e.g. squaring a single underlying.
#[derive(Clone)]
pub struct FnCombination {
    key: String,
    f: Arc<CombineFn>,
}

impl FnCombination {
    pub fn new(
        key: impl Into<String>,
        f: impl Fn(&[Option<Value>]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCombination").field("key", &self.key).finish()
    }
}

impl Combination for FnCombination {
    fn key(&self) -> &str {
        &self.key
    }

    fn combine(&self, _slice: &Slice, underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        Ok((self.f)(underlyings))
    }
}

/// One dispatched output: coordinates for the output columns and the value they receive.
pub type Dispatched = (Vec<(Arc<str>, Value)>, Value);

/// Spreads the value of one underlying slice onto coordinates of output columns.
pub trait Decomposition: Send + Sync + fmt::Debug {
    fn key(&self) -> &str;

    /// Columns the underlying step must be grouped by to decompose.
    fn input_columns(&self) -> Vec<Arc<str>>;

    /// Columns the decomposition produces coordinates for.
    fn output_columns(&self) -> Vec<Arc<str>>;

    fn decompose(&self, slice: &Slice, value: &Value) -> OlapResult<Vec<Dispatched>>;
}

/// Maps each coordinate of `input_column` to weighted coordinates of `output_column`.
/// Inputs without a mapping are dispatched to the null coordinate with their full value.
#[derive(Clone, Debug)]
pub struct MappingDecomposition {
    input_column: Arc<str>,
    output_column: Arc<str>,
    mapping: BTreeMap<Value, Vec<(Value, f64)>>,
}

impl MappingDecomposition {
    pub fn new(input_column: impl Into<Arc<str>>, output_column: impl Into<Arc<str>>) -> Self {
        Self {
            input_column: input_column.into(),
            output_column: output_column.into(),
            mapping: BTreeMap::new(),
        }
    }

    pub fn map(
        mut self,
        input: impl Into<Value>,
        output: impl Into<Value>,
        weight: f64,
    ) -> Self {
        self.mapping
            .entry(input.into())
            .or_default()
            .push((output.into(), weight));
        self
    }
}

impl Decomposition for MappingDecomposition {
    fn key(&self) -> &str {
        "MAPPING"
    }

    fn input_columns(&self) -> Vec<Arc<str>> {
        vec![self.input_column.clone()]
    }

    fn output_columns(&self) -> Vec<Arc<str>> {
        vec![self.output_column.clone()]
    }

    fn decompose(&self, slice: &Slice, value: &Value) -> OlapResult<Vec<Dispatched>> {
        let input = slice.get(&self.input_column).ok_or_else(|| {
            OlapError::IllegalState(format!(
                "{} is missing from underlying slice {slice}",
                self.input_column
            ))
        })?;
        let Some(targets) = self.mapping.get(input) else {
            return Ok(vec![(
                vec![(self.output_column.clone(), Value::Null)],
                value.clone(),
            )]);
        };
        targets
            .iter()
            .map(|(output, weight)| {
                let weighted = scale(value, *weight)?;
                Ok((vec![(self.output_column.clone(), output.clone())], weighted))
            })
            .collect()
    }
}

fn scale(value: &Value, weight: f64) -> OlapResult<Value> {
    if weight == 1.0 {
        return Ok(value.clone());
    }
    match value.as_f64() {
        Some(v) => Ok(Value::Double(v * weight)),
        None if value.is_error() => Ok(value.clone()),
        None => Err(OlapError::InvalidArgument(format!(
            "cannot weight non-numeric value {value}"
        ))),
    }
}

/// A leaf measure aggregating a source column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Aggregator {
    pub name: String,
    pub column: Arc<str>,
    pub aggregation: AggregationKind,
}

impl Aggregator {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<Arc<str>>,
        aggregation: AggregationKind,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            aggregation,
        }
    }

    pub fn sum(name: impl Into<String>, column: impl Into<Arc<str>>) -> Self {
        Self::new(name, column, AggregationKind::Sum)
    }

    /// Counts rows (`COUNT(*)`).
    pub fn count_rows(name: impl Into<String>) -> Self {
        Self::new(name, "*", AggregationKind::Count)
    }

    pub fn counts_rows(&self) -> bool {
        self.column.as_ref() == "*"
    }
}

#[derive(Clone, Debug)]
pub struct Combinator {
    pub name: String,
    pub underlyings: Vec<String>,
    pub combination: Arc<dyn Combination>,
}

impl Combinator {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        underlyings: impl IntoIterator<Item = S>,
        combination: impl Combination + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            underlyings: underlyings.into_iter().map(Into::into).collect(),
            combination: Arc::new(combination),
        }
    }
}

/// Its underlying evaluated with an additional filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Filtrator {
    pub name: String,
    pub underlying: String,
    pub filter: Filter,
}

impl Filtrator {
    pub fn new(name: impl Into<String>, underlying: impl Into<String>, filter: Filter) -> Self {
        Self {
            name: name.into(),
            underlying: underlying.into(),
            filter,
        }
    }
}

/// Its underlying evaluated with the query filter relaxed on some columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Unfiltrator {
    pub name: String,
    pub underlying: String,
    pub columns: Vec<Arc<str>>,
}

impl Unfiltrator {
    pub fn new<C: Into<Arc<str>>>(
        name: impl Into<String>,
        underlying: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        Self {
            name: name.into(),
            underlying: underlying.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Combines underlyings at a finer granularity, then rolls up to the query's group-by.
#[derive(Clone, Debug)]
pub struct Partitionor {
    pub name: String,
    pub underlyings: Vec<String>,
    pub group_by: GroupBy,
    pub combination: Arc<dyn Combination>,
    pub aggregation: AggregationKind,
}

impl Partitionor {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        underlyings: impl IntoIterator<Item = S>,
        group_by: GroupBy,
        combination: impl Combination + 'static,
        aggregation: AggregationKind,
    ) -> Self {
        Self {
            name: name.into(),
            underlyings: underlyings.into_iter().map(Into::into).collect(),
            group_by,
            combination: Arc::new(combination),
            aggregation,
        }
    }
}

/// Dispatches each underlying slice onto output coordinates, then aggregates.
#[derive(Clone, Debug)]
pub struct Dispatchor {
    pub name: String,
    pub underlying: String,
    pub decomposition: Arc<dyn Decomposition>,
    pub aggregation: AggregationKind,
}

impl Dispatchor {
    pub fn new(
        name: impl Into<String>,
        underlying: impl Into<String>,
        decomposition: impl Decomposition + 'static,
        aggregation: AggregationKind,
    ) -> Self {
        Self {
            name: name.into(),
            underlying: underlying.into(),
            decomposition: Arc::new(decomposition),
            aggregation,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnatorMode {
    /// Only produce values when every required column is grouped by.
    HideIfMissing,
    /// Only produce values when none of the required columns is grouped by.
    HideIfPresent,
}

/// A combinator that is conditionally absent depending on the query's group-by.
#[derive(Clone, Debug)]
pub struct Columnator {
    pub name: String,
    pub underlyings: Vec<String>,
    pub combination: Arc<dyn Combination>,
    pub required_columns: Vec<Arc<str>>,
    pub mode: ColumnatorMode,
}

impl Columnator {
    pub fn new<S: Into<String>, C: Into<Arc<str>>>(
        name: impl Into<String>,
        underlyings: impl IntoIterator<Item = S>,
        combination: impl Combination + 'static,
        required_columns: impl IntoIterator<Item = C>,
        mode: ColumnatorMode,
    ) -> Self {
        Self {
            name: name.into(),
            underlyings: underlyings.into_iter().map(Into::into).collect(),
            combination: Arc::new(combination),
            required_columns: required_columns.into_iter().map(Into::into).collect(),
            mode,
        }
    }

    /// Whether the measure is active for `group_by`.
    pub fn is_active(&self, group_by: &GroupBy) -> bool {
        match self.mode {
            ColumnatorMode::HideIfMissing => {
                self.required_columns.iter().all(|c| group_by.contains(c))
            }
            ColumnatorMode::HideIfPresent => {
                !self.required_columns.iter().any(|c| group_by.contains(c))
            }
        }
    }
}

/// Placeholder for a measure name that could not be resolved; never yields a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EmptyMeasure {
    pub name: String,
}

#[derive(Clone, Debug)]
pub enum Measure {
    Aggregator(Aggregator),
    Combinator(Combinator),
    Filtrator(Filtrator),
    Unfiltrator(Unfiltrator),
    Partitionor(Partitionor),
    Dispatchor(Dispatchor),
    Columnator(Columnator),
    Empty(EmptyMeasure),
}

impl Measure {
    pub fn empty(name: impl Into<String>) -> Self {
        Measure::Empty(EmptyMeasure { name: name.into() })
    }

    pub fn name(&self) -> &str {
        match self {
            Measure::Aggregator(m) => &m.name,
            Measure::Combinator(m) => &m.name,
            Measure::Filtrator(m) => &m.name,
            Measure::Unfiltrator(m) => &m.name,
            Measure::Partitionor(m) => &m.name,
            Measure::Dispatchor(m) => &m.name,
            Measure::Columnator(m) => &m.name,
            Measure::Empty(m) => &m.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Measure::Aggregator(_) => "Aggregator",
            Measure::Combinator(_) => "Combinator",
            Measure::Filtrator(_) => "Filtrator",
            Measure::Unfiltrator(_) => "Unfiltrator",
            Measure::Partitionor(_) => "Partitionor",
            Measure::Dispatchor(_) => "Dispatchor",
            Measure::Columnator(_) => "Columnator",
            Measure::Empty(_) => "EmptyMeasure",
        }
    }

    /// Names of the measures this one depends on, in underlying order (duplicates kept).
    pub fn underlying_names(&self) -> Vec<&str> {
        match self {
            Measure::Aggregator(_) | Measure::Empty(_) => Vec::new(),
            Measure::Combinator(m) => m.underlyings.iter().map(String::as_str).collect(),
            Measure::Partitionor(m) => m.underlyings.iter().map(String::as_str).collect(),
            Measure::Columnator(m) => m.underlyings.iter().map(String::as_str).collect(),
            Measure::Filtrator(m) => vec![m.underlying.as_str()],
            Measure::Unfiltrator(m) => vec![m.underlying.as_str()],
            Measure::Dispatchor(m) => vec![m.underlying.as_str()],
        }
    }

    pub fn as_aggregator(&self) -> Option<&Aggregator> {
        match self {
            Measure::Aggregator(a) => Some(a),
            _ => None,
        }
    }

    fn identity_key(&self) -> String {
        match self {
            Measure::Aggregator(m) => format!("{}({})", m.aggregation, m.column),
            Measure::Combinator(m) => format!("{}{:?}", m.combination.key(), m.underlyings),
            Measure::Filtrator(m) => format!("{}[{}]", m.underlying, m.filter),
            Measure::Unfiltrator(m) => format!("{}[-{:?}]", m.underlying, m.columns),
            Measure::Partitionor(m) => format!(
                "{}{:?}/{}/{}",
                m.combination.key(),
                m.underlyings,
                m.group_by,
                m.aggregation
            ),
            Measure::Dispatchor(m) => format!(
                "{}({})/{}",
                m.aggregation,
                m.underlying,
                m.decomposition.key()
            ),
            Measure::Columnator(m) => format!(
                "{}{:?}/{:?}/{:?}",
                m.combination.key(),
                m.underlyings,
                m.required_columns,
                m.mode
            ),
            Measure::Empty(_) => String::new(),
        }
    }
}

// Measures are compared by kind, name, and definition key. Trait-object operators compare by
// their `key()`; a registry never holds two definitions under the same name.
impl PartialEq for Measure {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.name() == other.name()
            && self.identity_key() == other.identity_key()
    }
}

impl Eq for Measure {}

impl Hash for Measure {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.name().hash(state);
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Aggregator(a) => write!(f, "{}={}({})", a.name, a.aggregation, a.column),
            Measure::Empty(e) => write!(f, "{}=<empty>", e.name),
            other => write!(f, "{}={}", other.name(), other.kind()),
        }
    }
}

impl From<Aggregator> for Measure {
    fn from(m: Aggregator) -> Self {
        Measure::Aggregator(m)
    }
}

impl From<Combinator> for Measure {
    fn from(m: Combinator) -> Self {
        Measure::Combinator(m)
    }
}

impl From<Filtrator> for Measure {
    fn from(m: Filtrator) -> Self {
        Measure::Filtrator(m)
    }
}

impl From<Unfiltrator> for Measure {
    fn from(m: Unfiltrator) -> Self {
        Measure::Unfiltrator(m)
    }
}

impl From<Partitionor> for Measure {
    fn from(m: Partitionor) -> Self {
        Measure::Partitionor(m)
    }
}

impl From<Dispatchor> for Measure {
    fn from(m: Dispatchor) -> Self {
        Measure::Dispatchor(m)
    }
}

impl From<Columnator> for Measure {
    fn from(m: Columnator) -> Self {
        Measure::Columnator(m)
    }
}

impl From<EmptyMeasure> for Measure {
    fn from(m: EmptyMeasure) -> Self {
        Measure::Empty(m)
    }
}
