//! Row filters.
//!
//! Filters are plain values (`Eq + Hash`) because they are part of a query step's identity:
//! two steps only collapse into one DAG node when their filters are equal. The `and`/`or`
//! constructors normalize trivial shapes so that logically identical filters built along
//! different measure paths usually compare equal too.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMatcher {
    Equals(Value),
    In(BTreeSet<Value>),
    IsNull,
    Comparing {
        operand: Value,
        greater: bool,
        strict: bool,
    },
    /// SQL `LIKE` pattern: `%` matches any run, `_` matches one character.
    Like(String),
}

impl ValueMatcher {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueMatcher::Equals(expected) => expected == value || numeric_eq(expected, value),
            ValueMatcher::In(expected) => {
                expected.contains(value) || expected.iter().any(|e| numeric_eq(e, value))
            }
            ValueMatcher::IsNull => value.is_null(),
            ValueMatcher::Comparing {
                operand,
                greater,
                strict,
            } => {
                if value.is_null() || value.is_error() {
                    return false;
                }
                let ord = match (value.as_f64(), operand.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    _ => value.cmp(operand),
                };
                match (ord, greater, strict) {
                    (Ordering::Equal, _, strict) => !strict,
                    (Ordering::Greater, greater, _) => *greater,
                    (Ordering::Less, greater, _) => !*greater,
                }
            }
            ValueMatcher::Like(pattern) => match value {
                Value::Text(s) => like_matches(pattern, s),
                _ => false,
            },
        }
    }
}

fn numeric_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Long(_), Value::Double(_)) | (Value::Double(_), Value::Long(_)) => {
            a.as_f64() == b.as_f64()
        }
        _ => false,
    }
}

fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    // Classic two-pointer wildcard match with backtracking on the last `%`.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    MatchAll,
    MatchNone,
    Column {
        column: Arc<str>,
        matcher: ValueMatcher,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn column(column: impl Into<Arc<str>>, matcher: ValueMatcher) -> Self {
        Filter::Column {
            column: column.into(),
            matcher,
        }
    }

    pub fn equals(column: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        Self::column(column, ValueMatcher::Equals(value.into()))
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<Arc<str>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::column(
            column,
            ValueMatcher::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::MatchAll)
    }

    /// Conjunction, flattening nested `And`s and dropping `MatchAll` operands.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands: Vec<Filter> = Vec::new();
        for filter in filters {
            match filter {
                Filter::MatchAll => {}
                Filter::MatchNone => return Filter::MatchNone,
                Filter::And(inner) => {
                    for f in inner {
                        if !operands.contains(&f) {
                            operands.push(f);
                        }
                    }
                }
                other => {
                    if !operands.contains(&other) {
                        operands.push(other);
                    }
                }
            }
        }
        match operands.len() {
            0 => Filter::MatchAll,
            1 => operands.pop().unwrap_or_default(),
            _ => Filter::And(operands),
        }
    }

    /// Disjunction, flattening nested `Or`s and dropping `MatchNone` operands.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands: Vec<Filter> = Vec::new();
        for filter in filters {
            match filter {
                Filter::MatchNone => {}
                Filter::MatchAll => return Filter::MatchAll,
                Filter::Or(inner) => {
                    for f in inner {
                        if !operands.contains(&f) {
                            operands.push(f);
                        }
                    }
                }
                other => {
                    if !operands.contains(&other) {
                        operands.push(other);
                    }
                }
            }
        }
        match operands.len() {
            0 => Filter::MatchNone,
            1 => operands.pop().unwrap_or(Filter::MatchNone),
            _ => Filter::Or(operands),
        }
    }

    pub fn not(filter: Filter) -> Self {
        match filter {
            Filter::MatchAll => Filter::MatchNone,
            Filter::MatchNone => Filter::MatchAll,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// Evaluate against a row. Columns the row does not carry are read as [`Value::Null`].
    pub fn matches<'a>(&self, lookup: &impl Fn(&str) -> Option<&'a Value>) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::MatchNone => false,
            Filter::Column { column, matcher } => {
                matcher.matches(lookup(column.as_ref()).unwrap_or(&Value::Null))
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(lookup)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(lookup)),
            Filter::Not(filter) => !filter.matches(lookup),
        }
    }

    pub fn columns(&self) -> BTreeSet<Arc<str>> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<Arc<str>>) {
        match self {
            Filter::MatchAll | Filter::MatchNone => {}
            Filter::Column { column, .. } => {
                out.insert(column.clone());
            }
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_columns(out);
                }
            }
            Filter::Not(filter) => filter.collect_columns(out),
        }
    }

    /// Remove every constraint expressed on `columns`. The result matches at least every row
    /// the original matches: a removed constraint becomes `MatchAll`, or `MatchNone` when it
    /// sits under an odd number of negations.
    pub fn without_columns(&self, columns: &HashSet<Arc<str>>) -> Filter {
        self.relax(columns, true)
    }

    fn relax(&self, columns: &HashSet<Arc<str>>, positive: bool) -> Filter {
        match self {
            Filter::MatchAll | Filter::MatchNone => self.clone(),
            Filter::Column { column, .. } => {
                if !columns.contains(column) {
                    self.clone()
                } else if positive {
                    Filter::MatchAll
                } else {
                    Filter::MatchNone
                }
            }
            Filter::And(filters) => Filter::and(filters.iter().map(|f| f.relax(columns, positive))),
            Filter::Or(filters) => Filter::or(filters.iter().map(|f| f.relax(columns, positive))),
            Filter::Not(filter) => Filter::not(filter.relax(columns, !positive)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::MatchAll => f.write_str("matchAll"),
            Filter::MatchNone => f.write_str("matchNone"),
            Filter::Column { column, matcher } => match matcher {
                ValueMatcher::Equals(v) => write!(f, "{column}={v}"),
                ValueMatcher::In(values) => {
                    write!(f, "{column}=in(")?;
                    for (idx, v) in values.iter().enumerate() {
                        if idx > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{v}")?;
                    }
                    f.write_str(")")
                }
                ValueMatcher::IsNull => write!(f, "{column}=null"),
                ValueMatcher::Comparing {
                    operand,
                    greater,
                    strict,
                } => {
                    let op = match (greater, strict) {
                        (true, true) => ">",
                        (true, false) => ">=",
                        (false, true) => "<",
                        (false, false) => "<=",
                    };
                    write!(f, "{column}{op}{operand}")
                }
                ValueMatcher::Like(pattern) => write!(f, "{column} like {pattern}"),
            },
            Filter::And(filters) => join(f, filters, "&"),
            Filter::Or(filters) => join(f, filters, "|"),
            Filter::Not(filter) => write!(f, "!({filter})"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, filters: &[Filter], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, filter) in filters.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{filter}")?;
    }
    f.write_str(")")
}
