//! Aggregation operators used by [`crate::Aggregator`] leaves and by the roll-up phase of
//! partitioning/dispatching measures.
//!
//! Every operator exposes two numeric fast paths (`i64` and `f64`) and a generic path over
//! [`Stored`] values. Operators that cannot fold plain values pairwise (`Avg`, `Rank`) lift raw
//! inputs into a [`Carrier`] and are only turned back into a plain [`Value`] by [`finish`].
//!
//! [`finish`]: AggregationKind::finish

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Sum,
    /// Number of non-null inputs; the `*` column counts rows.
    Count,
    Min,
    Max,
    Avg,
    /// The `rank`-th value (1-based), largest first unless `ascending`.
    Rank { rank: usize, ascending: bool },
}

/// Intermediate accumulator of the operators that cannot fold plain values.
#[derive(Clone, Debug, PartialEq)]
pub enum Carrier {
    Avg { sum: f64, count: u64 },
    /// Best values so far, sorted best first, never longer than the requested rank.
    TopK { values: Vec<Value> },
}

/// What a column holds for a slice outside of its numeric fast paths.
#[derive(Clone, Debug, PartialEq)]
pub enum Stored {
    Value(Value),
    Carrier(Carrier),
}

impl AggregationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationKind::Sum => "SUM",
            AggregationKind::Count => "COUNT",
            AggregationKind::Min => "MIN",
            AggregationKind::Max => "MAX",
            AggregationKind::Avg => "AVG",
            AggregationKind::Rank { .. } => "RANK",
        }
    }

    /// Whether inputs must be lifted into a [`Carrier`] before folding.
    pub fn uses_carrier(&self) -> bool {
        matches!(self, AggregationKind::Avg | AggregationKind::Rank { .. })
    }

    /// Fold two integral values. `None` when the result does not fit the `i64` path (overflow,
    /// or an operator that cannot fold plain values) and the caller must fall back.
    pub fn merge_longs(&self, left: i64, right: i64) -> Option<i64> {
        match self {
            AggregationKind::Sum | AggregationKind::Count => left.checked_add(right),
            AggregationKind::Min => Some(left.min(right)),
            AggregationKind::Max => Some(left.max(right)),
            AggregationKind::Avg | AggregationKind::Rank { .. } => None,
        }
    }

    pub fn merge_doubles(&self, left: f64, right: f64) -> Option<f64> {
        match self {
            AggregationKind::Sum | AggregationKind::Count => Some(left + right),
            AggregationKind::Min => Some(left.min(right)),
            AggregationKind::Max => Some(left.max(right)),
            AggregationKind::Avg | AggregationKind::Rank { .. } => None,
        }
    }

    /// Turn one raw source value into something this operator can fold. Nulls contribute
    /// nothing and yield `None`.
    pub fn lift_raw(&self, value: Value) -> Option<Stored> {
        if value.is_null() {
            return None;
        }
        Some(match self {
            AggregationKind::Count => Stored::Value(Value::Long(1)),
            AggregationKind::Avg => match value.as_f64() {
                Some(v) => Stored::Carrier(Carrier::Avg { sum: v, count: 1 }),
                None if value.is_error() => Stored::Value(value),
                None => {
                    log::debug!("AVG ignores non-numeric input {value}");
                    return None;
                }
            },
            AggregationKind::Rank { .. } => Stored::Carrier(Carrier::TopK {
                values: vec![value],
            }),
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => {
                Stored::Value(value)
            }
        })
    }

    /// Generic fold over stored values (carriers, text, errors, mixed numbers).
    pub fn merge_stored(&self, left: Stored, right: Stored) -> Stored {
        // Errors are sticky: the first captured failure wins.
        if let Stored::Value(v) = &left {
            if v.is_error() {
                return left;
            }
        }
        if let Stored::Value(v) = &right {
            if v.is_error() {
                return right;
            }
        }

        match self {
            AggregationKind::Avg => {
                let (Some((ls, lc)), Some((rs, rc))) = (avg_parts(&left), avg_parts(&right)) else {
                    return left;
                };
                Stored::Carrier(Carrier::Avg {
                    sum: ls + rs,
                    count: lc + rc,
                })
            }
            AggregationKind::Rank { rank, ascending } => {
                let mut values = topk_values(left);
                values.extend(topk_values(right));
                values.sort_by(|a, b| rank_order(a, b, *ascending));
                values.truncate(*rank);
                Stored::Carrier(Carrier::TopK { values })
            }
            AggregationKind::Sum | AggregationKind::Count => {
                let (Stored::Value(l), Stored::Value(r)) = (&left, &right) else {
                    return left;
                };
                match (l, r) {
                    (Value::Long(a), Value::Long(b)) => match self.merge_longs(*a, *b) {
                        Some(v) => Stored::Value(Value::Long(v)),
                        None => Stored::Value(Value::Double(*a as f64 + *b as f64)),
                    },
                    _ => match (l.as_f64(), r.as_f64()) {
                        (Some(a), Some(b)) => Stored::Value(Value::Double(a + b)),
                        (Some(_), None) => left,
                        (None, Some(_)) => right,
                        (None, None) => {
                            log::debug!("{} keeps {l} and ignores non-numeric {r}", self.name());
                            left
                        }
                    },
                }
            }
            AggregationKind::Min | AggregationKind::Max => {
                let (Stored::Value(l), Stored::Value(r)) = (&left, &right) else {
                    return left;
                };
                let ord = compare_for_extremum(l, r);
                let keep_left = match self {
                    AggregationKind::Min => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                if keep_left {
                    left
                } else {
                    right
                }
            }
        }
    }

    /// Convert a stored accumulator into the value exposed to derived measures and views.
    pub fn finish(&self, stored: Stored) -> Value {
        match stored {
            Stored::Value(v) => v,
            Stored::Carrier(Carrier::Avg { sum, count }) => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(sum / count as f64)
                }
            }
            Stored::Carrier(Carrier::TopK { values }) => match self {
                AggregationKind::Rank { rank, .. } => {
                    values.get(rank.saturating_sub(1)).cloned().unwrap_or(Value::Null)
                }
                _ => Value::List(values.into()),
            },
        }
    }

    /// Fold a sequence of plain values, as the roll-up phase of derived measures does.
    pub fn aggregate_values(&self, values: impl IntoIterator<Item = Value>) -> Value {
        let mut acc: Option<Stored> = None;
        for value in values {
            let Some(lifted) = self.lift_plain(value) else {
                continue;
            };
            acc = Some(match acc {
                None => lifted,
                Some(prev) => self.merge_stored(prev, lifted),
            });
        }
        acc.map_or(Value::Null, |stored| self.finish(stored))
    }

    /// Like [`lift_raw`](Self::lift_raw) but for already-aggregated values: counts are
    /// summed rather than re-counted.
    pub(crate) fn lift_plain(&self, value: Value) -> Option<Stored> {
        match self {
            AggregationKind::Count if !value.is_null() => Some(Stored::Value(value)),
            _ => self.lift_raw(value),
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationKind::Rank { rank, ascending } => {
                let dir = if *ascending { "ASC" } else { "DESC" };
                write!(f, "RANK({rank},{dir})")
            }
            other => f.write_str(other.name()),
        }
    }
}

fn avg_parts(stored: &Stored) -> Option<(f64, u64)> {
    match stored {
        Stored::Carrier(Carrier::Avg { sum, count }) => Some((*sum, *count)),
        // A pre-aggregated average counts as a single sample.
        Stored::Value(v) => v.as_f64().map(|v| (v, 1)),
        Stored::Carrier(Carrier::TopK { .. }) => None,
    }
}

fn topk_values(stored: Stored) -> Vec<Value> {
    match stored {
        Stored::Carrier(Carrier::TopK { values }) => values,
        Stored::Value(v) if !v.is_null() => vec![v],
        _ => Vec::new(),
    }
}

fn rank_order(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ord = compare_for_extremum(a, b);
    if ascending {
        ord
    } else {
        ord.reverse()
    }
}

fn compare_for_extremum(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_overflow_falls_back_to_double() {
        let sum = AggregationKind::Sum;
        assert_eq!(sum.merge_longs(i64::MAX, 1), None);
        let merged = sum.merge_stored(
            Stored::Value(Value::Long(i64::MAX)),
            Stored::Value(Value::Long(1)),
        );
        assert_eq!(merged, Stored::Value(Value::Double(i64::MAX as f64 + 1.0)));
    }

    #[test]
    fn rank_keeps_bounded_top_values() {
        let rank = AggregationKind::Rank {
            rank: 2,
            ascending: false,
        };
        let value = rank.aggregate_values([3, 9, 1, 7].map(Value::from));
        assert_eq!(value, Value::Long(7));

        let ascending = AggregationKind::Rank {
            rank: 1,
            ascending: true,
        };
        assert_eq!(
            ascending.aggregate_values([3, 9, 1, 7].map(Value::from)),
            Value::Long(1)
        );
    }

    #[test]
    fn avg_and_count_fold_plain_values() {
        assert_eq!(
            AggregationKind::Avg.aggregate_values([Value::from(1), Value::from(2.0)]),
            Value::Double(1.5)
        );
        assert_eq!(
            AggregationKind::Count.aggregate_values([Value::from(2), Value::Null, Value::from(3)]),
            Value::Long(5)
        );
        assert_eq!(AggregationKind::Sum.aggregate_values([]), Value::Null);
    }

    #[test]
    fn sum_does_not_add_text() {
        let sum = AggregationKind::Sum;
        let merged = sum.merge_stored(Stored::Value(Value::from("x")), Stored::Value(Value::from(2)));
        assert_eq!(merged, Stored::Value(Value::Long(2)));
        assert_eq!(
            sum.aggregate_values([Value::from(1), Value::error("boom"), Value::from(2)]),
            Value::error("boom")
        );
    }
}
