use crate::error::OlapResult;
use crate::filter::Filter;
use crate::measure::Measure;
use crate::query::GroupBy;
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A resolved measure at a given filter, group-by, and custom marker: one node of the step DAG.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryStep {
    pub filter: Filter,
    pub group_by: GroupBy,
    pub measure: Arc<Measure>,
    pub custom_marker: Option<Value>,
}

impl QueryStep {
    pub fn new(
        measure: Arc<Measure>,
        filter: Filter,
        group_by: GroupBy,
        custom_marker: Option<Value>,
    ) -> Self {
        Self {
            filter,
            group_by,
            measure,
            custom_marker,
        }
    }

    /// Same context, another measure.
    pub fn with_measure(&self, measure: Arc<Measure>) -> Self {
        Self {
            measure,
            ..self.clone()
        }
    }

    /// The steps this step's measure needs, in underlying order. Names are resolved through
    /// `resolve`, so the returned steps never refer to a measure by name only.
    pub fn underlying_steps(
        &self,
        resolve: &dyn Fn(&str) -> OlapResult<Arc<Measure>>,
    ) -> OlapResult<Vec<QueryStep>> {
        let same_context = |names: &[String]| -> OlapResult<Vec<QueryStep>> {
            names
                .iter()
                .map(|name| Ok(self.with_measure(resolve(name)?)))
                .collect()
        };

        match self.measure.as_ref() {
            Measure::Aggregator(_) | Measure::Empty(_) => Ok(Vec::new()),
            Measure::Combinator(m) => {
                m.combination.check_arity(m.underlyings.len())?;
                same_context(&m.underlyings)
            }
            Measure::Columnator(m) => {
                if !m.is_active(&self.group_by) {
                    return Ok(Vec::new());
                }
                m.combination.check_arity(m.underlyings.len())?;
                same_context(&m.underlyings)
            }
            Measure::Filtrator(m) => {
                let filter = Filter::and([self.filter.clone(), m.filter.clone()]);
                Ok(vec![QueryStep {
                    filter,
                    measure: resolve(&m.underlying)?,
                    ..self.clone()
                }])
            }
            Measure::Unfiltrator(m) => {
                let columns: HashSet<Arc<str>> = m.columns.iter().cloned().collect();
                Ok(vec![QueryStep {
                    filter: self.filter.without_columns(&columns),
                    measure: resolve(&m.underlying)?,
                    ..self.clone()
                }])
            }
            Measure::Partitionor(m) => {
                m.combination.check_arity(m.underlyings.len())?;
                let group_by = self.group_by.union(&m.group_by);
                m.underlyings
                    .iter()
                    .map(|name| {
                        Ok(QueryStep {
                            group_by: group_by.clone(),
                            measure: resolve(name)?,
                            ..self.clone()
                        })
                    })
                    .collect()
            }
            Measure::Dispatchor(m) => {
                let outputs = m.decomposition.output_columns();
                let output_set: HashSet<Arc<str>> = outputs.iter().cloned().collect();
                let group_by = self
                    .group_by
                    .without(outputs.iter().map(|c| c.as_ref()))
                    .union(&GroupBy::of(m.decomposition.input_columns()));
                Ok(vec![QueryStep {
                    filter: self.filter.without_columns(&output_set),
                    group_by,
                    measure: resolve(&m.underlying)?,
                    custom_marker: self.custom_marker.clone(),
                }])
            }
        }
    }
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={}", self.measure)?;
        if !self.filter.is_match_all() {
            write!(f, " filter={}", self.filter)?;
        }
        write!(f, " groupBy={}", self.group_by)?;
        if let Some(marker) = &self.custom_marker {
            write!(f, " marker={marker}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationKind;
    use crate::error::OlapError;
    use crate::measure::{
        Aggregator, Columnator, ColumnatorMode, DivideCombination, Dispatchor, Filtrator,
        MappingDecomposition, Partitionor, SumCombination, Unfiltrator,
    };

    fn resolve(name: &str) -> OlapResult<Arc<Measure>> {
        match name {
            "k1Sum" => Ok(Arc::new(Aggregator::sum("k1Sum", "k1").into())),
            other => Err(OlapError::UnknownMeasure(other.to_string())),
        }
    }

    fn root(measure: impl Into<Measure>, filter: Filter, group_by: GroupBy) -> QueryStep {
        QueryStep::new(Arc::new(measure.into()), filter, group_by, None)
    }

    #[test]
    fn filtrator_and_unfiltrator_rewrite_the_filter() {
        let step = root(
            Filtrator::new("f", "k1Sum", Filter::equals("b", "b1")),
            Filter::equals("a", "a1"),
            GroupBy::grand_total(),
        );
        let underlyings = step.underlying_steps(&resolve).unwrap();
        assert_eq!(
            underlyings[0].filter,
            Filter::and([Filter::equals("a", "a1"), Filter::equals("b", "b1")])
        );

        let step = root(
            Unfiltrator::new("u", "k1Sum", ["a"]),
            Filter::and([Filter::equals("a", "a1"), Filter::equals("b", "b1")]),
            GroupBy::grand_total(),
        );
        let underlyings = step.underlying_steps(&resolve).unwrap();
        assert_eq!(underlyings[0].filter, Filter::equals("b", "b1"));
    }

    #[test]
    fn partitionor_and_dispatchor_rewrite_the_group_by() {
        let step = root(
            Partitionor::new(
                "p",
                ["k1Sum"],
                GroupBy::of(["ccy"]),
                SumCombination,
                AggregationKind::Sum,
            ),
            Filter::MatchAll,
            GroupBy::of(["a"]),
        );
        let underlyings = step.underlying_steps(&resolve).unwrap();
        assert_eq!(underlyings[0].group_by, GroupBy::of(["a", "ccy"]));

        let step = root(
            Dispatchor::new(
                "d",
                "k1Sum",
                MappingDecomposition::new("country", "region"),
                AggregationKind::Sum,
            ),
            Filter::equals("region", "EU"),
            GroupBy::of(["a", "region"]),
        );
        let underlyings = step.underlying_steps(&resolve).unwrap();
        assert_eq!(underlyings[0].group_by, GroupBy::of(["a", "country"]));
        assert_eq!(underlyings[0].filter, Filter::MatchAll);
    }

    #[test]
    fn inactive_columnator_has_no_underlyings() {
        let columnator = Columnator::new(
            "c",
            ["k1Sum"],
            SumCombination,
            ["ccy"],
            ColumnatorMode::HideIfMissing,
        );
        let step = root(columnator.clone(), Filter::MatchAll, GroupBy::of(["a"]));
        assert!(step.underlying_steps(&resolve).unwrap().is_empty());
        let step = root(columnator, Filter::MatchAll, GroupBy::of(["ccy"]));
        assert_eq!(step.underlying_steps(&resolve).unwrap().len(), 1);
    }

    #[test]
    fn bad_arity_and_unknown_underlyings_fail() {
        let step = root(
            crate::measure::Combinator::new("d", ["k1Sum"], DivideCombination),
            Filter::MatchAll,
            GroupBy::grand_total(),
        );
        assert!(matches!(
            step.underlying_steps(&resolve),
            Err(OlapError::InvalidArgument(_))
        ));
        let step = root(
            Filtrator::new("f", "missing", Filter::MatchAll),
            Filter::MatchAll,
            GroupBy::grand_total(),
        );
        assert!(matches!(
            step.underlying_steps(&resolve),
            Err(OlapError::UnknownMeasure(_))
        ));
    }
}
