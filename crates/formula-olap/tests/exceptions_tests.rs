mod common;

use common::{base_registry, engine, simple_table, square, RecordingSink};
use formula_olap::{
    Combination, Combinator, CubeQuery, Filter, Filtrator, OlapError, OlapResult, QueryEvent,
    QueryOption, Slice, Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[derive(Debug)]
struct Rejecting;

impl Combination for Rejecting {
    fn key(&self) -> &str {
        "REJECT"
    }

    fn combine(&self, slice: &Slice, _underlyings: &[Option<Value>]) -> OlapResult<Option<Value>> {
        Err(OlapError::InvalidArgument(format!("cannot combine {slice}")))
    }
}

fn registry() -> formula_olap::MeasureRegistry {
    let mut registry = base_registry();
    registry
        .add(Filtrator::new("zz.k1Sum", "k1Sum", Filter::equals("zz", "x")))
        .unwrap();
    registry
        .add(Combinator::new("zz.squared", ["zz.k1Sum"], square()))
        .unwrap();
    registry
        .add(Combinator::new("rejected", ["k1Sum"], Rejecting))
        .unwrap();
    registry
}

fn error_slice(message: &str) -> Slice {
    Slice::from_pairs([("a", Value::error(message))])
}

#[test]
fn source_failures_abort_the_query_by_default() {
    let err = engine(registry(), simple_table())
        .execute(
            &CubeQuery::builder()
                .measures(["k1Sum", "zz.k1Sum"])
                .group_by(["a"])
                .build(),
        )
        .unwrap_err();
    assert!(
        matches!(err, OlapError::UnknownColumn { ref column, .. } if column == "zz"),
        "{err}"
    );
}

#[test]
fn source_failures_become_error_slices() {
    let view = engine(registry(), simple_table())
        .execute(
            &CubeQuery::builder()
                .measures(["k1Sum", "zz.k1Sum", "zz.squared"])
                .group_by(["a"])
                .option(QueryOption::ExceptionsAsMeasureValue)
                .build(),
        )
        .unwrap();

    let message = "unknown column simple[zz]";
    assert_eq!(view.len(), 2);
    assert_eq!(
        view.value(&Slice::from_pairs([("a", "a1")]), "k1Sum"),
        Some(&Value::Long(357))
    );
    let errors = view.get(&error_slice(message)).unwrap();
    assert_eq!(errors.get("zz.k1Sum"), Some(&Value::error(message)));
    assert_eq!(errors.get("zz.squared"), Some(&Value::error(message)));
    assert_eq!(errors.get("k1Sum"), None);
}

#[test]
fn evaluation_failures_become_error_slices() {
    let engine = engine(registry(), simple_table());
    let query = CubeQuery::builder()
        .measures(["k1Sum", "rejected"])
        .group_by(["a"]);

    let err = engine.execute(&query.build()).unwrap_err();
    let OlapError::StepArgument { step, source } = &err else {
        panic!("expected a step argument error, got {err}");
    };
    assert!(step.starts_with("m=rejected=Combinator"), "{step}");
    assert!(matches!(**source, OlapError::InvalidArgument(_)));

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measures(["k1Sum", "rejected"])
                .group_by(["a"])
                .option(QueryOption::ExceptionsAsMeasureValue)
                .build(),
        )
        .unwrap();
    let message = "invalid argument: cannot combine {a=a1}";
    assert_eq!(
        view.value(&error_slice(message), "rejected"),
        Some(&Value::error(message))
    );
}

#[test]
fn error_values_serialize_as_objects() {
    let view = engine(registry(), simple_table())
        .execute(
            &CubeQuery::builder()
                .measure("zz.k1Sum")
                .option(QueryOption::ExceptionsAsMeasureValue)
                .build(),
        )
        .unwrap();
    assert_eq!(
        serde_json::to_value(&view).unwrap(),
        serde_json::json!([
            {"coordinates": {}, "values": {"zz.k1Sum": {"error": "unknown column simple[zz]"}}}
        ])
    );
}

#[test]
fn explain_renders_the_step_graph() {
    let sink = RecordingSink::new();
    let engine = engine(registry(), simple_table()).with_event_sink(Arc::clone(&sink));
    engine
        .execute(
            &CubeQuery::builder()
                .measure("k1SumSquared")
                .option(QueryOption::Explain)
                .build(),
        )
        .unwrap();

    assert_eq!(
        sink.explain_lines(),
        vec![
            "#0 m=k1SumSquared=Combinator groupBy=grandTotal".to_string(),
            "\\-- #1 m=k1Sum=SUM(k1) groupBy=grandTotal".to_string(),
        ]
    );
    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, QueryEvent::StepEvaluated { .. })));
}

#[test]
fn debug_reports_each_evaluated_step() {
    let sink = RecordingSink::new();
    let engine = engine(registry(), simple_table()).with_event_sink(Arc::clone(&sink));
    engine
        .execute(
            &CubeQuery::builder()
                .measure("k1SumSquared")
                .option(QueryOption::Debug)
                .build(),
        )
        .unwrap();

    let evaluated: Vec<QueryEvent> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, QueryEvent::StepEvaluated { .. }))
        .collect();
    assert_eq!(
        evaluated,
        vec![QueryEvent::StepEvaluated {
            step: "m=k1SumSquared=Combinator groupBy=grandTotal".to_string(),
            slices: 1,
        }]
    );
    assert_eq!(sink.explain_lines().len(), 2);
}
