mod common;

use common::{base_registry, engine, simple_table, square, trades_table};
use formula_olap::{
    AggregationKind, Aggregator, Columnator, ColumnatorMode, Combinator, CubeEngine, CubeQuery,
    Dispatchor, EngineConfig, Filter, Filtrator, GroupBy, InMemoryTable, MappingDecomposition,
    MeasureRegistry, OlapError, Partitionor, ProductCombination, QueryOption, Slice,
    StandardColumnsManager, SumCombination, Unfiltrator, Value,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn trades_registry() -> MeasureRegistry {
    let mut registry = MeasureRegistry::new();
    registry.add(Aggregator::sum("qty.sum", "qty")).unwrap();
    registry
        .add(Aggregator::new("price.max", "price", AggregationKind::Max))
        .unwrap();
    registry
}

#[test]
fn grand_total_sums_every_row() {
    let view = engine(base_registry(), simple_table())
        .execute(&CubeQuery::builder().measure("k1Sum").build())
        .unwrap();

    assert_eq!(view.len(), 1);
    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[("k1Sum", Value::Long(357))]))
    );
}

#[test]
fn group_by_produces_one_slice_per_coordinate() {
    let view = engine(base_registry(), simple_table())
        .execute(&CubeQuery::builder().measure("k1Sum").group_by(["a"]).build())
        .unwrap();

    let slices: Vec<&Slice> = view.slices().collect();
    assert_eq!(slices, vec![&Slice::from_pairs([("a", "a1")])]);
    assert_eq!(
        view.value(&Slice::from_pairs([("a", "a1")]), "k1Sum"),
        Some(&Value::Long(357))
    );
}

#[test]
fn combinator_squares_its_underlying() {
    let view = engine(base_registry(), simple_table())
        .execute(&CubeQuery::builder().measure("k1SumSquared").build())
        .unwrap();

    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[("k1SumSquared", Value::Long(127_449))]))
    );
}

#[test]
fn rows_without_the_group_by_column_are_excluded() {
    let mut table = simple_table();
    table.push_row([("k1", Value::from(1000))]).unwrap();

    let view = engine(base_registry(), table)
        .execute(&CubeQuery::builder().measure("k1Sum").group_by(["a"]).build())
        .unwrap();

    assert_eq!(view.len(), 1);
    assert_eq!(
        view.value(&Slice::from_pairs([("a", "a1")]), "k1Sum"),
        Some(&Value::Long(357))
    );
}

#[test]
fn explicit_nulls_use_the_configured_replacement() {
    let mut table = simple_table();
    table
        .push_row([("a", Value::Null), ("k1", Value::from(1000))])
        .unwrap();

    let engine = CubeEngine::new(base_registry(), table)
        .with_columns_manager(StandardColumnsManager::new().with_null_replacement("a", "N/A"));
    let view = engine
        .execute(&CubeQuery::builder().measure("k1Sum").group_by(["a"]).build())
        .unwrap();

    assert_eq!(view.len(), 2);
    assert_eq!(
        view.value(&Slice::from_pairs([("a", "N/A")]), "k1Sum"),
        Some(&Value::Long(1000))
    );
}

#[test]
fn null_placeholder_comes_from_the_engine_config() {
    let mut table = simple_table();
    table
        .push_row([("a", Value::Null), ("k1", Value::from(1))])
        .unwrap();

    let engine = engine(base_registry(), table)
        .with_config(EngineConfig::default().with_null_placeholder("(none)"));
    let view = engine
        .execute(&CubeQuery::builder().measure("k1Sum").group_by(["a"]).build())
        .unwrap();

    assert_eq!(
        view.value(&Slice::from_pairs([("a", "(none)")]), "k1Sum"),
        Some(&Value::Long(1))
    );
}

#[test]
fn unknown_measures_fail_unless_lenient() {
    let engine = engine(base_registry(), simple_table());

    let err = engine
        .execute(&CubeQuery::builder().measure("nope").build())
        .unwrap_err();
    assert!(matches!(err, OlapError::UnknownMeasure(ref name) if name == "nope"));

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measures(["nope", "k1Sum"])
                .option(QueryOption::UnknownMeasuresAreEmpty)
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[("k1Sum", Value::Long(357))]))
    );
}

#[test]
fn count_rows_counts_every_matching_row() {
    let view = engine(base_registry(), trades_table())
        .execute(&CubeQuery::builder().measure("count").group_by(["desk"]).build())
        .unwrap();

    assert_eq!(
        view.value(&Slice::from_pairs([("desk", "d1")]), "count"),
        Some(&Value::Long(3))
    );
    assert_eq!(
        view.value(&Slice::from_pairs([("desk", "d2")]), "count"),
        Some(&Value::Long(2))
    );
}

#[test]
fn filtrator_adds_its_filter_and_unfiltrator_relaxes_the_query() {
    let mut registry = trades_registry();
    registry
        .add(Filtrator::new(
            "eurQty",
            "qty.sum",
            Filter::equals("ccy", "EUR"),
        ))
        .unwrap();
    registry
        .add(Unfiltrator::new("anyCcyQty", "qty.sum", ["ccy"]))
        .unwrap();
    let engine = engine(registry, trades_table());

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measures(["qty.sum", "eurQty"])
                .group_by(["desk"])
                .build(),
        )
        .unwrap();
    let d1 = Slice::from_pairs([("desk", "d1")]);
    let d2 = Slice::from_pairs([("desk", "d2")]);
    assert_eq!(
        view.get(&d1),
        Some(&values(&[
            ("eurQty", Value::Long(6)),
            ("qty.sum", Value::Long(9)),
        ]))
    );
    assert_eq!(view.value(&d2, "eurQty"), Some(&Value::Long(1)));

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measures(["qty.sum", "anyCcyQty"])
                .filter(Filter::equals("ccy", "USD"))
                .group_by(["desk"])
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.get(&d1),
        Some(&values(&[
            ("anyCcyQty", Value::Long(9)),
            ("qty.sum", Value::Long(3)),
        ]))
    );
    assert_eq!(
        view.get(&d2),
        Some(&values(&[("anyCcyQty", Value::Long(6))]))
    );

    // Relaxing ccy inside a negation must not exclude the d1 rows the query kept.
    let view = engine
        .execute(
            &CubeQuery::builder()
                .measures(["qty.sum", "anyCcyQty"])
                .filter(Filter::not(Filter::and([
                    Filter::equals("desk", "d1"),
                    Filter::equals("ccy", "EUR"),
                ])))
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[
            ("anyCcyQty", Value::Long(15)),
            ("qty.sum", Value::Long(9)),
        ]))
    );
}

#[test]
fn partitionor_combines_per_partition_then_rolls_up() {
    let mut registry = trades_registry();
    registry
        .add(Partitionor::new(
            "notional",
            ["qty.sum", "price.max"],
            GroupBy::of(["ccy"]),
            ProductCombination,
            AggregationKind::Sum,
        ))
        .unwrap();
    let engine = engine(registry, trades_table());

    let view = engine
        .execute(&CubeQuery::builder().measure("notional").group_by(["desk"]).build())
        .unwrap();
    assert_eq!(
        view.value(&Slice::from_pairs([("desk", "d1")]), "notional"),
        Some(&Value::Double(372.0))
    );
    assert_eq!(
        view.value(&Slice::from_pairs([("desk", "d2")]), "notional"),
        Some(&Value::Double(15.0))
    );

    // Without the desk the EUR partition merges d1 and d2 before the product: 7 * 12.
    let view = engine
        .execute(&CubeQuery::builder().measure("notional").build())
        .unwrap();
    assert_eq!(
        view.value(&Slice::grand_total(), "notional"),
        Some(&Value::Double(84.0 + 300.0 + 5.0))
    );
}

#[test]
fn dispatchor_maps_countries_onto_regions() {
    let mut registry = trades_registry();
    registry
        .add(Dispatchor::new(
            "qty.byRegion",
            "qty.sum",
            MappingDecomposition::new("country", "region")
                .map("FR", "EU", 1.0)
                .map("DE", "EU", 1.0)
                .map("TR", "EU", 0.5)
                .map("TR", "ASIA", 0.5),
            AggregationKind::Sum,
        ))
        .unwrap();
    let engine = engine(registry, trades_table());

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("qty.byRegion")
                .group_by(["region"])
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.to_rows(),
        vec![
            values(&[("region", Value::Null), ("qty.byRegion", Value::Long(3))]),
            values(&[("region", Value::from("ASIA")), ("qty.byRegion", Value::Double(2.5))]),
            values(&[("region", Value::from("EU")), ("qty.byRegion", Value::Double(9.5))]),
        ]
    );

    let view = engine
        .execute(&CubeQuery::builder().measure("qty.byRegion").build())
        .unwrap();
    assert_eq!(
        view.value(&Slice::grand_total(), "qty.byRegion"),
        Some(&Value::Double(15.0))
    );

    // A filter on the dispatched column is applied after dispatching.
    let eu = Filter::equals("region", "EU");
    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("qty.byRegion")
                .filter(eu.clone())
                .group_by(["region"])
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.to_rows(),
        vec![values(&[("region", Value::from("EU")), ("qty.byRegion", Value::Double(9.5))])]
    );

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("qty.byRegion")
                .filter(Filter::and([eu, Filter::equals("desk", "d1")]))
                .build(),
        )
        .unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(
        view.value(&Slice::grand_total(), "qty.byRegion"),
        Some(&Value::Long(6))
    );

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("qty.byRegion")
                .filter(Filter::not(Filter::equals("region", "EU")))
                .group_by(["region"])
                .build(),
        )
        .unwrap();
    assert_eq!(
        view.to_rows(),
        vec![
            values(&[("region", Value::Null), ("qty.byRegion", Value::Long(3))]),
            values(&[("region", Value::from("ASIA")), ("qty.byRegion", Value::Double(2.5))]),
        ]
    );
}

#[test]
fn columnator_is_hidden_without_its_required_columns() {
    let mut registry = trades_registry();
    registry
        .add(Columnator::new(
            "qty.perCcy",
            ["qty.sum"],
            SumCombination,
            ["ccy"],
            ColumnatorMode::HideIfMissing,
        ))
        .unwrap();
    let engine = engine(registry, trades_table());

    let hidden = engine
        .execute(&CubeQuery::builder().measure("qty.perCcy").group_by(["desk"]).build())
        .unwrap();
    assert!(hidden.is_empty());

    let shown = engine
        .execute(&CubeQuery::builder().measure("qty.perCcy").group_by(["ccy"]).build())
        .unwrap();
    assert_eq!(
        shown.value(&Slice::from_pairs([("ccy", "EUR")]), "qty.perCcy"),
        Some(&Value::Long(7))
    );
}

#[test]
fn underlying_measures_are_reported_on_request() {
    let engine = engine(base_registry(), simple_table());
    let query = CubeQuery::builder().measure("k1SumSquared");

    let roots_only = engine.execute(&query.build()).unwrap();
    assert_eq!(
        roots_only.get(&Slice::grand_total()),
        Some(&values(&[("k1SumSquared", Value::Long(127_449))]))
    );

    let with_underlyings = engine
        .execute(
            &CubeQuery::builder()
                .measure("k1SumSquared")
                .option(QueryOption::ReturnUnderlyingMeasures)
                .build(),
        )
        .unwrap();
    assert_eq!(
        with_underlyings.get(&Slice::grand_total()),
        Some(&values(&[
            ("k1Sum", Value::Long(357)),
            ("k1SumSquared", Value::Long(127_449)),
        ]))
    );
}

#[test]
fn one_measure_at_two_filters_is_reported_twice() {
    let mut registry = trades_registry();
    registry
        .add(Filtrator::new(
            "eurQty",
            "qty.sum",
            Filter::equals("ccy", "EUR"),
        ))
        .unwrap();
    registry
        .add(Combinator::new("both", ["qty.sum", "eurQty"], SumCombination))
        .unwrap();
    let engine = engine(registry, trades_table());

    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("both")
                .option(QueryOption::ReturnUnderlyingMeasures)
                .build(),
        )
        .unwrap();
    // Steps: #0 both, #1 qty.sum, #2 eurQty, #3 qty.sum filtered on EUR.
    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[
            ("both", Value::Long(22)),
            ("eurQty", Value::Long(7)),
            ("qty.sum", Value::Long(15)),
            ("qty.sum#3", Value::Long(7)),
        ]))
    );
}

#[test]
fn generated_columns_get_a_placeholder_coordinate() {
    let engine = engine(base_registry(), simple_table())
        .with_columns_manager(StandardColumnsManager::new().with_generated_column("scenario"));
    let view = engine
        .execute(
            &CubeQuery::builder()
                .measure("k1Sum")
                .group_by(["a", "scenario"])
                .filter(Filter::equals("scenario", "base"))
                .build(),
        )
        .unwrap();

    assert_eq!(
        view.value(&Slice::from_pairs([("a", "a1"), ("scenario", "*")]), "k1Sum"),
        Some(&Value::Long(357))
    );
}

#[test]
fn shared_underlyings_are_aggregated_once() {
    let mut registry = base_registry();
    registry
        .add(Combinator::new(
            "k1Sum.twice",
            ["k1Sum", "k1Sum"],
            SumCombination,
        ))
        .unwrap();
    registry
        .add(Combinator::new("k1Sum.squareOfTwice", ["k1Sum.twice"], square()))
        .unwrap();
    let view = engine(registry, simple_table())
        .execute(
            &CubeQuery::builder()
                .measures(["k1Sum.twice", "k1Sum.squareOfTwice", "k1Sum"])
                .build(),
        )
        .unwrap();

    assert_eq!(
        view.get(&Slice::grand_total()),
        Some(&values(&[
            ("k1Sum", Value::Long(357)),
            ("k1Sum.squareOfTwice", Value::Long(714 * 714)),
            ("k1Sum.twice", Value::Long(714)),
        ]))
    );
}

#[test]
fn pre_aggregated_tables_give_the_same_view() {
    let query = CubeQuery::builder()
        .measures(["count", "k1SumSquared"])
        .group_by(["a"])
        .build();
    let raw = engine(base_registry(), simple_table()).execute(&query).unwrap();
    let pre = engine(base_registry(), simple_table().pre_aggregate(true))
        .execute(&query)
        .unwrap();

    assert_eq!(raw, pre);
    assert_eq!(
        pre.value(&Slice::from_pairs([("a", "a1")]), "count"),
        Some(&Value::Long(2))
    );
}

#[test]
fn queries_load_from_json_and_views_serialize() {
    let query: CubeQuery = serde_json::from_str(
        r#"{"measures": ["k1Sum", "count"], "group_by": ["a"]}"#,
    )
    .unwrap();
    let view = engine(base_registry(), simple_table())
        .execute(&query)
        .unwrap();

    assert_eq!(
        serde_json::to_value(&view).unwrap(),
        serde_json::json!([
            {"coordinates": {"a": "a1"}, "values": {"count": 2, "k1Sum": 357}}
        ])
    );
}

#[test]
fn empty_table_yields_an_empty_view() {
    let table = InMemoryTable::new("empty", ["a", "k1"]);
    let view = engine(base_registry(), table)
        .execute(&CubeQuery::builder().measure("k1Sum").group_by(["a"]).build())
        .unwrap();
    assert!(view.is_empty());
}
