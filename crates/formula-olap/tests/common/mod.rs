#![allow(dead_code)]

use formula_olap::{
    Aggregator, Combinator, CubeEngine, FnCombination, InMemoryTable, MeasureRegistry, QueryEvent,
    QueryEventSink, Value,
};
use std::sync::{Arc, Mutex};

/// `k1Sum = SUM(k1)`, `k2Sum = SUM(k2)`, `count = COUNT(*)`, `k1SumSquared = k1Sum²`.
pub fn base_registry() -> MeasureRegistry {
    let mut registry = MeasureRegistry::new();
    registry.add(Aggregator::sum("k1Sum", "k1")).unwrap();
    registry.add(Aggregator::sum("k2Sum", "k2")).unwrap();
    registry.add(Aggregator::count_rows("count")).unwrap();
    registry
        .add(Combinator::new("k1SumSquared", ["k1Sum"], square()))
        .unwrap();
    registry
}

pub fn square() -> FnCombination {
    FnCombination::new("SQUARE", |values| match values.first()? {
        Some(Value::Long(v)) => Some(Value::Long(v * v)),
        Some(other) => other.as_f64().map(|v| Value::Double(v * v)),
        None => None,
    })
}

/// Two rows on `a1`: `k1 = 123` and `k1 = 234`.
pub fn simple_table() -> InMemoryTable {
    let mut table = InMemoryTable::new("simple", ["a", "b", "k1", "k2"]);
    table
        .push_row([("a", Value::from("a1")), ("k1", Value::from(123))])
        .unwrap();
    table
        .push_row([("a", Value::from("a1")), ("k1", Value::from(234))])
        .unwrap();
    table
}

/// Trades over two desks and two currencies.
pub fn trades_table() -> InMemoryTable {
    let mut table = InMemoryTable::new("trades", ["desk", "ccy", "country", "qty", "price"]);
    let rows: [(&str, &str, &str, i64, f64); 5] = [
        ("d1", "EUR", "FR", 2, 10.0),
        ("d1", "USD", "US", 3, 100.0),
        ("d1", "EUR", "DE", 4, 12.0),
        ("d2", "EUR", "FR", 1, 10.0),
        ("d2", "JPY", "TR", 5, 1.0),
    ];
    for (desk, ccy, country, qty, price) in rows {
        table
            .push_row([
                ("desk", Value::from(desk)),
                ("ccy", Value::from(ccy)),
                ("country", Value::from(country)),
                ("qty", Value::from(qty)),
                ("price", Value::from(price)),
            ])
            .unwrap();
    }
    table
}

pub fn engine(registry: MeasureRegistry, table: InMemoryTable) -> CubeEngine {
    CubeEngine::new(registry, table)
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<QueryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<QueryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn explain_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                QueryEvent::Explain { lines } => Some(lines),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl QueryEventSink for RecordingSink {
    fn on_event(&self, event: &QueryEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
