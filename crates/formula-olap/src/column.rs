//! Per-slice value storage.
//!
//! [`MultitypeColumn`] is the write side used while aggregating: integral and floating values
//! live in dedicated unboxed maps, everything else (text, errors, aggregation carriers) in an
//! object map. A slice lives in exactly one of the three maps at any time and migrates when
//! its accumulated type changes (long + double becomes double, a carrier absorbs a number).
//!
//! [`FrozenColumn`] is the read-only result handed to the evaluator and the view assembler.

use crate::aggregation::{AggregationKind, Stored};
use crate::slice::Slice;
use crate::value::Value;
use ahash::AHashMap;

/// Receives the values a row source yields for one (aggregator, slice).
pub trait ValueReceiver {
    fn on_long(&mut self, value: i64);
    fn on_double(&mut self, value: f64);
    fn on_object(&mut self, value: Value);

    fn on_value(&mut self, value: Value) {
        match value {
            Value::Long(v) => self.on_long(v),
            Value::Double(v) => self.on_double(v),
            other => self.on_object(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MultitypeColumn {
    aggregation: AggregationKind,
    longs: AHashMap<Slice, i64>,
    doubles: AHashMap<Slice, f64>,
    objects: AHashMap<Slice, Stored>,
}

impl MultitypeColumn {
    pub fn new(aggregation: AggregationKind) -> Self {
        Self {
            aggregation,
            longs: AHashMap::new(),
            doubles: AHashMap::new(),
            objects: AHashMap::new(),
        }
    }

    pub fn aggregation(&self) -> AggregationKind {
        self.aggregation
    }

    pub fn len(&self) -> usize {
        self.longs.len() + self.doubles.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver folding successive raw values of `slice` with the aggregation operator.
    pub fn contribute_raw(&mut self, slice: Slice) -> RawReceiver<'_> {
        RawReceiver {
            column: self,
            slice,
        }
    }

    /// Receiver recording a value the source already aggregated for `slice`.
    pub fn contribute_pre(&mut self, slice: Slice) -> PreAggregatedReceiver<'_> {
        PreAggregatedReceiver {
            column: self,
            slice,
        }
    }

    fn merge_long(&mut self, slice: Slice, value: i64) {
        if let Some(existing) = self.longs.get(&slice).copied() {
            if let Some(merged) = self.aggregation.merge_longs(existing, value) {
                self.longs.insert(slice, merged);
                return;
            }
            // Integral overflow: widen to the double path rather than wrapping.
            self.longs.remove(&slice);
            match self.aggregation.merge_doubles(existing as f64, value as f64) {
                Some(merged) => {
                    self.doubles.insert(slice, merged);
                }
                None => {
                    self.store(slice.clone(), Stored::Value(Value::Long(existing)));
                    self.merge_stored(slice, Stored::Value(Value::Long(value)));
                }
            }
            return;
        }
        if let Some(existing) = self.doubles.get_mut(&slice) {
            if let Some(merged) = self.aggregation.merge_doubles(*existing, value as f64) {
                *existing = merged;
                return;
            }
        }
        if self.contains(&slice) {
            self.merge_stored(slice, Stored::Value(Value::Long(value)));
            return;
        }
        self.longs.insert(slice, value);
    }

    fn merge_double(&mut self, slice: Slice, value: f64) {
        if let Some(existing) = self.doubles.get_mut(&slice) {
            if let Some(merged) = self.aggregation.merge_doubles(*existing, value) {
                *existing = merged;
                return;
            }
        }
        if let Some(existing) = self.longs.get(&slice).copied() {
            if let Some(merged) = self.aggregation.merge_doubles(existing as f64, value) {
                self.longs.remove(&slice);
                self.doubles.insert(slice, merged);
                return;
            }
        }
        if self.contains(&slice) {
            self.merge_stored(slice, Stored::Value(Value::Double(value)));
            return;
        }
        self.doubles.insert(slice, value);
    }

    /// Generic path: pulls any numeric accumulator of `slice` into the object map and folds.
    fn merge_stored(&mut self, slice: Slice, incoming: Stored) {
        let existing = if let Some(v) = self.longs.remove(&slice) {
            Some(Stored::Value(Value::Long(v)))
        } else if let Some(v) = self.doubles.remove(&slice) {
            Some(Stored::Value(Value::Double(v)))
        } else {
            self.objects.remove(&slice)
        };
        let merged = match existing {
            None => incoming,
            Some(existing) => self.aggregation.merge_stored(existing, incoming),
        };
        self.store(slice, merged);
    }

    /// Put a stored value back on the cheapest path able to hold it.
    fn store(&mut self, slice: Slice, stored: Stored) {
        match stored {
            Stored::Value(Value::Long(v)) => {
                self.longs.insert(slice, v);
            }
            Stored::Value(Value::Double(v)) => {
                self.doubles.insert(slice, v);
            }
            other => {
                self.objects.insert(slice, other);
            }
        }
    }

    fn contains(&self, slice: &Slice) -> bool {
        self.longs.contains_key(slice)
            || self.doubles.contains_key(slice)
            || self.objects.contains_key(slice)
    }

    /// Close the column: carriers are finished into plain values.
    pub fn freeze(self) -> FrozenColumn {
        let aggregation = self.aggregation;
        let mut objects = AHashMap::with_capacity(self.objects.len());
        let mut longs = self.longs;
        let mut doubles = self.doubles;
        for (slice, stored) in self.objects {
            match aggregation.finish(stored) {
                Value::Long(v) => {
                    longs.insert(slice, v);
                }
                Value::Double(v) => {
                    doubles.insert(slice, v);
                }
                Value::Null => {}
                other => {
                    objects.insert(slice, other);
                }
            }
        }
        FrozenColumn {
            longs,
            doubles,
            objects,
        }
    }
}

pub struct RawReceiver<'a> {
    column: &'a mut MultitypeColumn,
    slice: Slice,
}

impl ValueReceiver for RawReceiver<'_> {
    fn on_long(&mut self, value: i64) {
        match self.column.aggregation {
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => {
                self.column.merge_long(self.slice.clone(), value)
            }
            _ => self.on_object(Value::Long(value)),
        }
    }

    fn on_double(&mut self, value: f64) {
        match self.column.aggregation {
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => {
                self.column.merge_double(self.slice.clone(), value)
            }
            _ => self.on_object(Value::Double(value)),
        }
    }

    fn on_object(&mut self, value: Value) {
        let Some(lifted) = self.column.aggregation.lift_raw(value) else {
            return;
        };
        match lifted {
            Stored::Value(Value::Long(v)) => self.column.merge_long(self.slice.clone(), v),
            Stored::Value(Value::Double(v)) => self.column.merge_double(self.slice.clone(), v),
            other => self.column.merge_stored(self.slice.clone(), other),
        }
    }
}

pub struct PreAggregatedReceiver<'a> {
    column: &'a mut MultitypeColumn,
    slice: Slice,
}

impl PreAggregatedReceiver<'_> {
    fn record(&mut self, stored: Stored) {
        if !self.column.contains(&self.slice) {
            self.column.store(self.slice.clone(), stored);
            return;
        }
        if self.column.aggregation.uses_carrier() {
            log::warn!(
                "{} received two pre-aggregated values for {}; keeping the last one",
                self.column.aggregation,
                self.slice
            );
            self.column.merge_stored_replace(self.slice.clone(), stored);
            return;
        }
        match stored {
            Stored::Value(Value::Long(v)) => self.column.merge_long(self.slice.clone(), v),
            Stored::Value(Value::Double(v)) => self.column.merge_double(self.slice.clone(), v),
            other => self.column.merge_stored(self.slice.clone(), other),
        }
    }
}

impl MultitypeColumn {
    fn merge_stored_replace(&mut self, slice: Slice, stored: Stored) {
        self.longs.remove(&slice);
        self.doubles.remove(&slice);
        self.objects.remove(&slice);
        self.store(slice, stored);
    }
}

impl ValueReceiver for PreAggregatedReceiver<'_> {
    fn on_long(&mut self, value: i64) {
        self.record(Stored::Value(Value::Long(value)));
    }

    fn on_double(&mut self, value: f64) {
        self.record(Stored::Value(Value::Double(value)));
    }

    fn on_object(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        self.record(Stored::Value(value));
    }
}

/// A closed, read-only slice → value column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrozenColumn {
    longs: AHashMap<Slice, i64>,
    doubles: AHashMap<Slice, f64>,
    objects: AHashMap<Slice, Value>,
}

impl FrozenColumn {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.longs.len() + self.doubles.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, slice: &Slice) -> Option<Value> {
        if let Some(v) = self.longs.get(slice) {
            return Some(Value::Long(*v));
        }
        if let Some(v) = self.doubles.get(slice) {
            return Some(Value::Double(*v));
        }
        self.objects.get(slice).cloned()
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> + '_ {
        self.longs
            .keys()
            .chain(self.doubles.keys())
            .chain(self.objects.keys())
    }

    /// Unordered iteration; callers needing a stable order sort by slice.
    pub fn iter(&self) -> impl Iterator<Item = (&Slice, Value)> + '_ {
        self.longs
            .iter()
            .map(|(s, v)| (s, Value::Long(*v)))
            .chain(self.doubles.iter().map(|(s, v)| (s, Value::Double(*v))))
            .chain(self.objects.iter().map(|(s, v)| (s, v.clone())))
    }

    /// Insert or overwrite; nulls are not stored.
    pub fn insert(&mut self, slice: Slice, value: Value) {
        self.longs.remove(&slice);
        self.doubles.remove(&slice);
        self.objects.remove(&slice);
        match value {
            Value::Null => {}
            Value::Long(v) => {
                self.longs.insert(slice, v);
            }
            Value::Double(v) => {
                self.doubles.insert(slice, v);
            }
            other => {
                self.objects.insert(slice, other);
            }
        }
    }
}

impl FromIterator<(Slice, Value)> for FrozenColumn {
    fn from_iter<I: IntoIterator<Item = (Slice, Value)>>(iter: I) -> Self {
        let mut column = FrozenColumn::empty();
        for (slice, value) in iter {
            column.insert(slice, value);
        }
        column
    }
}
