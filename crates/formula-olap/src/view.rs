//! The result of a query: measure values per slice.

use crate::column::FrozenColumn;
use crate::dag::{QueryStepsDag, StepId};
use crate::slice::Slice;
use crate::value::Value;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularView {
    slices: BTreeMap<Slice, BTreeMap<String, Value>>,
}

impl TabularView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `measure` on `slice`. Returns `false`, keeping the existing value,
    /// if the slice already has a value for that measure.
    pub fn append(&mut self, slice: Slice, measure: &str, value: Value) -> bool {
        let values = self.slices.entry(slice).or_default();
        if values.contains_key(measure) {
            return false;
        }
        values.insert(measure.to_string(), value);
        true
    }

    /// Make `slice` part of the view even if no measure has a value on it.
    pub fn ensure_slice(&mut self, slice: Slice) {
        self.slices.entry(slice).or_default();
    }

    pub fn get(&self, slice: &Slice) -> Option<&BTreeMap<String, Value>> {
        self.slices.get(slice)
    }

    pub fn value(&self, slice: &Slice, measure: &str) -> Option<&Value> {
        self.slices.get(slice)?.get(measure)
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> + '_ {
        self.slices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Slice, &BTreeMap<String, Value>)> + '_ {
        self.slices.iter()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// One flat record per slice: coordinates, then measure values.
    pub fn to_rows(&self) -> Vec<BTreeMap<String, Value>> {
        self.slices
            .iter()
            .map(|(slice, values)| {
                let mut row = slice.to_map();
                row.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                row
            })
            .collect()
    }
}

#[derive(Serialize)]
struct ViewEntry<'a> {
    coordinates: &'a Slice,
    values: &'a BTreeMap<String, Value>,
}

impl Serialize for TabularView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.slices.len()))?;
        for (coordinates, values) in &self.slices {
            seq.serialize_element(&ViewEntry {
                coordinates,
                values,
            })?;
        }
        seq.end()
    }
}

/// Copy the columns of the reported steps into a view: the roots, or every step reachable
/// from them breadth-first when `include_underlyings` is set.
///
/// A measure is reported under its name by the first step that reaches it, roots first. Other
/// steps of the same measure (another filter or group-by) are reported as `name#<step id>`,
/// the id the explain output shows.
pub fn assemble_view(
    dag: &QueryStepsDag,
    columns: &[Option<Arc<FrozenColumn>>],
    include_underlyings: bool,
) -> TabularView {
    let reported = if include_underlyings {
        dag.breadth_first()
    } else {
        dag.roots().to_vec()
    };

    let mut claimed: HashMap<&str, StepId> = HashMap::new();
    let mut view = TabularView::new();
    for id in reported {
        let Some(column) = columns.get(id).and_then(Option::as_ref) else {
            continue;
        };
        let name = dag.step(id).measure.name();
        let owner = *claimed.entry(name).or_insert(id);
        let key = if owner == id {
            name.to_string()
        } else {
            format!("{name}#{id}")
        };
        let mut entries: Vec<(&Slice, Value)> = column.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (slice, value) in entries {
            if !view.append(slice.clone(), &key, value) {
                log::debug!("{key} already has a value on {slice}; keeping the first one");
            }
        }
    }
    view
}
