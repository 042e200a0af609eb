//! Group-by coordinates.
//!
//! A [`Slice`] is an immutable, column-sorted mapping from group-by column to coordinate. Slices
//! are produced through a [`SliceFactory`] owned by a single query execution; the factory interns
//! the column layout so every slice of the same group-by shares one `Arc<[Arc<str>]>`.

use crate::error::{OlapError, OlapResult};
use crate::query::GroupBy;
use crate::value::Value;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Slices carry no query or table context of their own and compare by coordinates only. They
/// are scoped by the per-step column that holds them; columns of different steps are never
/// merged.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Slice {
    columns: Arc<[Arc<str>]>,
    coordinates: Arc<[Value]>,
}

impl Slice {
    /// The single slice of a query without group-by.
    pub fn grand_total() -> Self {
        Self {
            columns: Arc::from(Vec::<Arc<str>>::new()),
            coordinates: Arc::from(Vec::<Value>::new()),
        }
    }

    /// Build a slice from arbitrary `(column, value)` pairs, sorting them by column.
    pub fn from_pairs<C, V>(pairs: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<Arc<str>>,
        V: Into<Value>,
    {
        let sorted: BTreeMap<Arc<str>, Value> = pairs
            .into_iter()
            .map(|(c, v)| (c.into(), v.into()))
            .collect();
        let (columns, coordinates): (Vec<_>, Vec<_>) = sorted.into_iter().unzip();
        Self {
            columns: Arc::from(columns),
            coordinates: Arc::from(coordinates),
        }
    }

    pub fn is_grand_total(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        let idx = self
            .columns
            .binary_search_by(|c| c.as_ref().cmp(column))
            .ok()?;
        self.coordinates.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.columns
            .iter()
            .map(|c| c.as_ref())
            .zip(self.coordinates.iter())
    }

    /// Keep only the coordinates of `group_by`'s columns. Columns of `group_by` absent from this
    /// slice are reported as an error: a slice can only be coarsened, never refined.
    pub fn project(&self, group_by: &GroupBy) -> OlapResult<Slice> {
        if *self.columns == *group_by.columns() {
            return Ok(self.clone());
        }
        let mut pairs = Vec::with_capacity(group_by.len());
        for column in group_by.columns() {
            let value = self.get(column).ok_or_else(|| {
                OlapError::IllegalState(format!(
                    "cannot project slice {self} onto missing column {column}"
                ))
            })?;
            pairs.push((column.clone(), value.clone()));
        }
        Ok(Slice::from_pairs(pairs))
    }

    /// Copy of this slice with `column` set to `value`.
    pub fn with(&self, column: impl Into<Arc<str>>, value: impl Into<Value>) -> Slice {
        let column = column.into();
        let value = value.into();
        let mut pairs: Vec<(Arc<str>, Value)> = self
            .columns
            .iter()
            .cloned()
            .zip(self.coordinates.iter().cloned())
            .filter(|(c, _)| *c != column)
            .collect();
        pairs.push((column, value));
        Slice::from_pairs(pairs)
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.iter().map(|(c, v)| (c.to_string(), v.clone())).collect()
    }
}

impl Ord for Slice {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((ca, va), (cb, vb)) in self.iter().zip(other.iter()) {
            let ord = ca.cmp(cb).then_with(|| va.cmp(vb));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.len().cmp(&other.len())
    }
}

impl PartialOrd for Slice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (column, value)) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice{self}")
    }
}

impl Serialize for Slice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Interns column layouts for the slices of one query execution.
#[derive(Debug, Default)]
pub struct SliceFactory {
    layouts: HashMap<GroupBy, Arc<[Arc<str>]>>,
}

impl SliceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder(&mut self, group_by: &GroupBy) -> SliceBuilder {
        let columns = self
            .layouts
            .entry(group_by.clone())
            .or_insert_with(|| group_by.columns().iter().cloned().collect())
            .clone();
        SliceBuilder {
            coordinates: SmallVec::with_capacity(columns.len()),
            columns,
        }
    }
}

/// Receives coordinates in the sorted column order of its group-by.
#[derive(Debug)]
pub struct SliceBuilder {
    columns: Arc<[Arc<str>]>,
    coordinates: SmallVec<[Value; 4]>,
}

impl SliceBuilder {
    /// The column whose coordinate is expected next, if any.
    pub fn next_column(&self) -> Option<&Arc<str>> {
        self.columns.get(self.coordinates.len())
    }

    pub fn append(&mut self, column: &str, value: Value) -> OlapResult<()> {
        match self.next_column() {
            Some(expected) if expected.as_ref() == column => {
                self.coordinates.push(value);
                Ok(())
            }
            Some(expected) => Err(OlapError::IllegalState(format!(
                "slice builder expected column {expected}, got {column}"
            ))),
            None => Err(OlapError::IllegalState(format!(
                "slice builder received extra column {column}"
            ))),
        }
    }

    pub fn build(self) -> OlapResult<Slice> {
        if self.coordinates.len() != self.columns.len() {
            return Err(OlapError::IllegalState(format!(
                "slice builder received {} of {} coordinates",
                self.coordinates.len(),
                self.columns.len()
            )));
        }
        Ok(Slice {
            columns: self.columns,
            coordinates: self.coordinates.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_sorted_columns() {
        let mut factory = SliceFactory::new();
        let group_by = GroupBy::of(["b", "a"]);

        let mut builder = factory.builder(&group_by);
        builder.append("a", Value::from("a1")).unwrap();
        builder.append("b", Value::from(2)).unwrap();
        let slice = builder.build().unwrap();
        assert_eq!(slice, Slice::from_pairs([("b", Value::from(2)), ("a", "a1".into())]));

        let mut builder = factory.builder(&group_by);
        assert!(builder.append("b", Value::from(2)).is_err());
        assert!(factory.builder(&group_by).build().is_err());
    }

    #[test]
    fn projection_coarsens_and_with_overrides() {
        let slice = Slice::from_pairs([("a", "a1"), ("b", "b1"), ("c", "c1")]);
        let coarse = slice.project(&GroupBy::of(["c", "a"])).unwrap();
        assert_eq!(coarse.to_string(), "{a=a1, c=c1}");
        assert!(coarse.project(&GroupBy::of(["b"])).is_err());
        assert_eq!(
            coarse.with("a", "a2").with("d", 4).to_string(),
            "{a=a2, c=c1, d=4}"
        );
        assert!(slice.project(&GroupBy::grand_total()).unwrap().is_grand_total());
    }
}
