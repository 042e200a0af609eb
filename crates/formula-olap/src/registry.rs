use crate::error::{OlapError, OlapResult};
use crate::measure::Measure;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Named measure definitions of one cube. Built once, then shared read-only by queries.
#[derive(Clone, Debug, Default)]
pub struct MeasureRegistry {
    measures: BTreeMap<String, Arc<Measure>>,
}

impl MeasureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, measure: impl Into<Measure>) -> OlapResult<()> {
        let measure = measure.into();
        let name = measure.name().to_string();
        if self.measures.contains_key(&name) {
            return Err(OlapError::DuplicateMeasure { measure: name });
        }
        self.measures.insert(name, Arc::new(measure));
        Ok(())
    }

    pub fn add_all<M: Into<Measure>>(
        &mut self,
        measures: impl IntoIterator<Item = M>,
    ) -> OlapResult<()> {
        for measure in measures {
            self.add(measure)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.measures.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.measures.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> OlapResult<Arc<Measure>> {
        self.measures
            .get(name)
            .cloned()
            .ok_or_else(|| OlapError::UnknownMeasure(name.to_string()))
    }

    /// Like [`resolve`](Self::resolve), but unknown names become an [`Measure::Empty`].
    pub fn resolve_lenient(&self, name: &str) -> Arc<Measure> {
        self.measures
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Measure::empty(name)))
    }

    /// Static validation of every registered measure: unknown underlyings and cycles.
    pub fn dependency_graph(&self) -> OlapResult<MeasureGraph> {
        let mut underlyings: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, measure) in &self.measures {
            let mut deps = Vec::new();
            for underlying in measure.underlying_names() {
                if !self.measures.contains_key(underlying) {
                    return Err(OlapError::UnknownUnderlying {
                        measure: name.clone(),
                        underlying: underlying.to_string(),
                    });
                }
                if !deps.iter().any(|d| d == underlying) {
                    deps.push(underlying.to_string());
                }
            }
            underlyings.insert(name.clone(), deps);
        }

        let mut graph = MeasureGraph {
            underlyings,
            order: Vec::new(),
        };
        graph.order = graph.compute_order()?;
        Ok(graph)
    }

    pub fn validate(&self) -> OlapResult<()> {
        self.dependency_graph().map(|_| ())
    }

    /// Cycle check restricted to what `roots` reach. Unknown names fail unless `lenient`, in
    /// which case they are treated as empty leaves.
    pub(crate) fn check_reachable(&self, roots: &[String], lenient: bool) -> OlapResult<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Gray,
            Black,
        }

        struct Frame<'a> {
            name: &'a str,
            underlyings: Vec<&'a str>,
            idx: usize,
        }

        let mut color: HashMap<&str, Color> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        for root in roots {
            if color.contains_key(root.as_str()) {
                continue;
            }
            let Some(measure) = self.measures.get(root) else {
                if lenient {
                    continue;
                }
                return Err(OlapError::UnknownMeasure(root.clone()));
            };

            let mut frames = vec![Frame {
                name: root.as_str(),
                underlyings: measure.underlying_names(),
                idx: 0,
            }];
            stack.push(root.as_str());
            color.insert(root.as_str(), Color::Gray);

            while let Some(frame) = frames.last_mut() {
                if frame.idx >= frame.underlyings.len() {
                    color.insert(frame.name, Color::Black);
                    stack.pop();
                    frames.pop();
                    continue;
                }
                let next = frame.underlyings[frame.idx];
                frame.idx += 1;

                match color.get(next).copied() {
                    Some(Color::Black) => {}
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|n| n.to_string()).collect();
                        path.push(next.to_string());
                        return Err(OlapError::CyclicMeasures { path });
                    }
                    None => {
                        let Some((key, measure)) = self.measures.get_key_value(next) else {
                            if lenient {
                                continue;
                            }
                            return Err(OlapError::UnknownUnderlying {
                                measure: frame.name.to_string(),
                                underlying: next.to_string(),
                            });
                        };
                        color.insert(key.as_str(), Color::Gray);
                        stack.push(key.as_str());
                        frames.push(Frame {
                            name: key.as_str(),
                            underlyings: measure.underlying_names(),
                            idx: 0,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Measure-level dependency graph: measure name → distinct underlying names.
#[derive(Clone, Debug)]
pub struct MeasureGraph {
    underlyings: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
}

impl MeasureGraph {
    pub fn underlyings_of(&self, name: &str) -> Option<&[String]> {
        self.underlyings.get(name).map(Vec::as_slice)
    }

    /// Every measure after all of its underlyings.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    // Kahn's algorithm over "depends on" edges; names sorted for reproducible output.
    fn compute_order(&self) -> OlapResult<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = self
            .underlyings
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, deps) in &self.underlyings {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter_map(|(name, deg)| (*deg == 0).then_some(*name))
            .collect();
        let mut order = Vec::with_capacity(self.underlyings.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for &dependent in dependents.get(name).into_iter().flatten() {
                if let Some(deg) = remaining.get_mut(dependent) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.underlyings.len() {
            let candidates: BTreeSet<&str> = remaining
                .iter()
                .filter_map(|(name, deg)| (*deg > 0).then_some(*name))
                .collect();
            return Err(self.cycle_among(&candidates));
        }
        Ok(order)
    }

    /// Follow unresolved dependencies from the smallest candidate until a name repeats.
    fn cycle_among(&self, candidates: &BTreeSet<&str>) -> OlapError {
        let Some(start) = candidates.first() else {
            return OlapError::CyclicMeasures { path: Vec::new() };
        };
        let mut path: Vec<String> = vec![start.to_string()];
        let mut current = start.to_string();
        loop {
            let next = self
                .underlyings
                .get(&current)
                .and_then(|deps| deps.iter().find(|d| candidates.contains(d.as_str())))
                .cloned();
            let Some(next) = next else {
                return OlapError::CyclicMeasures { path };
            };
            if let Some(pos) = path.iter().position(|p| *p == next) {
                let mut cycle = path.split_off(pos);
                cycle.push(next);
                return OlapError::CyclicMeasures { path: cycle };
            }
            path.push(next.clone());
            current = next;
        }
    }
}
