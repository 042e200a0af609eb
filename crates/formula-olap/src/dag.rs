//! The per-query step graph.
//!
//! Steps are interned into dense [`StepId`]s. Two adjacency lists are kept per step:
//!
//! - `underlyings`: distinct children, the acyclic graph used for ordering;
//! - `positions`: one entry per underlying position of the parent measure, so a step referenced
//!   twice by the same parent appears twice. Only evaluation reads it, to hand each position its
//!   column.
//!
//! Every edge insertion checks that the child does not already reach the parent, so the graph
//! is acyclic by construction.

use crate::error::{OlapError, OlapResult};
use crate::measure::Measure;
use crate::step::QueryStep;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub type StepId = usize;

#[derive(Clone, Debug, Default)]
pub struct QueryStepsDag {
    steps: Vec<QueryStep>,
    index: HashMap<QueryStep, StepId>,
    underlyings: Vec<Vec<StepId>>,
    positions: Vec<Vec<StepId>>,
    dependents: Vec<Vec<StepId>>,
    roots: Vec<StepId>,
}

impl QueryStepsDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `roots` breadth-first into the full step graph.
    ///
    /// The worklist is FIFO so that step ids, and therefore explain output and evaluation
    /// order, are reproducible for a given query.
    pub fn build(
        roots: impl IntoIterator<Item = QueryStep>,
        resolve: &dyn Fn(&str) -> OlapResult<Arc<Measure>>,
    ) -> OlapResult<Self> {
        let mut dag = QueryStepsDag::new();
        let mut queue: VecDeque<StepId> = VecDeque::new();
        let mut enqueued: HashSet<StepId> = HashSet::new();

        for root in roots {
            let id = dag.add_root(root);
            if enqueued.insert(id) {
                queue.push_back(id);
            }
        }

        while let Some(id) = queue.pop_front() {
            let step = &dag.steps[id];
            if matches!(step.measure.as_ref(), Measure::Aggregator(_)) {
                continue;
            }
            let children = step
                .underlying_steps(resolve)
                .map_err(|err| err.at_step(step))?;
            for child in children {
                let child_id = dag.add_step(child);
                dag.add_edge(id, child_id)?;
                if enqueued.insert(child_id) {
                    queue.push_back(child_id);
                }
            }
        }

        dag.check_consistency()?;
        log::debug!(
            "step graph: {} steps, {} roots, {} leaves",
            dag.len(),
            dag.roots.len(),
            dag.leaves().count()
        );
        Ok(dag)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Intern `step`, reusing the existing id when an equal step is already present.
    pub fn add_step(&mut self, step: QueryStep) -> StepId {
        if let Some(&id) = self.index.get(&step) {
            return id;
        }
        let id = self.steps.len();
        self.index.insert(step.clone(), id);
        self.steps.push(step);
        self.underlyings.push(Vec::new());
        self.positions.push(Vec::new());
        self.dependents.push(Vec::new());
        id
    }

    pub fn add_root(&mut self, step: QueryStep) -> StepId {
        let id = self.add_step(step);
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        id
    }

    /// Record that `parent` needs `child` at its next underlying position.
    pub fn add_edge(&mut self, parent: StepId, child: StepId) -> OlapResult<()> {
        if parent >= self.len() || child >= self.len() {
            return Err(OlapError::InconsistentDag(format!(
                "edge {parent} -> {child} refers to an unknown step"
            )));
        }
        if parent == child || self.reaches(child, parent) {
            return Err(OlapError::CyclicSteps {
                parent: self.steps[parent].to_string(),
                child: self.steps[child].to_string(),
            });
        }
        self.positions[parent].push(child);
        if !self.underlyings[parent].contains(&child) {
            self.underlyings[parent].push(child);
            self.dependents[child].push(parent);
        }
        Ok(())
    }

    // Whether `to` is reachable from `from` following underlying edges.
    fn reaches(&self, from: StepId, to: StepId) -> bool {
        let mut seen = vec![false; self.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            stack.extend(self.underlyings[id].iter().copied());
        }
        false
    }

    pub fn step(&self, id: StepId) -> &QueryStep {
        &self.steps[id]
    }

    pub fn id_of(&self, step: &QueryStep) -> Option<StepId> {
        self.index.get(step).copied()
    }

    pub fn steps(&self) -> impl Iterator<Item = (StepId, &QueryStep)> + '_ {
        self.steps.iter().enumerate()
    }

    pub fn roots(&self) -> &[StepId] {
        &self.roots
    }

    /// Distinct children of `id`, in first-reference order.
    pub fn underlyings(&self, id: StepId) -> &[StepId] {
        &self.underlyings[id]
    }

    /// Children of `id` per underlying position, repeats included.
    pub fn underlying_positions(&self, id: StepId) -> &[StepId] {
        &self.positions[id]
    }

    pub fn dependents(&self, id: StepId) -> &[StepId] {
        &self.dependents[id]
    }

    /// Steps without underlyings.
    pub fn leaves(&self) -> impl Iterator<Item = StepId> + '_ {
        (0..self.len()).filter(|&id| self.underlyings[id].is_empty())
    }

    /// Every step after all of its underlyings. Ties are broken by step id.
    pub fn evaluation_order(&self) -> OlapResult<Vec<StepId>> {
        let mut pending: Vec<usize> = self.underlyings.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<StepId> = self.leaves().collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &parent in &self.dependents[id] {
                pending[parent] -= 1;
                if pending[parent] == 0 {
                    ready.insert(parent);
                }
            }
        }

        if order.len() != self.len() {
            return Err(OlapError::InconsistentDag(format!(
                "{} of {} steps could not be ordered",
                self.len() - order.len(),
                self.len()
            )));
        }
        Ok(order)
    }

    /// Breadth-first from the roots, each step once.
    pub fn breadth_first(&self) -> Vec<StepId> {
        let mut seen = vec![false; self.len()];
        let mut queue: VecDeque<StepId> = self.roots.iter().copied().collect();
        let mut out = Vec::with_capacity(self.len());
        while let Some(id) = queue.pop_front() {
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            out.push(id);
            queue.extend(self.underlyings[id].iter().copied());
        }
        out
    }

    /// The distinct-edge graph and the per-position graph must describe the same children, and
    /// every step must expose exactly as many positions as its measure has underlyings.
    pub fn check_consistency(&self) -> OlapResult<()> {
        for (id, step) in self.steps.iter().enumerate() {
            let distinct: BTreeSet<StepId> = self.positions[id].iter().copied().collect();
            let expected: BTreeSet<StepId> = self.underlyings[id].iter().copied().collect();
            if distinct != expected {
                return Err(OlapError::InconsistentDag(format!(
                    "children of {step} differ between edge lists"
                )));
            }
            let positions = self.positions[id].len();
            if positions > 0 && positions != expected_positions(step) {
                return Err(OlapError::InconsistentDag(format!(
                    "{step} has {positions} underlying positions"
                )));
            }
        }
        Ok(())
    }
}

fn expected_positions(step: &QueryStep) -> usize {
    match step.measure.as_ref() {
        Measure::Columnator(c) if !c.is_active(&step.group_by) => 0,
        measure => measure.underlying_names().len(),
    }
}
