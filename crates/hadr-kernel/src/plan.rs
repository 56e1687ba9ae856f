//! Task plans
//!
//! Providers emit a flat, hand-ordered list of tasks. A [`TaskPlan`] keeps the
//! same order but records, for every step, the steps it depends on, so that
//! the ordering can be checked instead of trusted.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashMap;
use std::fmt;

/// Identifier of a plan step, unique within one plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(String);

impl StepId {
    /// Wraps `id` as is.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Why [`TaskPlan::verify`] rejected a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Two steps share an id.
    #[error("step '{0}' appears more than once")]
    DuplicateStep(StepId),
    /// A prerequisite names no step in the plan.
    #[error("step '{step}' depends on unknown step '{prerequisite}'")]
    UnknownPrerequisite {
        /// The dependent step.
        step: StepId,
        /// The missing id.
        prerequisite: StepId,
    },
    /// The prerequisites form a cycle.
    #[error("dependency cycle through step '{0}'")]
    Cycle(StepId),
    /// A step is listed before one of its prerequisites.
    #[error("step '{step}' is scheduled before its prerequisite '{prerequisite}'")]
    OutOfOrder {
        /// The dependent step.
        step: StepId,
        /// The prerequisite listed after it.
        prerequisite: StepId,
    },
}

/// One entry of a [`TaskPlan`].
#[derive(Debug, Clone)]
pub struct PlanStep<T> {
    /// Unique id, e.g. `join-db:Sales:S1`.
    pub id: StepId,
    /// Steps that must come earlier in the plan.
    pub prerequisites: Vec<StepId>,
    /// The task or other payload.
    pub item: T,
}

/// Ordered steps with explicit prerequisites.
#[derive(Debug, Clone)]
pub struct TaskPlan<T> {
    steps: Vec<PlanStep<T>>,
}

impl<T> Default for TaskPlan<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T> TaskPlan<T> {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step without prerequisites.
    pub fn push(&mut self, id: impl Into<StepId>, item: T) -> StepId {
        self.push_after(id, std::iter::empty::<StepId>(), item)
    }

    /// Append a step that must run after every step in `prerequisites`.
    pub fn push_after<I, P>(&mut self, id: impl Into<StepId>, prerequisites: I, item: T) -> StepId
    where
        I: IntoIterator<Item = P>,
        P: Into<StepId>,
    {
        let id = id.into();
        let mut prereqs: Vec<StepId> = Vec::new();
        for p in prerequisites {
            let p = p.into();
            if !prereqs.contains(&p) {
                prereqs.push(p);
            }
        }
        self.steps.push(PlanStep {
            id: id.clone(),
            prerequisites: prereqs,
            item,
        });
        id
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PlanStep<T>] {
        &self.steps
    }

    /// Step ids in execution order.
    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|s| &s.id)
    }

    /// Payloads in execution order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.steps.iter().map(|s| &s.item)
    }

    /// Index of the step with `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id.as_str() == id)
    }

    /// The step with `id`.
    pub fn get(&self, id: &str) -> Option<&PlanStep<T>> {
        self.steps.iter().find(|s| s.id.as_str() == id)
    }

    /// Drop the prerequisites and keep the order.
    pub fn into_items(self) -> Vec<T> {
        self.steps.into_iter().map(|s| s.item).collect()
    }

    /// Transform every payload, keeping ids and prerequisites.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TaskPlan<U> {
        TaskPlan {
            steps: self
                .steps
                .into_iter()
                .map(|s| PlanStep {
                    id: s.id,
                    prerequisites: s.prerequisites,
                    item: f(s.item),
                })
                .collect(),
        }
    }

    /// Check ids are unique, prerequisites exist, the graph is acyclic and
    /// every prerequisite is scheduled before its dependent.
    pub fn verify(&self) -> Result<(), PlanError> {
        let index = self.index()?;

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (pos, step) in self.steps.iter().enumerate() {
            graph.add_node(pos);
            for prerequisite in &step.prerequisites {
                let Some(&from) = index.get(prerequisite) else {
                    return Err(PlanError::UnknownPrerequisite {
                        step: step.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                };
                graph.add_edge(from, pos, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(PlanError::Cycle(self.steps[cycle.node_id()].id.clone()));
        }

        for (pos, step) in self.steps.iter().enumerate() {
            for prerequisite in &step.prerequisites {
                if index[prerequisite] > pos {
                    return Err(PlanError::OutOfOrder {
                        step: step.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every step `id` transitively depends on, in plan order.
    pub fn ancestors(&self, id: &str) -> Vec<&StepId> {
        let mut wanted: Vec<&StepId> = Vec::new();
        let mut frontier: Vec<&StepId> = match self.get(id) {
            Some(step) => step.prerequisites.iter().collect(),
            None => return Vec::new(),
        };
        while let Some(next) = frontier.pop() {
            if wanted.contains(&next) {
                continue;
            }
            wanted.push(next);
            if let Some(step) = self.get(next.as_str()) {
                frontier.extend(step.prerequisites.iter());
            }
        }
        self.ids().filter(|id| wanted.contains(id)).collect()
    }

    fn index(&self) -> Result<HashMap<&StepId, usize>, PlanError> {
        let mut index = HashMap::with_capacity(self.steps.len());
        for (pos, step) in self.steps.iter().enumerate() {
            if index.insert(&step.id, pos).is_some() {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(spec: &[(&str, &[&str])]) -> TaskPlan<()> {
        let mut plan = TaskPlan::new();
        for (id, prereqs) in spec {
            plan.push_after(*id, prereqs.iter().copied(), ());
        }
        plan
    }

    #[test]
    fn ordered_plan_verifies() {
        let p = plan(&[
            ("create-ag", &[]),
            ("wait-online", &["create-ag"]),
            ("join:R2", &["wait-online"]),
            ("restore-log:R2", &["join:R2"]),
        ]);
        assert_eq!(p.verify(), Ok(()));
        assert_eq!(
            p.ancestors("restore-log:R2")
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>(),
            vec!["create-ag", "wait-online", "join:R2"]
        );
    }

    #[test]
    fn prerequisite_after_dependent_is_rejected() {
        let p = plan(&[("restore-log:R2", &["join:R2"]), ("join:R2", &[])]);
        assert_eq!(
            p.verify(),
            Err(PlanError::OutOfOrder {
                step: "restore-log:R2".into(),
                prerequisite: "join:R2".into(),
            })
        );
    }

    #[test]
    fn unknown_and_duplicate_steps_are_rejected() {
        let unknown = plan(&[("a", &["missing"])]);
        assert!(matches!(
            unknown.verify(),
            Err(PlanError::UnknownPrerequisite { .. })
        ));

        let dup = plan(&[("a", &[]), ("a", &[])]);
        assert_eq!(dup.verify(), Err(PlanError::DuplicateStep("a".into())));
    }

    #[test]
    fn cycles_are_rejected() {
        let p = plan(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(p.verify(), Err(PlanError::Cycle(_))));
    }
}
