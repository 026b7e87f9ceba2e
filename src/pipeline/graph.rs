use super::policy::StageSpec;
use crate::error::GraphError;
use std::collections::{HashMap, HashSet, VecDeque};

/// Stage dependency graph, validated acyclic
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Declaration order; used to break ties when several stages become ready
    order: Vec<String>,
    prerequisites: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl StageGraph {
    pub fn new(specs: &[StageSpec]) -> Result<Self, GraphError> {
        let mut order = Vec::with_capacity(specs.len());
        let mut prerequisites = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for spec in specs {
            if prerequisites.contains_key(&spec.name) {
                return Err(GraphError::Duplicate(spec.name.clone()));
            }
            order.push(spec.name.clone());
            prerequisites.insert(spec.name.clone(), spec.prerequisites.clone());
            dependents.entry(spec.name.clone()).or_default();
        }

        for spec in specs {
            for prerequisite in &spec.prerequisites {
                if !prerequisites.contains_key(prerequisite) {
                    return Err(GraphError::UnknownPrerequisite {
                        stage: spec.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
                dependents
                    .entry(prerequisite.clone())
                    .or_default()
                    .push(spec.name.clone());
            }
        }

        let graph = Self {
            order,
            prerequisites,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    // Kahn's algorithm; whatever can't be drained sits on a cycle
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut remaining: HashMap<&str, usize> = self
            .prerequisites
            .iter()
            .map(|(name, pre)| (name.as_str(), pre.len()))
            .collect();
        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .filter(|n| remaining[n.as_str()] == 0)
            .map(|n| n.as_str())
            .collect();
        let mut drained = HashSet::new();

        while let Some(name) = ready.pop_front() {
            drained.insert(name);
            for dependent in &self.dependents[name] {
                let count = remaining.entry(dependent.as_str()).or_default();
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent.as_str());
                }
            }
        }

        if drained.len() == self.order.len() {
            Ok(())
        } else {
            let stuck = self
                .order
                .iter()
                .filter(|n| !drained.contains(n.as_str()))
                .cloned()
                .collect();
            Err(GraphError::Cycle(stuck))
        }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn prerequisites(&self, name: &str) -> &[String] {
        self.prerequisites.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stages with no prerequisites, in declaration order
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| self.prerequisites(n).is_empty())
            .map(|n| n.as_str())
            .collect()
    }
}
