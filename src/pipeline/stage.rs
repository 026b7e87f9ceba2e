use super::graph::StageGraph;
use super::policy::{StagePolicy, StageSpec};
use super::result::StageResult;
use crate::engine::Artifact;
use crate::error::{GraphError, StageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Session facts handed to every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub channel_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Everything a stage may read
#[derive(Debug, Clone)]
pub struct StageInput {
    pub session: SessionMeta,
    pub artifact: Artifact,

    /// Results of this stage's prerequisites
    pub prior: BTreeMap<String, StageResult>,
}

impl StageInput {
    pub fn prior_output(&self, stage: &str) -> Option<&str> {
        self.prior
            .get(stage)
            .filter(|r| r.succeeded())
            .and_then(|r| r.output.as_deref())
    }
}

/// Successful stage output
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    /// Remote id, commit reference, storage key, file path...
    pub reference: String,
    pub detail: Option<serde_json::Value>,
}

impl StageOutput {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One unit of post-processing work
///
/// Stages should watch `cancel` during long I/O; the runner also drops the
/// attempt future at its timeout.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError>;
}

/// Validated set of stages with their policies and dependency graph
pub struct StageSet {
    specs: HashMap<String, StageSpec>,
    stages: HashMap<String, Arc<dyn Stage>>,
    graph: StageGraph,
}

impl StageSet {
    pub fn new(entries: Vec<(StageSpec, Arc<dyn Stage>)>) -> Result<Self, GraphError> {
        let specs_in_order: Vec<StageSpec> = entries.iter().map(|(s, _)| s.clone()).collect();
        let graph = StageGraph::new(&specs_in_order)?;

        let mut specs = HashMap::new();
        let mut stages = HashMap::new();
        for (spec, stage) in entries {
            stages.insert(spec.name.clone(), stage);
            specs.insert(spec.name.clone(), spec);
        }

        Ok(Self {
            specs,
            stages,
            graph,
        })
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn names(&self) -> &[String] {
        self.graph.order()
    }

    pub fn policy(&self, name: &str) -> Option<&StagePolicy> {
        self.specs.get(name).map(|s| &s.policy)
    }

    pub fn stage(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.policy(name).is_some_and(|p| p.required)
    }
}
