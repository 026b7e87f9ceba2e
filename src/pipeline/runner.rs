use super::result::{StageResult, StageStatus};
use super::stage::{Stage, StageInput, StageSet};
use super::policy::StagePolicy;
use crate::error::StageError;
use crate::health::{Component, Probe};
use crate::registry::{Registry, RunningAttempt};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Receives every stage result change, in order, for one session
#[async_trait::async_trait]
pub trait StageObserver: Send + Sync {
    async fn stage_updated(&self, session_id: &str, result: &StageResult);
}

/// Observer that discards updates
pub struct NoopObserver;

#[async_trait::async_trait]
impl StageObserver for NoopObserver {
    async fn stage_updated(&self, _session_id: &str, _result: &StageResult) {}
}

/// How the session should end, given its stage results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineVerdict {
    /// Every stage succeeded
    Archived,
    /// Required stages succeeded; some optional stage did not
    ArchivedWithWarnings,
    /// A required stage failed or was skipped
    Failed { stage: String, error: String },
}

/// Terminal results of a whole pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub results: BTreeMap<String, StageResult>,
    pub required: BTreeSet<String>,
}

impl PipelineOutcome {
    pub fn verdict(&self) -> PipelineVerdict {
        for name in &self.required {
            match self.results.get(name) {
                Some(r) if r.succeeded() => {}
                Some(r) => {
                    return PipelineVerdict::Failed {
                        stage: name.clone(),
                        error: r.last_error.clone().unwrap_or_else(|| format!("{:?}", r.status)),
                    }
                }
                None => {
                    return PipelineVerdict::Failed {
                        stage: name.clone(),
                        error: "stage never ran".to_string(),
                    }
                }
            }
        }

        if self.results.values().all(|r| r.succeeded()) {
            PipelineVerdict::Archived
        } else {
            PipelineVerdict::ArchivedWithWarnings
        }
    }

    /// Optional stages that did not succeed
    pub fn optional_failures(&self) -> Vec<&StageResult> {
        self.results
            .values()
            .filter(|r| !self.required.contains(&r.stage) && !r.succeeded())
            .collect()
    }
}

/// Generic executor for named stages
///
/// Handles per-attempt timeout, retry with backoff, cancellation and the
/// dependency schedule. It knows nothing about what stages do.
pub struct StageRunner {
    registry: Arc<Registry>,
}

impl StageRunner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Run one stage to a terminal result
    ///
    /// Each attempt waits for a dispatch slot, runs under the policy's
    /// timeout and its own child cancellation token, then releases the slot
    /// before any backoff sleep.
    pub async fn run(
        &self,
        input: &StageInput,
        stage: &dyn Stage,
        policy: &StagePolicy,
        cancel: &CancellationToken,
        observer: &dyn StageObserver,
    ) -> StageResult {
        let name = stage.name().to_string();
        let session_id = input.session.session_id.as_str();
        let max_attempts = policy.max_attempts.max(1);
        let mut result = StageResult::pending(&name);
        let mut retryable = true;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                break;
            }

            let attempt_token = cancel.child_token();
            let slot = tokio::select! {
                slot = self.registry.acquire(RunningAttempt {
                    session_id: session_id.to_string(),
                    stage: name.clone(),
                    attempt,
                    started: Instant::now(),
                    cancel: attempt_token.clone(),
                }) => slot,
                _ = cancel.cancelled() => break,
            };

            result.attempts = attempt;
            result.status = StageStatus::Running;
            result.started_at.get_or_insert_with(Utc::now);
            observer.stage_updated(session_id, &result).await;
            self.registry.beat(Component::StageRunner);

            info!("{}/{}: attempt {}/{}", session_id, name, attempt, max_attempts);

            let started = Instant::now();
            let outcome = tokio::select! {
                r = tokio::time::timeout(policy.attempt_timeout, stage.execute(input, attempt_token.clone())) => {
                    match r {
                        Ok(r) => r,
                        Err(_) => {
                            attempt_token.cancel();
                            Err(StageError::Timeout(policy.attempt_timeout))
                        }
                    }
                }
                _ = attempt_token.cancelled() => Err(StageError::Cancelled),
            };

            drop(slot);
            self.registry.beat(Component::StageRunner);

            // A cancelled attempt whose session is still live was stopped by the supervisor
            let outcome = match outcome {
                Err(StageError::Cancelled) if !cancel.is_cancelled() => {
                    Err(StageError::Stale(started.elapsed()))
                }
                other => other,
            };

            match outcome {
                Ok(output) => {
                    result.status = StageStatus::Succeeded;
                    result.output = Some(output.reference);
                    result.detail = output.detail;
                    result.finished_at = Some(Utc::now());
                    info!(
                        "{}/{}: succeeded on attempt {} → {}",
                        session_id,
                        name,
                        attempt,
                        result.output.as_deref().unwrap_or_default()
                    );
                    observer.stage_updated(session_id, &result).await;
                    return result;
                }
                Err(StageError::Cancelled) => {
                    result.last_error = Some(StageError::Cancelled.to_string());
                    break;
                }
                Err(e) => {
                    warn!(
                        "{}/{}: attempt {}/{} failed: {}",
                        session_id, name, attempt, max_attempts, e
                    );
                    result.last_error = Some(e.to_string());
                    if !e.is_retryable() {
                        retryable = false;
                        break;
                    }

                    if attempt < max_attempts {
                        result.status = StageStatus::Pending;
                        observer.stage_updated(session_id, &result).await;

                        let delay = policy.backoff.delay_for(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                }
            }
        }

        result.status = StageStatus::Failed;
        result.finished_at = Some(Utc::now());

        if cancel.is_cancelled() {
            result.last_error.get_or_insert_with(|| StageError::Cancelled.to_string());
            info!("{}/{}: cancelled after {} attempts", session_id, name, result.attempts);
        } else if !retryable {
            let message = result.last_error.as_deref().unwrap_or_default();
            if policy.required {
                error!("{}/{}: {}", session_id, name, message);
            } else {
                warn!("{}/{}: {}", session_id, name, message);
            }
        } else {
            let exhausted = format!(
                "retry budget exhausted after {} attempts: {}",
                result.attempts,
                result.last_error.as_deref().unwrap_or_default()
            );
            if policy.required {
                error!("{}/{}: {}", session_id, name, exhausted);
            } else {
                warn!("{}/{}: {}", session_id, name, exhausted);
            }
            result.last_error = Some(exhausted);
        }

        observer.stage_updated(session_id, &result).await;
        result
    }

    /// Run every stage of `set`, respecting declared dependencies
    ///
    /// Stages become ready when all prerequisites are terminal and are
    /// dispatched immediately; independent stages run concurrently. A stage
    /// whose required prerequisite did not succeed is skipped.
    pub async fn run_pipeline(
        &self,
        input: StageInput,
        set: &StageSet,
        cancel: &CancellationToken,
        observer: &dyn StageObserver,
    ) -> PipelineOutcome {
        let session_id = input.session.session_id.clone();
        let mut results: BTreeMap<String, StageResult> = set
            .names()
            .iter()
            .map(|n| (n.clone(), StageResult::pending(n)))
            .collect();
        for result in results.values() {
            observer.stage_updated(&session_id, result).await;
        }

        let required: BTreeSet<String> = set
            .names()
            .iter()
            .filter(|n| set.is_required(n))
            .cloned()
            .collect();

        info!(
            "{}: pipeline starting ({} stages, {} required)",
            session_id,
            results.len(),
            required.len()
        );

        let mut dispatched: HashSet<String> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            // Resolve readiness until nothing changes (skips can cascade)
            let mut progressed = true;
            while progressed {
                progressed = false;

                for name in set.names() {
                    if dispatched.contains(name) {
                        continue;
                    }
                    let prerequisites = set.graph().prerequisites(name);
                    if !prerequisites
                        .iter()
                        .all(|p| results.get(p).is_some_and(|r| r.is_terminal()))
                    {
                        continue;
                    }

                    dispatched.insert(name.clone());
                    progressed = true;

                    let unmet = prerequisites
                        .iter()
                        .find(|p| set.is_required(p) && !results.get(*p).is_some_and(|r| r.succeeded()));

                    if let Some(unmet) = unmet {
                        let skipped = StageResult::skipped(
                            name.clone(),
                            StageError::DependencyUnmet(unmet.clone()).to_string(),
                        );
                        warn!("{}/{}: skipped, {} did not succeed", session_id, name, unmet);
                        observer.stage_updated(&session_id, &skipped).await;
                        results.insert(name.clone(), skipped);
                        continue;
                    }

                    let (Some(stage), Some(policy)) = (set.stage(name), set.policy(name)) else {
                        continue;
                    };
                    let stage_input = StageInput {
                        session: input.session.clone(),
                        artifact: input.artifact.clone(),
                        prior: prerequisites
                            .iter()
                            .filter_map(|p| results.get(p).map(|r| (p.clone(), r.clone())))
                            .collect(),
                    };

                    in_flight.push(async move {
                        self.run(&stage_input, stage.as_ref(), policy, cancel, observer)
                            .await
                    });
                }
            }

            match in_flight.next().await {
                Some(result) => {
                    results.insert(result.stage.clone(), result);
                }
                None => break,
            }
        }

        let outcome = PipelineOutcome { results, required };
        info!("{}: pipeline finished: {:?}", session_id, outcome.verdict());
        outcome
    }
}

#[async_trait::async_trait]
impl Probe for StageRunner {
    fn component(&self) -> Component {
        Component::StageRunner
    }

    /// Fails while every slot is busy and work is queued; if that persists
    /// past the staleness threshold with no attempt finishing, the runner
    /// is considered dead
    async fn probe(&self) -> Result<(), String> {
        let queued = self.registry.queued();
        let running = self.registry.running().len();
        if queued > 0 && running >= self.registry.ceiling() {
            return Err(format!(
                "dispatch saturated: {running} running, {queued} queued"
            ));
        }
        self.registry.beat(Component::StageRunner);
        Ok(())
    }
}
