//! StageGraph: a validated DAG of stages and its in-process executor.
//!
//! Stages run one at a time in topological order. A stage starts only when
//! every dependency has succeeded; the first stage to exhaust its retries
//! ends the run and leaves every later stage pending.

use super::run::{PipelineRun, RunOutcome, StageRecord};
use super::{StageRunner, StageSpec};
use crate::cancellation::CancellationToken;
use crate::context::{StageContext, StageInputs};
use crate::core::StageStatus;
use crate::errors::{ContractErrorInfo, CycleDetectedError, DemandflowError, PipelineValidationError};
use crate::events::{EventSink, LoggingEventSink};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A directed acyclic graph of stages for execution.
pub struct StageGraph {
    name: String,
    stages: HashMap<String, StageSpec>,
    execution_order: Vec<String>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageGraph")
            .field("name", &self.name)
            .field("execution_order", &self.execution_order)
            .finish_non_exhaustive()
    }
}

impl StageGraph {
    /// Creates a stage graph, checking that every dependency exists and that
    /// there is no cycle.
    ///
    /// `stage_order` is the declaration order; it breaks ties between
    /// independent stages.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown dependency or a cycle.
    pub fn new(
        name: impl Into<String>,
        stages: HashMap<String, StageSpec>,
        stage_order: Vec<String>,
    ) -> Result<Self, PipelineValidationError> {
        for spec in stages.values() {
            spec.validate()?;
            if let Some(dep) = spec.dependencies.iter().find(|d| !stages.contains_key(*d)) {
                return Err(unknown_dependency(&spec.name, dep));
            }
        }
        if let Some(cycle) = find_cycle(&stages, &stage_order) {
            return Err(CycleDetectedError::new(cycle).into());
        }

        let execution_order = topological_sort(&stages, &stage_order);
        Ok(Self {
            name: name.into(),
            stages,
            execution_order,
            events: Arc::new(LoggingEventSink),
        })
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns a stage specification by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Runs every stage once, without a cancellation source.
    pub async fn run(&self) -> PipelineRun {
        self.run_with_cancellation(&CancellationToken::new()).await
    }

    /// Runs every stage once, checking `token` before each stage starts.
    pub async fn run_with_cancellation(&self, token: &CancellationToken) -> PipelineRun {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let start = Instant::now();
        let runner = StageRunner::new(self.events.clone());

        let mut records: Vec<StageRecord> =
            self.execution_order.iter().map(StageRecord::pending).collect();
        let mut outputs = HashMap::new();
        let mut outcome = RunOutcome::Succeeded;

        info!(pipeline = %self.name, %run_id, stages = self.stages.len(), "Pipeline run started");
        self.events.emit(
            "pipeline.started",
            Some(json!({ "pipeline": &self.name, "run_id": run_id.to_string() })),
        );

        for (index, stage_name) in self.execution_order.iter().enumerate() {
            if token.is_cancelled() {
                let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                warn!(pipeline = %self.name, %run_id, next_stage = %stage_name, %reason, "Pipeline run cancelled");
                self.events.emit(
                    "pipeline.cancelled",
                    Some(json!({ "pipeline": &self.name, "next_stage": stage_name, "reason": &reason })),
                );
                outcome = RunOutcome::Cancelled {
                    reason,
                    next_stage: stage_name.clone(),
                };
                break;
            }

            let spec = &self.stages[stage_name];
            if let Some(dep) = unsatisfied_dependency(spec, &records) {
                let err = DemandflowError::DependencyNotSatisfied {
                    stage: stage_name.clone(),
                    dependency: dep.to_string(),
                };
                error!(pipeline = %self.name, stage = %stage_name, error = %err, "Stage blocked");
                records[index].error = Some(err.to_string());
                outcome = RunOutcome::Failed {
                    stage: stage_name.clone(),
                    error: err,
                };
                break;
            }

            records[index].transition(StageStatus::Running);
            self.events.emit("stage.started", Some(json!({ "stage": stage_name })));

            let ctx = StageContext::new(
                run_id,
                &self.name,
                stage_name,
                StageInputs::new(&outputs, &spec.dependencies, stage_name),
            );
            let stage_start = Instant::now();
            let attempts = runner.run(spec, &ctx).await;
            let duration_ms = stage_start.elapsed().as_secs_f64() * 1000.0;

            let record = &mut records[index];
            record.attempts = attempts.attempts;
            record.duration_ms = duration_ms;

            match attempts.result {
                Ok(output) => {
                    record.transition(StageStatus::Succeeded);
                    info!(
                        stage = %stage_name,
                        attempts = attempts.attempts,
                        duration_ms,
                        "Stage succeeded"
                    );
                    self.events.emit(
                        "stage.completed",
                        Some(json!({
                            "stage": stage_name,
                            "attempts": attempts.attempts,
                            "duration_ms": duration_ms,
                        })),
                    );
                    outputs.insert(stage_name.clone(), output);
                }
                Err(err) => {
                    record.transition(StageStatus::Failed);
                    record.error = Some(err.to_string());
                    error!(stage = %stage_name, attempts = attempts.attempts, error = %err, "Stage failed");
                    self.events.emit(
                        "stage.failed",
                        Some(json!({
                            "stage": stage_name,
                            "attempts": attempts.attempts,
                            "error": err.to_string(),
                            "duration_ms": duration_ms,
                        })),
                    );
                    outcome = RunOutcome::Failed {
                        stage: stage_name.clone(),
                        error: err,
                    };
                    break;
                }
            }
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            RunOutcome::Succeeded => {
                info!(pipeline = %self.name, %run_id, duration_ms, "Pipeline run succeeded");
                self.events.emit(
                    "pipeline.completed",
                    Some(json!({ "pipeline": &self.name, "duration_ms": duration_ms })),
                );
            }
            RunOutcome::Failed { stage, error } => {
                self.events.emit(
                    "pipeline.failed",
                    Some(json!({ "pipeline": &self.name, "stage": stage, "error": error.to_string() })),
                );
            }
            RunOutcome::Cancelled { .. } => {}
        }

        PipelineRun {
            run_id,
            pipeline: self.name.clone(),
            started_at,
            records,
            outputs,
            outcome,
            duration_ms,
        }
    }
}

fn unknown_dependency(stage: &str, dep: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Stage '{stage}' depends on unknown stage '{dep}'"))
        .with_stages(vec![stage.to_string(), dep.to_string()])
        .with_error_info(
            ContractErrorInfo::new("PIPELINE-MISSING_DEP", format!("Dependency '{dep}' not found"))
                .with_fix_hint("Ensure the dependency is added before the stage that depends on it."),
        )
}

fn unsatisfied_dependency<'a>(spec: &'a StageSpec, records: &[StageRecord]) -> Option<&'a str> {
    spec.dependencies
        .iter()
        .find(|dep| {
            records
                .iter()
                .find(|r| &r.stage == *dep)
                .map_or(true, |r| r.status != StageStatus::Succeeded)
        })
        .map(String::as_str)
}

fn sorted_dependencies(spec: &StageSpec) -> Vec<&String> {
    let mut deps: Vec<&String> = spec.dependencies.iter().collect();
    deps.sort();
    deps
}

/// Returns the first dependency cycle found, as a closed path.
pub(crate) fn find_cycle(
    stages: &HashMap<String, StageSpec>,
    stage_order: &[String],
) -> Option<Vec<String>> {
    fn dfs(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = stages.get(node) {
            for dep in sorted_dependencies(spec) {
                if !visited.contains(dep) {
                    if let Some(cycle) = dfs(dep, stages, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();
    let mut roots: Vec<&String> = stage_order.iter().collect();
    let mut rest: Vec<&String> = stages.keys().filter(|k| !stage_order.contains(k)).collect();
    rest.sort();
    roots.extend(rest);

    for name in roots {
        if !visited.contains(name.as_str()) {
            if let Some(cycle) = dfs(name, stages, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Orders stages so that every stage follows its dependencies.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(spec) = stages.get(node) {
            for dep in sorted_dependencies(spec) {
                visit(dep, stages, visited, result);
            }
        }
        result.push(node.to_string());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut rest: Vec<&String> = stages.keys().filter(|k| !stage_order.contains(k)).collect();
    rest.sort();

    for name in stage_order.iter().chain(rest) {
        if stages.contains_key(name) {
            visit(name, stages, &mut visited, &mut result);
        }
    }
    result
}
