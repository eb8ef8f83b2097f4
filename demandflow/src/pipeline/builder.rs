//! Pipeline builder with validation.

use super::{RetryPolicy, StageGraph, StageSpec};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for creating validated stage graphs.
///
/// Dependencies must be added before the stages that depend on them, so a
/// graph built here can never contain a cycle.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: HashMap<String, StageSpec>,
    stage_order: Vec<String>,
    default_retry: RetryPolicy,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            default_retry: RetryPolicy::none(),
        }
    }

    /// Sets the retry policy for every stage that does not set its own.
    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (duplicate name, missing dependency, etc.)
    pub fn stage(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(name, runner).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is already defined",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-DUPLICATE", "Stage names must be unique")
                    .with_fix_hint("Rename one of the stages."),
            ));
        }

        let mut deps: Vec<&String> = spec.dependencies.iter().collect();
        deps.sort();
        if let Some(dep) = deps.into_iter().find(|d| !self.stages.contains_key(*d)) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' depends on unknown stage '{}'",
                spec.name, dep
            ))
            .with_stages(vec![spec.name.clone(), dep.clone()])
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-MISSING_DEP", format!("Dependency '{dep}' not found"))
                    .with_fix_hint("Ensure the dependency is added before the stage that depends on it."),
            ));
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builds the stage graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                ContractErrorInfo::new("PIPELINE-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage to the pipeline before building."),
            ));
        }

        let default_retry = self.default_retry;
        let stages = self
            .stages
            .into_iter()
            .map(|(name, mut spec)| {
                if !spec.retry_overridden {
                    spec.retry = default_retry;
                }
                (name, spec)
            })
            .collect();

        StageGraph::new(self.name, stages, self.stage_order)
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
}
