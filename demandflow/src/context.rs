//! Per-attempt stage context and dependency inputs.

use crate::core::StageOutput;
use crate::errors::DemandflowError;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Read-only view of the outputs of a stage's declared dependencies.
///
/// Reading from a stage that is not a declared dependency is an error, so a
/// stage cannot silently couple itself to an unrelated part of the graph.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    outputs: HashMap<String, StageOutput>,
    declared_dependencies: HashSet<String>,
    stage_name: String,
}

impl StageInputs {
    /// Creates inputs for `stage_name`, keeping only declared dependencies.
    #[must_use]
    pub fn new(
        all_outputs: &HashMap<String, StageOutput>,
        declared_dependencies: &HashSet<String>,
        stage_name: impl Into<String>,
    ) -> Self {
        let outputs = all_outputs
            .iter()
            .filter(|(name, _)| declared_dependencies.contains(*name))
            .map(|(name, output)| (name.clone(), output.clone()))
            .collect();
        Self {
            outputs,
            declared_dependencies: declared_dependencies.clone(),
            stage_name: stage_name.into(),
        }
    }

    /// Gets the output of a dependency.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependency` if `dependency` is not declared.
    pub fn get(&self, dependency: &str) -> Result<Option<&StageOutput>, DemandflowError> {
        if !self.declared_dependencies.contains(dependency) {
            return Err(DemandflowError::UndeclaredDependency {
                stage: self.stage_name.clone(),
                dependency: dependency.to_string(),
            });
        }
        Ok(self.outputs.get(dependency))
    }

    /// Gets a string value a dependency must have produced.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependency` or `MissingInput`.
    pub fn require_str(&self, dependency: &str, key: &str) -> Result<&str, DemandflowError> {
        self.get(dependency)?
            .and_then(|output| output.get_str(key))
            .ok_or_else(|| DemandflowError::MissingInput {
                stage: self.stage_name.clone(),
                dependency: dependency.to_string(),
                key: key.to_string(),
            })
    }

    /// Returns the declared dependencies.
    #[must_use]
    pub fn declared_dependencies(&self) -> &HashSet<String> {
        &self.declared_dependencies
    }
}

/// Everything a stage action sees for one attempt.
#[derive(Debug, Clone)]
pub struct StageContext {
    run_id: Uuid,
    pipeline: String,
    stage_name: String,
    attempt: usize,
    inputs: StageInputs,
}

impl StageContext {
    /// Creates a context for the first attempt of a stage.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, stage_name: impl Into<String>, inputs: StageInputs) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            stage_name: stage_name.into(),
            attempt: 1,
            inputs,
        }
    }

    /// Returns a copy of this context for the given attempt number (1-based).
    #[must_use]
    pub fn for_attempt(&self, attempt: usize) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the dependency inputs.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }
}
