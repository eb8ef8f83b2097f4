//! Stage trait and implementations.
//!
//! A stage is one unit of work in a pipeline. It is invoked fresh on every
//! attempt; any state it needs across attempts must live outside it.

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::DemandflowError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes one attempt of the stage.
    ///
    /// # Errors
    ///
    /// Any error fails this attempt; the runner decides whether to retry.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, DemandflowError>;
}

/// Boxed future returned by [`FnStage`] actions.
pub type StageFuture = BoxFuture<'static, Result<StageOutput, DemandflowError>>;

/// A stage backed by an async closure.
pub struct FnStage<F>
where
    F: Fn(StageContext) -> StageFuture + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(StageContext) -> StageFuture + Send + Sync,
{
    /// Creates a new closure-backed stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(StageContext) -> StageFuture + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(StageContext) -> StageFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that does nothing and always succeeds.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        Ok(StageOutput::ok_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageInputs;
    use futures::FutureExt;
    use uuid::Uuid;

    fn test_stage_context() -> StageContext {
        StageContext::new(Uuid::new_v4(), "test", "stage", StageInputs::default())
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("stage", |ctx: StageContext| {
            async move { Ok(StageOutput::ok_value("attempt", serde_json::json!(ctx.attempt()))) }.boxed()
        });

        assert_eq!(stage.name(), "stage");
        let output = stage.execute(&test_stage_context()).await.unwrap();
        assert_eq!(output.get("attempt"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_fn_stage_error() {
        let stage = FnStage::new("stage", |_ctx: StageContext| {
            async { Err(DemandflowError::StoreUnavailable("down".to_string())) }.boxed()
        });

        let err = stage.execute(&test_stage_context()).await.unwrap_err();
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        assert_eq!(stage.name(), "noop");
        assert!(stage.execute(&test_stage_context()).await.is_ok());
    }
}
