//! Ordered asynchronous handler chains.
//!
//! A [`Chain`] is an explicit, ordered list of [`Stage`]s over a fixed item
//! type. Stages run strictly sequentially; each one may continue, stop
//! propagation silently, or fail with a typed error that aborts the rest of
//! the chain. Order is the contract surface: callers build security and
//! validation stages before business stages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EngineError;

/// What a stage decided about the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Delegate to the next stage.
    Continue,
    /// Stop propagation without error (e.g. drop an outbound message for
    /// an unsupported action).
    Stop,
}

/// How a chain run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every stage ran to completion.
    Completed,
    /// A stage stopped propagation; the remaining stages never ran.
    Stopped,
}

/// One stage of a handler chain.
#[async_trait]
pub trait Stage<T>: Send + Sync {
    /// Inspect the item and decide whether the chain continues.
    async fn handle(&self, item: &T) -> Result<Flow, EngineError>;
}

/// An ordered list of stages invoked by a driver loop.
///
/// The terminal no-op stage is implicit: running past the last stage
/// completes the chain.
pub struct Chain<T> {
    stages: Vec<Arc<dyn Stage<T>>>,
}

impl<T: Send + Sync> Chain<T> {
    /// Build a chain from stages in caller-specified order.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage<T>>>) -> Self {
        Self { stages }
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the item through every stage in order.
    ///
    /// A stage never begins before the previous stage's asynchronous work
    /// completes. The first `Stop` or error short-circuits the rest.
    pub async fn run(&self, item: &T) -> Result<ChainOutcome, EngineError> {
        for stage in &self.stages {
            match stage.handle(item).await? {
                Flow::Continue => {}
                Flow::Stop => return Ok(ChainOutcome::Stopped),
            }
        }
        Ok(ChainOutcome::Completed)
    }
}
