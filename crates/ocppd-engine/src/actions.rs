//! Action allow-list stages.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ocppd_core::{ErrorCode, Inbound, Outbound, OutboundCallError};
use serde_json::json;
use tracing::warn;

use crate::chain::{Flow, Stage};
use crate::errors::EngineError;

/// Rejects inbound Calls whose action is not in the endpoint's allow-list
/// with a correlated `NotImplemented` CallError. Responses pass through.
pub struct InboundActionsAllowed {
    allowed: Arc<HashSet<String>>,
}

impl InboundActionsAllowed {
    /// Create the stage from the configured allow-list.
    #[must_use]
    pub fn new(allowed: Arc<HashSet<String>>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Stage<Inbound> for InboundActionsAllowed {
    async fn handle(&self, message: &Inbound) -> Result<Flow, EngineError> {
        let Inbound::Call(call) = message else {
            return Ok(Flow::Continue);
        };

        if self.allowed.contains(&call.action) {
            return Ok(Flow::Continue);
        }

        warn!(client = %call.sender, action = %call.action,
            "received call with unsupported action");
        Err(EngineError::CallError(Arc::new(OutboundCallError::new(
            call.sender.clone(),
            call.id.clone(),
            ErrorCode::NotImplemented,
            "Action is not supported",
            json!({ "action": call.action }),
        ))))
    }
}

/// Silently drops outbound Calls whose action is not in the allow-list;
/// the remote side is not expected to understand them. Responses pass
/// through.
pub struct OutboundActionsAllowed {
    allowed: Arc<HashSet<String>>,
}

impl OutboundActionsAllowed {
    /// Create the stage from the configured allow-list.
    #[must_use]
    pub fn new(allowed: Arc<HashSet<String>>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Stage<Outbound> for OutboundActionsAllowed {
    async fn handle(&self, message: &Outbound) -> Result<Flow, EngineError> {
        let Outbound::Call(call) = message else {
            return Ok(Flow::Continue);
        };

        if self.allowed.contains(&call.action) {
            return Ok(Flow::Continue);
        }

        warn!(client = %call.recipient, action = %call.action,
            "dropping outbound call with unsupported action");
        Ok(Flow::Stop)
    }
}
