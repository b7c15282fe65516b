//! Tool action policy enforcement
//!
//! Before a tool call requested by the model is executed it is checked
//! against a policy. The default implementation is a static allow/deny
//! list from configuration; the trait seam leaves room for a remote
//! policy service.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::PolicyConfig;
use crate::error::Result;

/// Verdict for one requested action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Action may run
    Execute,

    /// Action is blocked
    Deny {
        /// Human-readable reason, suitable for speaking back to the user
        reason: String,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Execute)
    }
}

/// Policy check for tool actions
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Decide whether `action` may run given the call-site `context`
    async fn enforce(&self, action: &str, context: &HashMap<String, String>) -> Result<Decision>;
}

/// Allow/deny lists from configuration
///
/// Deny entries win over allow entries; actions on neither list fall
/// back to `default_allow`.
pub struct StaticPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
    default_allow: bool,
}

impl StaticPolicy {
    #[must_use]
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            default_allow: config.default_allow,
        }
    }
}

#[async_trait]
impl PolicyClient for StaticPolicy {
    async fn enforce(&self, action: &str, context: &HashMap<String, String>) -> Result<Decision> {
        let decision = if self.deny.iter().any(|entry| entry == action) {
            Decision::Deny {
                reason: format!("action '{action}' is denied by policy"),
            }
        } else if self.allow.iter().any(|entry| entry == action) || self.default_allow {
            Decision::Execute
        } else {
            Decision::Deny {
                reason: format!("action '{action}' is not on the allow list"),
            }
        };

        match &decision {
            Decision::Execute => {
                tracing::info!(action, ?context, "policy: EXECUTE");
            }
            Decision::Deny { reason } => {
                tracing::warn!(action, ?context, reason, "policy: DENY");
            }
        }

        Ok(decision)
    }
}
