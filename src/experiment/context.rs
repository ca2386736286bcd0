//! Correlation context carried through every per-experiment step.
//!
//! The context is an ordinary value: the manager builds one per experiment
//! per tick and passes it by reference into each transition, so log lines and
//! notifications emitted from worker threads carry the platform, experiment
//! id, and action name without any thread-local state.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tags attached to every log entry and notification for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    pub platform_type: String,
    pub experiment_id: String,
    pub container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
}

impl DiagnosticContext {
    #[must_use]
    pub fn new(platform_type: &str, experiment_id: &str, container_id: &str) -> Self {
        Self {
            platform_type: platform_type.to_string(),
            experiment_id: experiment_id.to_string(),
            container_id: container_id.to_string(),
            action_name: None,
        }
    }

    /// Copy of this context tagged with the bound action.
    #[must_use]
    pub fn with_action(&self, action_name: &str) -> Self {
        Self {
            action_name: Some(action_name.to_string()),
            ..self.clone()
        }
    }

    /// Action label, or the placeholder used before an action is bound.
    #[must_use]
    pub fn action_label(&self) -> &str {
        self.action_name
            .as_deref()
            .unwrap_or(crate::experiment::METHOD_NOT_SET)
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "platform={} experiment={} container={} action={}",
            self.platform_type,
            self.experiment_id,
            self.container_id,
            self.action_label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_every_tag() {
        let ctx = DiagnosticContext::new("local", "abc", "web-1").with_action("stop-service");
        let line = ctx.to_string();
        assert!(line.contains("platform=local"));
        assert!(line.contains("experiment=abc"));
        assert!(line.contains("container=web-1"));
        assert!(line.contains("action=stop-service"));
    }

    #[test]
    fn unbound_action_uses_placeholder() {
        let ctx = DiagnosticContext::new("local", "abc", "web-1");
        assert_eq!(ctx.action_label(), crate::experiment::METHOD_NOT_SET);
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("action_name").is_none());
    }
}
