//! Operation record: the durable state of in-flight work
//!
//! Every create/update/delete of an instance or binding is bound to exactly
//! one non-terminal Operation. The orchestrator and the poller mutate the
//! record; the maintainer uses `updated_at` as a heartbeat to detect stuck
//! operations and resume them.
//!
//! `updated_at` doubles as the optimistic-concurrency token: it is bumped by
//! the repository on every successful update, never by entity mutators. The
//! heartbeat therefore advances exactly once per persisted schedulable
//! action.

use crate::error::SmError;
use crate::object::ResourceType;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => f.write_str("create"),
            OperationType::Update => f.write_str("update"),
            OperationType::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }

    pub fn can_transition_to(&self, next: &OperationState) -> bool {
        match self {
            OperationState::InProgress => true,
            // Terminal states are final.
            OperationState::Succeeded | OperationState::Failed => self == next,
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::InProgress => f.write_str("in progress"),
            OperationState::Succeeded => f.write_str("succeeded"),
            OperationState::Failed => f.write_str("failed"),
        }
    }
}

/// Durable record of one unit of in-flight work against a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub state: OperationState,
    pub resource_id: String,
    pub resource_type: ResourceType,
    /// The broker accepted the request and further polling is required;
    /// subsequent handlers resume instead of re-issuing the OSB call.
    pub reschedule: bool,
    /// Non-null means orphan mitigation is pending: a deprovision must
    /// eventually be issued for the resource regardless of `op_type`.
    pub deletion_scheduled: Option<DateTime<Utc>>,
    /// Broker-side operation key returned by an async response.
    pub external_id: Option<String>,
    /// Failure description, when the broker provided one.
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Heartbeat and optimistic token; maintained by the repository.
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(op_type: OperationType, resource_type: ResourceType, resource_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            state: OperationState::InProgress,
            resource_id: resource_id.to_string(),
            resource_type,
            reschedule: false,
            deletion_scheduled: None,
            external_id: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(OperationState::Succeeded)?;
        self.reschedule = false;
        Ok(())
    }

    pub fn fail(&mut self, description: impl Into<String>) -> Result<()> {
        self.transition(OperationState::Failed)?;
        self.reschedule = false;
        self.description = Some(description.into());
        Ok(())
    }

    /// Mark that the broker acknowledged the request asynchronously and
    /// polling must continue, keeping the broker operation key if one was
    /// returned.
    pub fn mark_rescheduled(&mut self, operation_key: Option<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(SmError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "reschedule".to_string(),
            });
        }
        self.reschedule = true;
        if operation_key.is_some() {
            self.external_id = operation_key;
        }
        Ok(())
    }

    /// Schedule orphan mitigation: the outcome of the broker call is
    /// indeterminate and a deprovision must follow.
    pub fn schedule_deletion(&mut self) {
        self.deletion_scheduled = Some(Utc::now());
        self.reschedule = false;
    }

    pub fn mitigation_pending(&self) -> bool {
        self.deletion_scheduled.is_some()
    }

    fn transition(&mut self, next: OperationState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(SmError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}
