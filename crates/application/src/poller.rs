//! Last-operation poller
//!
//! A bounded cooperative loop issuing `last_operation` against a broker
//! until a terminal state, cancellation or a poll error. Cancellation leaves
//! the operation untouched (IN_PROGRESS, reschedule intact) so a maintainer
//! can resume it later; terminal broker answers are recorded before the
//! poller returns.

use crate::interceptor::{persist_operation, CancelSignal};
use sm_core::{Operation, Result, SmError};
use sm_ports::{LastOperationRequest, LastOperationState, OsbClient, Repository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_FAILURE_DESCRIPTION: &str = "no description provided by broker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The broker reported `succeeded`.
    Done,
    /// The caller's context was dropped; nothing was mutated.
    Cancelled,
}

/// Identifies what is being polled at the broker.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub instance_id: String,
    /// Set when polling a binding operation.
    pub binding_id: Option<String>,
    pub service_id: String,
    pub plan_id: String,
}

pub struct OperationPoller {
    repository: Arc<dyn Repository>,
    polling_interval: Duration,
}

impl OperationPoller {
    pub fn new(repository: Arc<dyn Repository>, polling_interval: Duration) -> Self {
        Self {
            repository,
            polling_interval,
        }
    }

    /// Poll until terminal state, cancellation or error. At most one poller
    /// runs per operation; callers serialize through operation uniqueness.
    pub async fn poll(
        &self,
        client: &dyn OsbClient,
        target: &PollTarget,
        operation: &mut Operation,
        orphan_mitigation_enabled: bool,
        mut cancel: CancelSignal,
    ) -> Result<PollOutcome> {
        let request = LastOperationRequest {
            instance_id: target.instance_id.clone(),
            binding_id: target.binding_id.clone(),
            service_id: Some(target.service_id.clone()),
            plan_id: Some(target.plan_id.clone()),
            operation_key: operation.external_id.clone(),
        };

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    error!(
                        resource_id = %operation.resource_id,
                        "terminating last operation poll due to dropped context"
                    );
                    // Operation stays in progress for a later resume.
                    return Ok(PollOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.polling_interval) => {}
            }

            info!(
                resource_id = %operation.resource_id,
                operation_key = ?request.operation_key,
                "polling last operation"
            );
            let response = client.poll_last_operation(&request).await.map_err(|err| {
                // Left in progress; a retried request or the maintainer polls again.
                SmError::broker(format!(
                    "failed poll last operation for resource {}: {err}",
                    operation.resource_id
                ))
            })?;

            match response.state {
                LastOperationState::InProgress => {
                    info!(
                        resource_id = %operation.resource_id,
                        "operation still in progress at the broker"
                    );
                }
                LastOperationState::Succeeded => {
                    info!(
                        resource_id = %operation.resource_id,
                        "last operation finished successfully"
                    );
                    operation.reschedule = false;
                    persist_operation(self.repository.as_ref(), operation).await?;
                    return Ok(PollOutcome::Done);
                }
                LastOperationState::Failed => {
                    let description = response
                        .description
                        .unwrap_or_else(|| DEFAULT_FAILURE_DESCRIPTION.to_string());
                    operation.reschedule = false;
                    if orphan_mitigation_enabled {
                        operation.schedule_deletion();
                    }
                    // The failure is terminal for the operation; mitigation,
                    // if scheduled, only cleans up the upstream resource. A
                    // mitigation poll may run against an already-terminal
                    // operation, which keeps its original state.
                    if !operation.is_terminal() {
                        operation.fail(description.clone())?;
                    }
                    persist_operation(self.repository.as_ref(), operation).await?;

                    return Err(SmError::broker(format!(
                        "failed polling operation for resource {}: {description}",
                        operation.resource_id
                    )));
                }
            }
        }
    }
}
