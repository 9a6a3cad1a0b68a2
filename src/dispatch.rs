//! Message dispatch gate.
//!
//! Routing misses and readiness violations are expected during unmount races,
//! so they come back as `Ok(DispatchOutcome::Skipped(..))` and are logged.
//! A pane's own send/stop failing is a real backend failure and is returned
//! as `Err` to whoever initiated the call.

use std::fmt;
use std::sync::Arc;

use crate::app_logger::DiagnosticsLog;
use crate::registry::TargetRegistry;
use crate::target::{InstanceId, OutgoingMessage, Readiness};

const LOG_SOURCE: &str = "dispatch";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoActiveInstance,
    UnknownInstance(InstanceId),
    NotReady(InstanceId, Readiness),
    NoStopCapability(InstanceId),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoActiveInstance => write!(f, "no active chat instance"),
            SkipReason::UnknownInstance(id) => write!(f, "chat instance {id} is not registered"),
            SkipReason::NotReady(id, readiness) => write!(f, "chat instance {id} is {readiness}"),
            SkipReason::NoStopCapability(id) => write!(f, "chat instance {id} cannot stop streams"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(InstanceId),
    Skipped(SkipReason),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}

pub struct DispatchGate {
    registry: Arc<TargetRegistry>,
    diagnostics: Arc<DiagnosticsLog>,
}

impl DispatchGate {
    pub fn new(registry: Arc<TargetRegistry>, diagnostics: Arc<DiagnosticsLog>) -> Self {
        Self { registry, diagnostics }
    }

    fn skip(&self, action: &str, reason: SkipReason) -> DispatchOutcome {
        self.diagnostics.warn(LOG_SOURCE, format!("{action} dropped: {reason}"));
        DispatchOutcome::Skipped(reason)
    }

    /// Send to the active pane if it reports ready. A non-ready pane drops the
    /// message instead of queueing it; the caller is expected to disable its
    /// send affordance while not ready.
    pub async fn send_to_active(&self, message: OutgoingMessage) -> anyhow::Result<DispatchOutcome> {
        let Some(active) = self.registry.active_selector().get_active() else {
            return Ok(self.skip("send", SkipReason::NoActiveInstance));
        };
        let Some(entry) = self.registry.get(&active) else {
            return Ok(self.skip("send", SkipReason::UnknownInstance(active)));
        };
        if entry.status.readiness != Readiness::Ready {
            return Ok(self.skip("send", SkipReason::NotReady(active, entry.status.readiness)));
        }

        tracing::debug!(instance = %active, "sending to active chat instance");
        // The snapshot holds its own Arc; no registry lock is held across the await.
        entry.pane.send_message(message).await.map_err(|e| {
            tracing::error!(instance = %active, "send failed: {e:#}");
            e.context(format!("send to {active} failed"))
        })?;
        Ok(DispatchOutcome::Delivered(active))
    }

    /// Send to an explicitly targeted pane.
    ///
    /// Skips the readiness gate: explicit targeting means the caller already
    /// validated the pane (e.g. a queued message flushed once it became idle).
    /// Routing misses are still dropped and logged.
    pub async fn send_to_instance(
        &self,
        instance_id: &InstanceId,
        message: OutgoingMessage,
    ) -> anyhow::Result<DispatchOutcome> {
        let Some(entry) = self.registry.get(instance_id) else {
            return Ok(self.skip("send", SkipReason::UnknownInstance(instance_id.clone())));
        };

        tracing::debug!(instance = %instance_id, "sending to explicit chat instance");
        entry.pane.send_message(message).await.map_err(|e| {
            tracing::error!(instance = %instance_id, "send failed: {e:#}");
            e.context(format!("send to {instance_id} failed"))
        })?;
        Ok(DispatchOutcome::Delivered(instance_id.clone()))
    }

    pub async fn stop_active(&self) -> anyhow::Result<DispatchOutcome> {
        let Some(active) = self.registry.active_selector().get_active() else {
            return Ok(self.skip("stop", SkipReason::NoActiveInstance));
        };
        let Some(entry) = self.registry.get(&active) else {
            return Ok(self.skip("stop", SkipReason::UnknownInstance(active)));
        };
        if !entry.pane.can_stop() {
            return Ok(self.skip("stop", SkipReason::NoStopCapability(active)));
        }

        entry.pane.stop_stream().await.map_err(|e| {
            tracing::error!(instance = %active, "stop failed: {e:#}");
            e.context(format!("stop on {active} failed"))
        })?;
        Ok(DispatchOutcome::Delivered(active))
    }
}
