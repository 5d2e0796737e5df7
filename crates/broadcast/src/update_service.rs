//! Dashboard update service: builds typed envelopes and routes them.
//!
//! Session-status-change envelopes are dual-channel: both the per-session
//! topic and the fleet-wide `dashboard_updates` topic receive them, and the
//! reported count is the sum of both.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use tarsy_domain::now_us;
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::SessionStatus;

use crate::broadcaster::Broadcaster;
use crate::envelope::{session_channel, Envelope, DASHBOARD_UPDATES, SYSTEM_HEALTH};

pub struct DashboardUpdateService {
    broadcaster: Arc<Broadcaster>,
}

impl DashboardUpdateService {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Dual-channel session status change; returns the summed send count.
    pub async fn publish_session_status_change(
        &self,
        session_id: &str,
        status: SessionStatus,
        details: Value,
    ) -> usize {
        let envelope = Envelope::SessionStatusChange {
            session_id: session_id.to_owned(),
            status: status.as_str().to_owned(),
            details,
            timestamp_us: now_us(),
        };
        let session_count = self
            .broadcaster
            .broadcast(&session_channel(session_id), &envelope)
            .await;
        let dashboard_count = self.broadcaster.broadcast(DASHBOARD_UPDATES, &envelope).await;
        session_count + dashboard_count
    }

    pub async fn publish_stage_started(&self, stage: &StageExecution) -> usize {
        let envelope = Envelope::StageStarted {
            session_id: stage.session_id.clone(),
            stage_execution_id: stage.execution_id.clone(),
            stage_name: stage.stage_name.clone(),
            agent: stage.agent.clone(),
            timestamp_us: now_us(),
        };
        self.broadcaster
            .broadcast(&session_channel(&stage.session_id), &envelope)
            .await
    }

    pub async fn publish_stage_completed(&self, stage: &StageExecution) -> usize {
        let envelope = Envelope::StageCompleted {
            session_id: stage.session_id.clone(),
            stage_execution_id: stage.execution_id.clone(),
            stage_name: stage.stage_name.clone(),
            agent: stage.agent.clone(),
            status: stage.status.as_str().to_owned(),
            timestamp_us: now_us(),
        };
        self.broadcaster
            .broadcast(&session_channel(&stage.session_id), &envelope)
            .await
    }

    /// Per-agent cancellation is always user-initiated and must be emitted
    /// even when the parent stage stays paused.
    pub async fn publish_agent_cancelled(
        &self,
        session_id: &str,
        stage_execution_id: &str,
        agent: &str,
    ) -> usize {
        let envelope = Envelope::AgentCancelled {
            session_id: session_id.to_owned(),
            stage_execution_id: stage_execution_id.to_owned(),
            agent: agent.to_owned(),
            timestamp_us: now_us(),
        };
        self.dual_channel(session_id, &envelope).await
    }

    pub async fn publish_session_resumed(&self, session_id: &str) -> usize {
        let envelope = Envelope::SessionResumed {
            session_id: session_id.to_owned(),
            timestamp_us: now_us(),
        };
        self.dual_channel(session_id, &envelope).await
    }

    pub async fn publish_session_cancelled(&self, session_id: &str) -> usize {
        let envelope = Envelope::SessionCancelled {
            session_id: session_id.to_owned(),
            timestamp_us: now_us(),
        };
        self.dual_channel(session_id, &envelope).await
    }

    pub async fn publish_session_failed(
        &self,
        session_id: &str,
        error_message: Option<String>,
    ) -> usize {
        let envelope = Envelope::SessionFailed {
            session_id: session_id.to_owned(),
            error_message,
            timestamp_us: now_us(),
        };
        self.dual_channel(session_id, &envelope).await
    }

    pub async fn publish_system_health(
        &self,
        status: &str,
        services: HashMap<String, String>,
    ) -> usize {
        let envelope = Envelope::SystemHealth {
            status: status.to_owned(),
            services,
            timestamp_us: now_us(),
        };
        self.broadcaster.broadcast(SYSTEM_HEALTH, &envelope).await
    }

    pub async fn publish_dashboard_update(&self, data: Value) -> usize {
        let envelope = Envelope::DashboardUpdate {
            data,
            timestamp_us: now_us(),
        };
        self.broadcaster.broadcast(DASHBOARD_UPDATES, &envelope).await
    }

    async fn dual_channel(&self, session_id: &str, envelope: &Envelope) -> usize {
        let session_count = self
            .broadcaster
            .broadcast(&session_channel(session_id), envelope)
            .await;
        let dashboard_count = self.broadcaster.broadcast(DASHBOARD_UPDATES, envelope).await;
        session_count + dashboard_count
    }
}
