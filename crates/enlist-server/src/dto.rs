use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enlist_core::events::Event;
use enlist_core::job::MemberRecord;
use enlist_core::pool::{PoolStatus, RunTicket, WorkerStatus};
use enlist_core::stats::RunStatsSnapshot;

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterWorkerRequest {
    /// Account identifier, unique within the pool (e.g., a phone number)
    pub account_key: String,
    /// Session token presented to the gateway as a bearer token
    pub session_token: String,
    /// Gateway base URL override (falls back to ENLIST_GATEWAY_URL)
    pub gateway_url: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WorkerResponse {
    pub account_key: String,
    pub state: String,
}

impl From<WorkerStatus> for WorkerResponse {
    fn from(worker: WorkerStatus) -> Self {
        Self {
            account_key: worker.account_key,
            state: worker.state.to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct MemberInput {
    pub id: Option<i64>,
    /// Username, with or without a leading `@`
    pub username: Option<String>,
    pub name: Option<String>,
}

impl From<MemberInput> for MemberRecord {
    fn from(member: MemberInput) -> Self {
        Self {
            id: member.id,
            username: member.username,
            name: member.name,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartRunRequest {
    /// Destination group the members are added to
    pub target: String,
    pub members: Vec<MemberInput>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub target: String,
    /// Jobs enqueued after de-duplication
    pub jobs: usize,
    pub workers: usize,
    pub status: String,
}

impl From<RunTicket> for StartRunResponse {
    fn from(ticket: RunTicket) -> Self {
        Self {
            run_id: ticket.run_id,
            target: ticket.target,
            jobs: ticket.jobs,
            workers: ticket.workers,
            status: "processing".to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StopRunResponse {
    pub status: String,
    pub running: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunStatsResponse {
    pub taken: u64,
    pub added: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dropped: u64,
    pub success_rate: f64,
}

impl From<RunStatsSnapshot> for RunStatsResponse {
    fn from(stats: RunStatsSnapshot) -> Self {
        Self {
            taken: stats.taken,
            added: stats.added,
            skipped: stats.skipped,
            failed: stats.failed,
            dropped: stats.dropped,
            success_rate: stats.success_rate(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub running: bool,
    pub active_workers: usize,
    pub queue_size: usize,
    pub target: Option<String>,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStatsResponse,
    pub workers: Vec<WorkerResponse>,
}

impl From<PoolStatus> for StatusResponse {
    fn from(status: PoolStatus) -> Self {
        Self {
            status: status.status.to_string(),
            running: status.running,
            active_workers: status.active_workers,
            queue_size: status.queue_size,
            target: status.target,
            run_id: status.run_id,
            started_at: status.started_at,
            finished_at: status.finished_at,
            stats: status.stats.into(),
            workers: status.workers.into_iter().map(WorkerResponse::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct EventResponse {
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub kind: String,
    pub message: String,
    pub worker_key: Option<String>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            timestamp: event.timestamp,
            severity: event.severity.to_string(),
            kind: event.kind.to_string(),
            message: event.message,
            worker_key: event.worker_key,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct EventHistoryQuery {
    /// Return only the most recent N events
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub run_status: String,
    pub workers: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
