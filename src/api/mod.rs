//! HTTP API: host intake, job polling, port lookup and replicated-store
//! access.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::IpmiConfig;
use crate::error::{AppError, Error, ErrorKind, RaftError};
use crate::model::{Host, MacAddr, Port};
use crate::raft::KvStore;
use crate::scheduler::job::{ActionKind, HostCreate, Job, JobAction, JobState, TopologyParse};
use crate::scheduler::JobQueue;
use crate::store::Storage;

#[derive(Clone)]
pub struct ApiState {
    pub storage: Arc<dyn Storage>,
    pub queue: JobQueue,
    pub kv: KvStore,
    pub ipmi: IpmiConfig,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/hosts", post(create_host_handler))
        .route("/v1/jobs/:id", get(get_job_handler))
        .route("/v1/ports/:mac", get(get_port_handler))
        .route(
            "/v1/kv/:bucket/:key",
            get(kv_get_handler).put(kv_put_handler).delete(kv_delete_handler),
        )
        .route("/v1/cluster", get(cluster_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting HTTP API");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Client-facing shape of an error; internal causes stay out.
#[derive(Debug, Serialize)]
pub struct ErrorView {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub code: u16,
    pub title: &'static str,
    pub detail: &'static str,
}

impl From<&AppError> for ErrorView {
    fn from(err: &AppError) -> Self {
        Self {
            id: err.id,
            job_id: err.job_id,
            code: err.kind.code(),
            title: err.kind.title(),
            detail: err.kind.detail(),
        }
    }
}

/// Errors of one request. The response status is the highest status among
/// them.
#[derive(Debug)]
pub struct ApiErrors {
    errors: Vec<AppError>,
    leader_id: Option<u64>,
}

impl From<AppError> for ApiErrors {
    fn from(err: AppError) -> Self {
        Self {
            errors: vec![err],
            leader_id: None,
        }
    }
}

impl From<RaftError> for ApiErrors {
    fn from(err: RaftError) -> Self {
        let leader_id = match err {
            RaftError::NotLeader(leader) => leader,
            _ => None,
        };
        Self {
            errors: vec![err.into()],
            leader_id,
        }
    }
}

impl IntoResponse for ApiErrors {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            errors: Vec<ErrorView>,
            #[serde(skip_serializing_if = "Option::is_none")]
            leader_id: Option<u64>,
        }

        let status = self
            .errors
            .iter()
            .map(AppError::http_status)
            .max()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Body {
            errors: self.errors.iter().map(ErrorView::from).collect(),
            leader_id: self.leader_id,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateHostRequest {
    pub ipmi_address: String,
    #[serde(default)]
    pub ports: Vec<PortRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PortRequest {
    pub mac: String,
}

#[derive(Debug, Serialize)]
struct JobSummary {
    id: Uuid,
    action: ActionKind,
    state: JobState,
}

#[derive(Debug, Serialize)]
struct CreateHostResponse {
    request_id: Uuid,
    jobs: Vec<JobSummary>,
}

async fn create_host_handler(
    State(state): State<ApiState>,
    body: Result<Json<CreateHostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateHostResponse>), ApiErrors> {
    let request_id = Uuid::new_v4();
    let result = accept_host(&state, request_id, body).await;
    if let Err(errors) = &result {
        record_request_errors(state.storage.as_ref(), &errors.errors).await;
    }
    result
}

async fn accept_host(
    state: &ApiState,
    request_id: Uuid,
    body: Result<Json<CreateHostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateHostResponse>), ApiErrors> {
    let reject = |kind: ErrorKind, source: String| AppError::new(kind).with_source(source).for_request(request_id);

    let Json(req) = body.map_err(|e| reject(ErrorKind::ApiUnknownFormat, e.body_text()))?;

    let mut errors = Vec::new();
    let ip = match req.ipmi_address.trim().parse::<IpAddr>() {
        Ok(ip) if state.ipmi.cidr_block.contains(&ip) => Some(ip),
        Ok(ip) => {
            errors.push(reject(
                ErrorKind::HostsIpmiCidrMismatch,
                format!("{ip} is outside {}", state.ipmi.cidr_block),
            ));
            None
        }
        Err(e) => {
            errors.push(reject(ErrorKind::HostsAbnormalIp, format!("{:?}: {e}", req.ipmi_address)));
            None
        }
    };
    let mut macs = Vec::with_capacity(req.ports.len());
    for port in &req.ports {
        match port.mac.parse::<MacAddr>() {
            Ok(mac) => macs.push(mac),
            Err(e) => errors.push(reject(ErrorKind::PortsAbnormalMac, e.to_string())),
        }
    }
    let Some(ipmi_address) = ip else {
        return Err(ApiErrors { errors, leader_id: None });
    };
    if !errors.is_empty() {
        return Err(ApiErrors { errors, leader_id: None });
    }

    let mut jobs = vec![Job::new(request_id, JobAction::HostCreate(HostCreate { ipmi_address }))];
    jobs.extend(
        macs.into_iter()
            .map(|mac| Job::new(request_id, JobAction::TopologyParse(TopologyParse { mac }))),
    );

    for inserted in 0..jobs.len() {
        if let Err(e) = state.storage.insert_job(&jobs[inserted]).await {
            let err = AppError::from(e).for_request(request_id);
            return Err(abandon_jobs(state.storage.as_ref(), jobs.drain(..inserted), err).await);
        }
    }

    let summary: Vec<JobSummary> = jobs
        .iter()
        .map(|job| JobSummary {
            id: job.id,
            action: job.kind(),
            state: job.state,
        })
        .collect();

    let mut jobs = jobs.into_iter();
    while let Some(job) = jobs.next() {
        if let Err(e) = state.queue.enqueue(job.clone()).await {
            let err = reject(ErrorKind::InternalCommonError, e.to_string());
            let unqueued = std::iter::once(job).chain(jobs);
            return Err(abandon_jobs(state.storage.as_ref(), unqueued, err).await);
        }
    }

    tracing::info!(request_id = %request_id, jobs = summary.len(), "Host request accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateHostResponse {
            request_id,
            jobs: summary,
        }),
    ))
}

/// Fail stored jobs of a request that could not be fully accepted so none
/// of them is left `created`. The response names each of them through a
/// job-scoped copy of `err`.
async fn abandon_jobs(storage: &dyn Storage, jobs: impl IntoIterator<Item = Job>, err: AppError) -> ApiErrors {
    let mut errors = vec![err.clone()];
    for mut job in jobs {
        let job_err = AppError {
            id: Uuid::new_v4(),
            job_id: Some(job.id),
            created_at: Utc::now(),
            ..err.clone()
        };
        job.errors.push(job_err.clone());
        job.transition(JobState::Failed);
        if let Err(e) = storage.update_job(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist abandoned job");
        }
        tracing::warn!(job_id = %job.id, action = %job.kind(), error = %err, "Abandoned job of rejected request");
        errors.push(job_err);
    }
    ApiErrors { errors, leader_id: None }
}

/// Request errors are written as soon as the request ends.
async fn record_request_errors(storage: &dyn Storage, errors: &[AppError]) {
    for err in errors {
        if let Err(e) = storage.insert_error(err).await {
            tracing::error!(error_id = %err.id, error = %e, "Failed to record request error");
        }
    }
}

#[derive(Debug, Serialize)]
struct JobView {
    id: Uuid,
    requester_id: Uuid,
    action: ActionKind,
    state: JobState,
    fail_count: u32,
    errors: Vec<ErrorView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            requester_id: job.requester_id,
            action: job.kind(),
            state: job.state,
            fail_count: job.fail_count,
            errors: job.errors.iter().map(ErrorView::from).collect(),
            host_id: job.host_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

async fn get_job_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<JobView>, ApiErrors> {
    let id = Uuid::parse_str(&id).map_err(|e| AppError::new(ErrorKind::ApiUnknownFormat).with_source(e))?;
    let job = state
        .storage
        .get_job(id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::new(ErrorKind::ApiNotFound))?;
    Ok(Json(JobView::from(&job)))
}

#[derive(Debug, Serialize)]
struct PortView {
    #[serde(flatten)]
    port: Port,
    host: Option<Host>,
}

async fn get_port_handler(State(state): State<ApiState>, Path(mac): Path<String>) -> Result<Json<PortView>, ApiErrors> {
    let mac: MacAddr = mac
        .parse()
        .map_err(|e| AppError::new(ErrorKind::PortsAbnormalMac).with_source(e))?;
    let port = state
        .storage
        .get_port(mac)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::new(ErrorKind::ApiNotFound))?;
    let host = match port.host_id {
        Some(id) => state.storage.get_host(id).await.map_err(AppError::from)?,
        None => None,
    };
    Ok(Json(PortView { port, host }))
}

#[derive(Debug, Serialize)]
struct KvEntry {
    bucket: String,
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct KvWrite {
    index: u64,
}

async fn kv_get_handler(
    State(state): State<ApiState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<KvEntry>, ApiErrors> {
    let value = state
        .kv
        .get(&bucket, &key)
        .ok_or_else(|| AppError::new(ErrorKind::ApiNotFound))?;
    Ok(Json(KvEntry { bucket, key, value }))
}

async fn kv_put_handler(
    State(state): State<ApiState>,
    Path((bucket, key)): Path<(String, String)>,
    value: String,
) -> Result<Json<KvWrite>, ApiErrors> {
    let index = state.kv.set(&bucket, &key, &value).await?;
    Ok(Json(KvWrite { index }))
}

async fn kv_delete_handler(
    State(state): State<ApiState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<KvWrite>, ApiErrors> {
    let index = state.kv.delete(&bucket, &key).await?;
    Ok(Json(KvWrite { index }))
}

async fn cluster_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.kv.consensus().status().await)
}
