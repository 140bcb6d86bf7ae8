use crate::api::{normalize_subnet, validate_ipv4, AppState};
use crate::entities::router;
use crate::error::ApiError;
use crate::scanner::fingerprint::DiscoveredDevice;
use crate::scanner::shell::Credentials;
use crate::scanner::sweep::{self, SweepConfig};
use crate::services::repository::{NewRouter, RouterPatch};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ScanRequest {
    pub subnet: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceRequest {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub username: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMultipleRequest {
    pub devices: Vec<AddDevicePayload>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDevicePayload {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Create a scan job and kick it off in the background. The response only
/// carries the job id; clients poll for progress.
pub async fn start_scan(
    State(state): State<AppState>,
    Json(payload): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prefix = normalize_subnet(&payload.subnet)?;
    if payload.username.trim().is_empty() {
        return Err(ApiError::Validation("username is required".into()));
    }

    let job_id = state.jobs.create(&prefix);
    let creds = Credentials::new(payload.username, Some(payload.password), None);
    state.jobs.start(
        &job_id,
        sweep::run_scan_job(
            Arc::clone(&state.jobs),
            job_id.clone(),
            prefix.clone(),
            creds,
            SweepConfig::default(),
        ),
    );
    tracing::info!(subnet = %prefix, job = %job_id, "scan accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "jobId": job_id,
            "subnet": prefix,
            "timestamp": Utc::now(),
        })),
    ))
}

pub async fn scan_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or(ApiError::NotFound("scan job"))?;

    // Echo each device with an `exists` flag so the dashboard can tell
    // fresh discoveries from routers that are already enrolled.
    let mut devices: Vec<DiscoveredDevice> = Vec::with_capacity(job.devices.len());
    for mut device in job.devices {
        let exists = match device.mac_address.as_deref() {
            Some(mac) => state
                .repo
                .find_router(Some(mac), None, None)
                .await?
                .is_some(),
            None => false,
        };
        device.exists = Some(exists);
        devices.push(device);
    }

    Ok(Json(json!({
        "status": job.status,
        "progress": job.progress,
        "subnet": job.subnet,
        "message": job.message,
        "devices": devices,
        "devicesFound": devices.len(),
        "partialScan": job.partial_scan,
        "error": job.error,
        "timestamp": job.updated_at,
    })))
}

pub async fn add_device(
    State(state): State<AppState>,
    Json(payload): Json<AddDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (router, created) = upsert_device(
        &state,
        AddDevicePayload {
            ip_address: payload.ip_address,
            hostname: payload.hostname,
            mac_address: payload.mac_address,
            username: Some(payload.username),
            password: Some(payload.password),
            name: payload.name,
        },
        None,
        None,
    )
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(router)))
}

pub async fn add_multiple(
    State(state): State<AppState>,
    Json(payload): Json<AddMultipleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let total = payload.devices.len();
    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for device in payload.devices {
        let ip = device.ip_address.clone();
        match upsert_device(
            &state,
            device,
            payload.username.as_deref(),
            payload.password.as_deref(),
        )
        .await
        {
            Ok((router, true)) => added.push(router),
            Ok((router, false)) => updated.push(router),
            Err(e) => failed.push(json!({ "ipAddress": ip, "error": e.to_string() })),
        }
    }

    Ok(Json(json!({
        "summary": {
            "added": added.len(),
            "updated": updated.len(),
            "failed": failed.len(),
            "total": total,
        },
        "added": added,
        "updated": updated,
        "failed": failed,
    })))
}

/// Match by MAC first, then by IP; update on a hit, create otherwise.
/// Returns the router and whether it was created.
async fn upsert_device(
    state: &AppState,
    device: AddDevicePayload,
    batch_username: Option<&str>,
    batch_password: Option<&str>,
) -> Result<(router::Model, bool), ApiError> {
    validate_ipv4(&device.ip_address)?;

    let username = device
        .username
        .or_else(|| batch_username.map(String::from))
        .ok_or_else(|| ApiError::Validation("username is required".into()))?;
    let password = device
        .password
        .or_else(|| batch_password.map(String::from))
        .ok_or_else(|| ApiError::Validation("password is required".into()))?;

    let mac = device.mac_address.map(|m| m.to_lowercase());
    let hostname = device.hostname.filter(|h| !h.trim().is_empty());

    let existing = state
        .repo
        .find_router(mac.as_deref(), Some(&device.ip_address), None)
        .await?;

    if let Some(existing) = existing {
        let patch = RouterPatch {
            ip_address: Some(device.ip_address),
            hostname: hostname.clone(),
            mac_address: mac,
            username: Some(username),
            password: Some(password),
            ..RouterPatch::default()
        };
        let router = state
            .repo
            .update_router(existing.id, patch)
            .await?
            .ok_or(ApiError::NotFound("router"))?;
        return Ok((router, false));
    }

    let name = device
        .name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| hostname.clone())
        .unwrap_or_else(|| format!("Router {}", device.ip_address));
    // A colliding name gets the address appended rather than failing the
    // whole enrolment.
    let name = if state.repo.get_router_by_name(&name).await?.is_some() {
        format!("{} ({})", name, device.ip_address)
    } else {
        name
    };

    let router = state
        .repo
        .create_router(NewRouter {
            name,
            ip_address: device.ip_address,
            hostname,
            mac_address: mac,
            ssh_port: 22,
            username,
            password: Some(password),
            ssh_key: None,
            monitoring_enabled: true,
            metrics_retention_days: 30,
        })
        .await?;
    Ok((router, true))
}
