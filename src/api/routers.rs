use crate::api::{
    validate_ipv4, validate_port, validate_retention_days, AppState,
};
use crate::entities::router;
use crate::error::ApiError;
use crate::scanner::fingerprint;
use crate::scanner::probe::{self, probe_tcp};
use crate::scanner::shell::Credentials;
use crate::services::collector;
use crate::services::repository::{NewRouter, Repository, RouterPatch};
use crate::services::scheduler;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_METRICS_LIMIT: u64 = 100;
const MAX_METRICS_LIMIT: u64 = 1000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRouterRequest {
    pub name: String,
    pub ip_address: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub monitoring_enabled: Option<bool>,
    pub metrics_retention_days: Option<i32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRouterRequest {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub monitoring_enabled: Option<bool>,
    pub metrics_retention_days: Option<i32>,
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    pub limit: Option<u64>,
    pub timespan: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDetails {
    port_open: bool,
    ssh_connection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac_address: Option<String>,
}

#[derive(Serialize)]
struct TestConnectionResponse {
    success: bool,
    message: String,
    details: ConnectionDetails,
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let routers = state.repo.list_routers().await?;
    Ok(Json(routers))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let router = state
        .repo
        .get_router(id)
        .await?
        .ok_or(ApiError::NotFound("router"))?;
    Ok(Json(router))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateRouterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    validate_ipv4(&payload.ip_address)?;
    let port = payload.port.unwrap_or(22);
    validate_port(port)?;
    let retention_days = payload.metrics_retention_days.unwrap_or(30);
    validate_retention_days(retention_days)?;
    if payload.password.is_none() && payload.ssh_key.is_none() {
        return Err(ApiError::Validation(
            "either password or sshKey is required".into(),
        ));
    }

    if state.repo.get_router_by_name(&payload.name).await?.is_some() {
        return Err(ApiError::Conflict("name"));
    }

    let created = state
        .repo
        .create_router(NewRouter {
            name: payload.name,
            ip_address: payload.ip_address,
            hostname: None,
            mac_address: None,
            ssh_port: port as i32,
            username: payload.username,
            password: payload.password,
            ssh_key: payload.ssh_key,
            monitoring_enabled: payload.monitoring_enabled.unwrap_or(true),
            metrics_retention_days: retention_days,
        })
        .await?;

    let refreshed = refresh_fingerprint(&state.repo, created).await;
    Ok((StatusCode::CREATED, Json(refreshed)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateRouterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .repo
        .get_router(id)
        .await?
        .ok_or(ApiError::NotFound("router"))?;

    if let Some(ip) = payload.ip_address.as_deref() {
        validate_ipv4(ip)?;
    }
    if let Some(port) = payload.port {
        validate_port(port)?;
    }
    if let Some(days) = payload.metrics_retention_days {
        validate_retention_days(days)?;
    }
    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name cannot be empty".into()));
        }
        if name != existing.name && state.repo.get_router_by_name(name).await?.is_some() {
            return Err(ApiError::Conflict("name"));
        }
    }

    let ip_changed = payload
        .ip_address
        .as_deref()
        .is_some_and(|ip| ip != existing.ip_address);

    let patch = RouterPatch {
        name: payload.name,
        ip_address: payload.ip_address,
        ssh_port: payload.port.map(|p| p as i32),
        username: payload.username,
        password: payload.password,
        ssh_key: payload.ssh_key,
        monitoring_enabled: payload.monitoring_enabled,
        metrics_retention_days: payload.metrics_retention_days,
        ..RouterPatch::default()
    };

    let updated = state
        .repo
        .update_router(id, patch)
        .await?
        .ok_or(ApiError::NotFound("router"))?;

    let updated = if ip_changed {
        refresh_fingerprint(&state.repo, updated).await
    } else {
        updated
    };
    Ok(Json(updated))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.repo.delete_router(id).await? {
        return Err(ApiError::NotFound("router"));
    }
    Ok(Json(json!({ "message": "Router and its metrics deleted" })))
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let router = state
        .repo
        .get_router(id)
        .await?
        .ok_or(ApiError::NotFound("router"))?;
    let port = router.ssh_port as u16;

    if !probe_tcp(&router.ip_address, port, probe::EXTENDED_TIMEOUT)
        .await
        .is_open()
    {
        state
            .repo
            .update_router(id, RouterPatch::status(router::STATUS_OFFLINE))
            .await?;
        return Ok(Json(TestConnectionResponse {
            success: false,
            message: format!("Port {} is not reachable", port),
            details: ConnectionDetails {
                port_open: false,
                ssh_connection: false,
                hostname: None,
                mac_address: None,
            },
        }));
    }

    let creds = Credentials::new(
        router.username.clone(),
        router.password.clone(),
        router.ssh_key.clone(),
    );
    match fingerprint::quick(router.ip_address.clone(), port, creds).await {
        Ok(device) => {
            let mut patch = RouterPatch::seen_now(router::STATUS_ONLINE);
            if !device.hostname.is_empty() {
                patch.hostname = Some(device.hostname.clone());
            }
            if let Some(mac) = device.mac_address.clone() {
                if mac_is_free(&state.repo, &mac, id).await {
                    patch.mac_address = Some(mac);
                }
            }
            state.repo.update_router(id, patch).await?;

            Ok(Json(TestConnectionResponse {
                success: true,
                message: "SSH connection established".into(),
                details: ConnectionDetails {
                    port_open: true,
                    ssh_connection: true,
                    hostname: (!device.hostname.is_empty()).then_some(device.hostname),
                    mac_address: device.mac_address,
                },
            }))
        }
        Err(e) => {
            state
                .repo
                .update_router(id, RouterPatch::status(router::STATUS_ONLINE))
                .await?;
            Ok(Json(TestConnectionResponse {
                success: false,
                message: format!("SSH connection failed: {}", e),
                details: ConnectionDetails {
                    port_open: true,
                    ssh_connection: false,
                    hostname: None,
                    mac_address: None,
                },
            }))
        }
    }
}

pub async fn collect_metrics(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let router = state
        .repo
        .get_router(id)
        .await?
        .ok_or(ApiError::NotFound("router"))?;

    let outcome = collector::collect_and_store(state.repo.as_ref(), &router).await?;
    let message = match &outcome.record.error {
        None => "Metrics collected successfully".to_string(),
        Some(error) => error.clone(),
    };

    Ok(Json(json!({
        "message": message,
        "online": outcome.online,
        "metrics": outcome.record,
    })))
}

pub async fn metrics(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state.repo.get_router(id).await?.is_none() {
        return Err(ApiError::NotFound("router"));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_METRICS_LIMIT)
        .clamp(1, MAX_METRICS_LIMIT);

    let since = match query.timespan.as_deref() {
        None => None,
        Some("hour") => Some(ChronoDuration::hours(1)),
        Some("day") => Some(ChronoDuration::days(1)),
        Some("week") => Some(ChronoDuration::weeks(1)),
        Some("month") => Some(ChronoDuration::days(30)),
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "unknown timespan: {} (expected hour|day|week|month)",
                other
            )))
        }
    }
    .map(|span| Utc::now().naive_utc() - span);

    let rows = state.repo.metrics_for_router(id, since, limit).await?;
    Ok(Json(rows))
}

pub async fn summary(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let routers = state.repo.list_routers().await?;

    let mut online = 0u32;
    let mut offline = 0u32;
    let mut unknown = 0u32;
    let mut total_clients = 0i64;

    for router in &routers {
        match router.status.as_str() {
            router::STATUS_ONLINE => online += 1,
            router::STATUS_OFFLINE => offline += 1,
            _ => unknown += 1,
        }

        if router.status == router::STATUS_ONLINE {
            let latest = state.repo.metrics_for_router(router.id, None, 1).await?;
            if let Some(metric) = latest.first() {
                total_clients += metric.wireless_clients as i64;
            }
        }
    }

    Ok(Json(json!({
        "totalRouters": routers.len(),
        "onlineRouters": online,
        "offlineRouters": offline,
        "unknownRouters": unknown,
        "totalClients": total_clients,
    })))
}

pub async fn get_config(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let available: serde_json::Map<String, serde_json::Value> = scheduler::INTERVALS
        .iter()
        .map(|(label, cron)| (label.to_string(), json!(cron)))
        .collect();

    Ok(Json(json!({
        "currentInterval": state.scheduler.current_interval().await,
        "availableIntervals": available,
        "status": if state.scheduler.is_collecting() { "running" } else { "stopped" },
    })))
}

#[derive(Deserialize)]
pub struct ConfigRequest {
    pub interval: String,
}

pub async fn set_config(
    State(state): State<AppState>,
    Json(payload): Json<ConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let label = state
        .scheduler
        .reconfigure(&payload.interval)
        .await
        .ok_or_else(|| {
            ApiError::Validation(format!("unknown interval: {}", payload.interval))
        })?;
    Ok(Json(json!({ "currentInterval": label })))
}

/// Best-effort probe + quick fingerprint after create or an IP change.
/// Failures leave the router as-is; they never fail the request.
async fn refresh_fingerprint(
    repo: &Arc<dyn Repository>,
    router: router::Model,
) -> router::Model {
    let port = router.ssh_port as u16;
    let creds = Credentials::new(
        router.username.clone(),
        router.password.clone(),
        router.ssh_key.clone(),
    );

    let patch = if probe_tcp(&router.ip_address, port, std::time::Duration::from_secs(2))
        .await
        .is_open()
    {
        match fingerprint::quick(router.ip_address.clone(), port, creds).await {
            Ok(device) => {
                let mut patch = RouterPatch::seen_now(router::STATUS_ONLINE);
                if !device.hostname.is_empty() {
                    patch.hostname = Some(device.hostname);
                }
                if let Some(mac) = device.mac_address {
                    if mac_is_free(repo, &mac, router.id).await {
                        patch.mac_address = Some(mac);
                    }
                }
                patch
            }
            Err(_) => RouterPatch::status(router::STATUS_ONLINE),
        }
    } else {
        RouterPatch::status(router::STATUS_OFFLINE)
    };

    match repo.update_router(router.id, patch).await {
        Ok(Some(updated)) => updated,
        _ => router,
    }
}

/// A MAC can be written iff no other router already claims it.
async fn mac_is_free(repo: &Arc<dyn Repository>, mac: &str, router_id: i32) -> bool {
    match repo.find_router(Some(mac), None, None).await {
        Ok(None) => true,
        Ok(Some(owner)) => owner.id == router_id,
        Err(_) => false,
    }
}
