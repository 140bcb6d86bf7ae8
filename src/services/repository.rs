use crate::entities::{metric, router};
use crate::services::telemetry::MetricRecord;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

#[derive(Debug, Clone)]
pub struct NewRouter {
    pub name: String,
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub ssh_port: i32,
    pub username: String,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub monitoring_enabled: bool,
    pub metrics_retention_days: i32,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct RouterPatch {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub ssh_port: Option<i32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub monitoring_enabled: Option<bool>,
    pub metrics_retention_days: Option<i32>,
    pub status: Option<String>,
    pub last_seen: Option<NaiveDateTime>,
}

impl RouterPatch {
    pub fn status(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Self::default()
        }
    }

    pub fn seen_now(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            last_seen: Some(Utc::now().naive_utc()),
            ..Self::default()
        }
    }
}

/// Persistence contract for the engine. Deleting a router cascades to its
/// metrics at the schema level.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_routers(&self) -> Result<Vec<router::Model>, DbErr>;
    async fn list_monitored(&self) -> Result<Vec<router::Model>, DbErr>;
    async fn get_router(&self, id: i32) -> Result<Option<router::Model>, DbErr>;
    async fn get_router_by_name(&self, name: &str) -> Result<Option<router::Model>, DbErr>;
    /// Lookup for upsert matching: MAC wins, then IP, then hostname.
    async fn find_router(
        &self,
        mac: Option<&str>,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Option<router::Model>, DbErr>;
    async fn create_router(&self, new: NewRouter) -> Result<router::Model, DbErr>;
    async fn update_router(
        &self,
        id: i32,
        patch: RouterPatch,
    ) -> Result<Option<router::Model>, DbErr>;
    async fn delete_router(&self, id: i32) -> Result<bool, DbErr>;

    async fn insert_metric(
        &self,
        router_id: i32,
        timestamp: NaiveDateTime,
        record: &MetricRecord,
    ) -> Result<metric::Model, DbErr>;
    /// Newest first, up to `limit`.
    async fn metrics_for_router(
        &self,
        router_id: i32,
        since: Option<NaiveDateTime>,
        limit: u64,
    ) -> Result<Vec<metric::Model>, DbErr>;
    async fn delete_metrics_before(
        &self,
        router_id: i32,
        cutoff: NaiveDateTime,
    ) -> Result<u64, DbErr>;
}

pub struct SqlRepository {
    db: DatabaseConnection,
}

impl SqlRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<serde_json::Value, DbErr> {
    serde_json::to_value(value).map_err(|e| DbErr::Custom(e.to_string()))
}

#[async_trait]
impl Repository for SqlRepository {
    async fn list_routers(&self) -> Result<Vec<router::Model>, DbErr> {
        router::Entity::find()
            .order_by_asc(router::Column::Id)
            .all(&self.db)
            .await
    }

    async fn list_monitored(&self) -> Result<Vec<router::Model>, DbErr> {
        router::Entity::find()
            .filter(router::Column::MonitoringEnabled.eq(true))
            .all(&self.db)
            .await
    }

    async fn get_router(&self, id: i32) -> Result<Option<router::Model>, DbErr> {
        router::Entity::find_by_id(id).one(&self.db).await
    }

    async fn get_router_by_name(&self, name: &str) -> Result<Option<router::Model>, DbErr> {
        router::Entity::find()
            .filter(router::Column::Name.eq(name))
            .one(&self.db)
            .await
    }

    async fn find_router(
        &self,
        mac: Option<&str>,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Option<router::Model>, DbErr> {
        // MAC addresses are stored lowercased, so the comparison is
        // case-insensitive by construction.
        if let Some(mac) = mac {
            let hit = router::Entity::find()
                .filter(router::Column::MacAddress.eq(mac.to_lowercase()))
                .one(&self.db)
                .await?;
            if hit.is_some() {
                return Ok(hit);
            }
        }
        if let Some(ip) = ip {
            let hit = router::Entity::find()
                .filter(router::Column::IpAddress.eq(ip))
                .one(&self.db)
                .await?;
            if hit.is_some() {
                return Ok(hit);
            }
        }
        if let Some(hostname) = hostname {
            return router::Entity::find()
                .filter(router::Column::Hostname.eq(hostname))
                .one(&self.db)
                .await;
        }
        Ok(None)
    }

    async fn create_router(&self, new: NewRouter) -> Result<router::Model, DbErr> {
        let now = Utc::now().naive_utc();
        let model = router::ActiveModel {
            name: Set(new.name),
            ip_address: Set(new.ip_address.clone()),
            // Until fingerprinted, the address stands in for the hostname.
            hostname: Set(new.hostname.or(Some(new.ip_address))),
            mac_address: Set(new.mac_address.map(|m| m.to_lowercase())),
            ssh_port: Set(new.ssh_port),
            username: Set(new.username),
            password: Set(new.password),
            ssh_key: Set(new.ssh_key),
            monitoring_enabled: Set(new.monitoring_enabled),
            metrics_retention_days: Set(new.metrics_retention_days),
            status: Set(router::STATUS_UNKNOWN.to_string()),
            last_seen: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        model.insert(&self.db).await
    }

    async fn update_router(
        &self,
        id: i32,
        patch: RouterPatch,
    ) -> Result<Option<router::Model>, DbErr> {
        let Some(existing) = router::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };

        let mut model = existing.into_active_model();
        if let Some(name) = patch.name {
            model.name = Set(name);
        }
        if let Some(ip) = patch.ip_address {
            model.ip_address = Set(ip);
        }
        if let Some(hostname) = patch.hostname {
            model.hostname = Set(Some(hostname));
        }
        if let Some(mac) = patch.mac_address {
            model.mac_address = Set(Some(mac.to_lowercase()));
        }
        if let Some(port) = patch.ssh_port {
            model.ssh_port = Set(port);
        }
        if let Some(username) = patch.username {
            model.username = Set(username);
        }
        if let Some(password) = patch.password {
            model.password = Set(Some(password));
        }
        if let Some(key) = patch.ssh_key {
            model.ssh_key = Set(Some(key));
        }
        if let Some(enabled) = patch.monitoring_enabled {
            model.monitoring_enabled = Set(enabled);
        }
        if let Some(days) = patch.metrics_retention_days {
            model.metrics_retention_days = Set(days);
        }
        if let Some(status) = patch.status {
            model.status = Set(status);
        }
        if let Some(seen) = patch.last_seen {
            model.last_seen = Set(Some(seen));
        }
        model.updated_at = Set(Utc::now().naive_utc());

        model.update(&self.db).await.map(Some)
    }

    async fn delete_router(&self, id: i32) -> Result<bool, DbErr> {
        let result = router::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn insert_metric(
        &self,
        router_id: i32,
        timestamp: NaiveDateTime,
        record: &MetricRecord,
    ) -> Result<metric::Model, DbErr> {
        let model = metric::ActiveModel {
            router_id: Set(router_id),
            timestamp: Set(timestamp),
            uptime: Set(record.uptime.clone()),
            cpu_load: Set(record.cpu_load),
            memory_usage: Set(to_json(&record.memory_usage)?),
            disk_usage: Set(to_json(&record.disk_usage)?),
            network_interfaces: Set(to_json(&record.network_interfaces)?),
            wireless_clients: Set(record.wireless_clients as i32),
            error: Set(record.error.clone()),
            ..Default::default()
        };
        model.insert(&self.db).await
    }

    async fn metrics_for_router(
        &self,
        router_id: i32,
        since: Option<NaiveDateTime>,
        limit: u64,
    ) -> Result<Vec<metric::Model>, DbErr> {
        let mut query = metric::Entity::find().filter(metric::Column::RouterId.eq(router_id));
        if let Some(since) = since {
            query = query.filter(metric::Column::Timestamp.gte(since));
        }
        query
            .order_by_desc(metric::Column::Timestamp)
            .limit(limit)
            .all(&self.db)
            .await
    }

    async fn delete_metrics_before(
        &self,
        router_id: i32,
        cutoff: NaiveDateTime,
    ) -> Result<u64, DbErr> {
        let result = metric::Entity::delete_many()
            .filter(metric::Column::RouterId.eq(router_id))
            .filter(metric::Column::Timestamp.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
