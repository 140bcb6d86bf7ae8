use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Router status values. Stored as plain text so the dashboard can render
/// them without a lookup table.
pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_UNKNOWN: &str = "unknown";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routers")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(index)]
    pub ip_address: String,
    pub hostname: Option<String>,
    // Lowercased colon form. Unique when present; Postgres allows multiple NULLs.
    #[sea_orm(unique)]
    pub mac_address: Option<String>,
    pub ssh_port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub ssh_key: Option<String>,
    pub monitoring_enabled: bool,
    pub metrics_retention_days: i32,
    pub status: String,
    pub last_seen: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::metric::Entity")]
    Metric,
}

impl Related<super::metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metric.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
