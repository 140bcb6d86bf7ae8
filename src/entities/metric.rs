use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metrics")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(index)]
    pub router_id: i32,
    #[sea_orm(index)]
    pub timestamp: DateTime,
    // Raw `uptime` output; kept opaque for display.
    pub uptime: String,
    pub cpu_load: f64,
    pub memory_usage: Json,
    pub disk_usage: Json,
    pub network_interfaces: Json,
    pub wireless_clients: i32,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::router::Entity",
        from = "Column::RouterId",
        to = "super::router::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Router,
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
