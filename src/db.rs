use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::env;

pub async fn connect() -> Result<DatabaseConnection, sea_orm::DbErr> {
    let db_url = env::var("DATABASE_URL")
        .map_err(|_| sea_orm::DbErr::Custom("DATABASE_URL must be set".into()))?;

    let db = Database::connect(db_url).await?;
    tracing::info!("Connected to the database");

    create_schema(&db).await?;

    Ok(db)
}

async fn create_schema(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    use crate::entities::{metric, router};
    use sea_orm::schema::Schema;

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = schema
        .create_table_from_entity(router::Entity)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&stmt)).await?;

    let stmt = schema
        .create_table_from_entity(metric::Entity)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&stmt)).await?;

    tracing::info!("Schema initialized (routers & metrics tables)");
    Ok(())
}
