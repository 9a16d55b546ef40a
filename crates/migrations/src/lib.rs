pub mod sql;

use indoc::{formatdoc, indoc};
use sql::FOREMAN_MIGRATIONS;
use sqlx::{query, query_as, query_scalar, Acquire, Error as SqlxError, FromRow, PgExecutor, Postgres};
use thiserror::Error;
use tracing::{info, warn};

const UNDEFINED_TABLE: &str = "42P01";

/// Oldest supported `server_version_num` (PostgreSQL 12).
pub const MIN_SERVER_VERSION_NUM: u32 = 120_000;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occurred while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("foreman requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Database is using foreman schema revision {} which includes breaking migration {}, but this version of foreman only supports up to revision {}. It would be unsafe to continue.", .latest_migration, .latest_breaking_migration, .highest_migration)]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: u32,
    },
    #[error("Error occurred while migrating: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Parses a `server_version_num` setting and rejects servers foreman cannot run on.
pub fn parse_server_version(server_version_num: &str) -> Result<u32, MigrateError> {
    let version = server_version_num.trim().parse::<u32>()?;
    if version < MIN_SERVER_VERSION_NUM {
        return Err(MigrateError::IncompatibleVersion(version));
    }
    Ok(version)
}

async fn fetch_server_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let server_version_num = query_scalar::<_, String>(indoc! {r#"
        select current_setting('server_version_num')
    "#})
    .fetch_one(executor)
    .await?;

    parse_server_version(&server_version_num)
}

/// Creates the schema and its migrations table. Returns the server version.
async fn install_schema<'e, E>(executor: E, escaped_schema: &str) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Clone,
{
    let version = fetch_server_version(executor.clone()).await?;
    info!(pg_version = version, "Installing foreman schema");

    let create_schema_query = formatdoc!(
        r#"
            create schema if not exists {escaped_schema};
        "#
    );

    let create_migration_table_query = formatdoc!(
        r#"
            create table {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null,
                breaking boolean not null default false
            );
        "#
    );

    let mut tx = executor.begin().await?;
    query(&create_schema_query).execute(tx.as_mut()).await?;
    query(&create_migration_table_query)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;

    Ok(version)
}

#[derive(FromRow, Default, Debug)]
pub struct LastMigration {
    server_version_num: String,
    id: Option<i32>,
    biggest_breaking_id: Option<i32>,
}

/// Returns the last migration applied to the database, installing the schema
/// first when it does not exist yet.
async fn get_last_migration<'e, E>(
    executor: &E,
    escaped_schema: &str,
) -> Result<LastMigration, MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let migrations_status_query = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num,
            (select id from {escaped_schema}.migrations order by id desc limit 1) as id,
            (select id from {escaped_schema}.migrations where breaking is true order by id desc limit 1) as biggest_breaking_id;
        "#
    );

    match query_as::<_, LastMigration>(&migrations_status_query)
        .fetch_one(executor.clone())
        .await
    {
        Ok(row) => Ok(row),
        Err(SqlxError::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
            let version = install_schema(executor.clone(), escaped_schema).await?;
            Ok(LastMigration {
                server_version_num: version.to_string(),
                ..Default::default()
            })
        }
        Err(e) => Err(MigrateError::SqlError(e)),
    }
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        match self.id.and_then(|id| u32::try_from(id).ok()) {
            Some(id) => migration_number > id,
            None => true,
        }
    }
}

/// Brings the foreman schema up to date. `escaped_schema` must already be a
/// quoted identifier.
pub async fn migrate<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let last_migration = get_last_migration(&executor, escaped_schema).await?;

    parse_server_version(&last_migration.server_version_num)?;
    let latest_migration = last_migration.id;
    let latest_breaking_migration = last_migration.biggest_breaking_id;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in FOREMAN_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();

        if migration_number > highest_migration {
            highest_migration = migration_number;
        }

        if last_migration.is_before_number(migration_number) {
            migrated = true;
            info!(
                migration_number,
                migration_name = migration.name(),
                is_breaking_migration = migration.is_breaking(),
                "Running migration {}",
                migration.name(),
            );
            let mut tx = executor.clone().begin().await?;
            migration.execute(&mut tx, escaped_schema).await?;
            let sql =
                format!("insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)");
            query(&sql)
                .bind(migration_number as i32)
                .bind(migration.is_breaking())
                .execute(tx.as_mut())
                .await?;

            tx.commit().await?;
        }
    }

    if migrated {
        info!("Migrations complete");
    }

    if let Some(latest_breaking_migration) = latest_breaking_migration {
        if highest_migration < latest_breaking_migration as u32 {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration: latest_migration.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if let Some(latest_migration) = latest_migration {
        if highest_migration < latest_migration as u32 {
            warn!(
                latest_migration,
                highest_migration,
                "Database is using foreman schema revision {}, but this version only knows up to revision {}. Attempting to continue regardless.",
                latest_migration,
                highest_migration,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_runs_every_migration() {
        let last = LastMigration::default();
        assert!(last.is_before_number(1));
        assert!(last.is_before_number(2));
    }

    #[test]
    fn supported_server_versions_are_returned() {
        assert_eq!(parse_server_version("120000").unwrap(), 120_000);
        assert_eq!(parse_server_version("160004").unwrap(), 160_004);
        assert_eq!(parse_server_version(" 140011\n").unwrap(), 140_011);
    }

    #[test]
    fn servers_older_than_twelve_are_rejected() {
        let err = parse_server_version("119999").unwrap_err();
        assert!(matches!(err, MigrateError::IncompatibleVersion(119_999)));
        assert!(err.to_string().contains("119999"));

        assert!(matches!(
            parse_server_version("96021"),
            Err(MigrateError::IncompatibleVersion(96_021))
        ));
    }

    #[test]
    fn garbled_server_version_is_a_parse_error() {
        assert!(matches!(
            parse_server_version("16.4"),
            Err(MigrateError::ParseVersionError(_))
        ));
        assert!(matches!(
            parse_server_version(""),
            Err(MigrateError::ParseVersionError(_))
        ));
    }

    #[test]
    fn applied_migrations_are_skipped() {
        let last = LastMigration {
            server_version_num: "140000".into(),
            id: Some(1),
            biggest_breaking_id: None,
        };
        assert!(!last.is_before_number(1));
        assert!(last.is_before_number(2));
    }
}
