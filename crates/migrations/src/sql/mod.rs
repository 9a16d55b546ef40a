use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;

/// Placeholder replaced by the escaped schema name in every statement.
pub const SCHEMA_PLACEHOLDER: &str = ":FOREMAN_SCHEMA";

pub struct ForemanMigration {
    number: u32,
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl ForemanMigration {
    pub fn migration_number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(SCHEMA_PLACEHOLDER, escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const FOREMAN_MIGRATIONS: &[ForemanMigration] =
    &[m000001::M000001_MIGRATION, m000002::M000002_MIGRATION];
