use chrono::{DateTime, Utc};
use foreman_store::LockTarget;
use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Table, lock flag column and lock timestamp column of a lock target.
fn lock_columns(target: LockTarget) -> (&'static str, &'static str, &'static str, i64) {
    match target {
        LockTarget::Queue(id) => ("queue", "locked", "lock_updated_on", id),
        LockTarget::Working(id) => ("working", "locked", "lock_updated_on", id),
        LockTarget::Worker(id) => ("workers", "locked", "lock_updated_on", id),
        LockTarget::Schedule(id) => ("schedules", "enqueueing", "enqueueing_updated_on", id),
    }
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", ?target))]
pub(crate) async fn acquire_lock<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    target: LockTarget,
    force_if_older_than: DateTime<Utc>,
) -> Result<bool> {
    let (table, locked, updated_on, id) = lock_columns(target);
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.{table}
                set {locked} = true, {updated_on} = now()
                where id = $1::bigint
                and ({locked} is false or {updated_on} is null or {updated_on} <= $2::timestamptz)
                returning id
        "#
    );

    let row = query(&sql)
        .bind(id)
        .bind(force_if_older_than)
        .fetch_optional(executor)
        .await?;

    Ok(row.is_some())
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", ?target))]
pub(crate) async fn release_lock<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    target: LockTarget,
) -> Result<()> {
    let (table, locked, _, id) = lock_columns(target);
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.{table}
                set {locked} = false
                where id = $1::bigint and {locked} is true
        "#
    );

    query(&sql).bind(id).execute(executor).await?;
    Ok(())
}
