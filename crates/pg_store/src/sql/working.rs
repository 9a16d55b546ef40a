use foreman_job::{HistoryRecord, NewHistoryRecord, NewQueueRecord, WorkingRecord, WorkingSignal};
use indoc::formatdoc;
use sqlx::{query, query_as, Acquire, PgConnection, PgExecutor};

use super::{history::insert_history, queue::insert_queued};
use crate::errors::Result;
use crate::rows::WorkingRow;

pub(crate) async fn get_working<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
) -> Result<Option<WorkingRecord>> {
    let sql = format!("select * from {escaped_schema}.working where id = $1::bigint");

    let row: Option<WorkingRow> = query_as(&sql).bind(id).fetch_optional(executor).await?;
    Ok(row.map(WorkingRecord::try_from).transpose()?)
}

pub(crate) async fn get_working_for_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_id: i64,
) -> Result<Vec<WorkingRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.working
                where worker_id = $1::bigint
                order by started_on asc, id asc
        "#
    );

    let rows: Vec<WorkingRow> = query_as(&sql)
        .bind(worker_id)
        .fetch_all(executor)
        .await?;

    rows.into_iter()
        .map(|row| WorkingRecord::try_from(row).map_err(Into::into))
        .collect()
}

/// Removes the working record and writes its outcome in one transaction.
/// Returns `None` without writing anything when the record was already gone.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", working_id = working_id))]
pub(crate) async fn complete_working(
    conn: &mut PgConnection,
    escaped_schema: &str,
    working_id: i64,
    history: &NewHistoryRecord,
    retry: Option<&NewQueueRecord>,
) -> Result<Option<HistoryRecord>> {
    let mut tx = conn.begin().await?;

    let sql = format!("delete from {escaped_schema}.working where id = $1::bigint returning id");
    let deleted = query(&sql)
        .bind(working_id)
        .fetch_optional(&mut *tx)
        .await?;

    if deleted.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    let record = insert_history(&mut tx, escaped_schema, history).await?;
    if let Some(retry) = retry {
        insert_queued(&mut tx, escaped_schema, retry).await?;
    }

    tx.commit().await?;
    Ok(Some(record))
}

pub(crate) async fn set_working_signal<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    working_id: i64,
    signal: WorkingSignal,
) -> Result<bool> {
    let sql = format!("update {escaped_schema}.working set signal = $2::text where id = $1::bigint");

    let result = query(&sql)
        .bind(working_id)
        .bind(signal.as_str())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}
