use foreman_job::{HistoryRecord, NewHistoryRecord};
use indoc::formatdoc;
use sqlx::{query_as, PgConnection, PgExecutor};

use crate::errors::Result;
use crate::rows::HistoryRow;

pub(crate) async fn insert_history(
    conn: &mut PgConnection,
    escaped_schema: &str,
    record: &NewHistoryRecord,
) -> Result<HistoryRecord> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.history
                (application_name, worker_id, queue_name, job_name, job_type, data, queued_on,
                 try_number, started_on, finished_on, status, exception, schedule_id)
                values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                returning *
        "#
    );

    let row: HistoryRow = query_as(&sql)
        .bind(&record.application_name)
        .bind(record.worker_id)
        .bind(&record.queue_name)
        .bind(&record.job_name)
        .bind(&record.job_type)
        .bind(&record.data)
        .bind(record.queued_on)
        .bind(record.try_number)
        .bind(record.started_on)
        .bind(record.finished_on)
        .bind(record.status.as_str())
        .bind(&record.exception)
        .bind(record.schedule_id)
        .fetch_one(conn)
        .await?;

    Ok(HistoryRecord::try_from(row)?)
}

pub(crate) async fn get_history<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    application_name: &str,
) -> Result<Vec<HistoryRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.history
                where application_name = $1::text
                order by finished_on asc, id asc
        "#
    );

    let rows: Vec<HistoryRow> = query_as(&sql)
        .bind(application_name)
        .fetch_all(executor)
        .await?;

    rows.into_iter()
        .map(|row| HistoryRecord::try_from(row).map_err(Into::into))
        .collect()
}
