use chrono::{DateTime, Utc};
use foreman_job::{NewQueueRecord, QueueRecord, WorkingRecord};
use foreman_queue_filters::QueueNameFilters;
use indoc::formatdoc;
use sqlx::{query_as, PgConnection, PgExecutor};

use crate::errors::Result;
use crate::rows::{QueueRow, WorkingRow};

/// Shared `where` clause selecting the queue records a filter may claim.
/// Binds: $1 application, $2 queued before, $3 include all, $4 include, $5 exclude.
const CLAIMABLE: &str = r#"
    application_name = $1::text
    and locked is false
    and queued_on <= $2::timestamptz
    and ($3::bool or queue_name = any($4::text[]))
    and not (queue_name = any($5::text[]))
"#;

fn filter_binds(filters: &QueueNameFilters) -> (bool, Vec<String>, Vec<String>) {
    (
        filters.includes_all_queues(),
        filters.include().iter().cloned().collect(),
        filters.exclude().iter().cloned().collect(),
    )
}

pub(crate) async fn insert_queued(
    conn: &mut PgConnection,
    escaped_schema: &str,
    record: &NewQueueRecord,
) -> Result<QueueRecord> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.queue
                (application_name, queue_name, job_name, job_type, data, queued_on, try_number, schedule_id)
                values ($1, $2, $3, $4, $5, $6, $7, $8)
                returning *
        "#
    );

    let row: QueueRow = query_as(&sql)
        .bind(&record.application_name)
        .bind(&record.queue_name)
        .bind(&record.job_name)
        .bind(&record.job_type)
        .bind(&record.data)
        .bind(record.queued_on)
        .bind(record.try_number)
        .bind(record.schedule_id)
        .fetch_one(conn)
        .await?;

    Ok(row.into())
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub(crate) async fn get_queued<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    application_name: &str,
    filters: &QueueNameFilters,
    queued_before: DateTime<Utc>,
) -> Result<Option<QueueRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.queue
                where {CLAIMABLE}
                order by queued_on asc, id asc
                limit 1
        "#
    );
    let (include_all, include, exclude) = filter_binds(filters);

    let row: Option<QueueRow> = query_as(&sql)
        .bind(application_name)
        .bind(queued_before)
        .bind(include_all)
        .bind(include)
        .bind(exclude)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(Into::into))
}

pub(crate) async fn get_all_queued<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    application_name: &str,
) -> Result<Vec<QueueRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.queue
                where application_name = $1::text
                order by queued_on asc, id asc
        "#
    );

    let rows: Vec<QueueRow> = query_as(&sql)
        .bind(application_name)
        .fetch_all(executor)
        .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Moves the next claimable queue record into the working table in one statement.
/// Concurrent claimers skip rows another transaction already picked.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", worker_id = worker_id))]
pub(crate) async fn claim_queued<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    application_name: &str,
    worker_id: i64,
    filters: &QueueNameFilters,
    queued_before: DateTime<Utc>,
) -> Result<Option<WorkingRecord>> {
    let sql = formatdoc!(
        r#"
            with next as (
                select id from {escaped_schema}.queue
                    where {CLAIMABLE}
                    order by queued_on asc, id asc
                    limit 1
                    for update skip locked
            ),
            claimed as (
                delete from {escaped_schema}.queue as queue
                    using next
                    where queue.id = next.id
                    returning queue.*
            )
            insert into {escaped_schema}.working
                (application_name, worker_id, queue_name, job_name, job_type, data, queued_on, try_number, schedule_id, started_on)
                select application_name, $6::bigint, queue_name, job_name, job_type, data, queued_on, try_number, schedule_id, now()
                from claimed
                returning *
        "#
    );
    let (include_all, include, exclude) = filter_binds(filters);

    let row: Option<WorkingRow> = query_as(&sql)
        .bind(application_name)
        .bind(queued_before)
        .bind(include_all)
        .bind(include)
        .bind(exclude)
        .bind(worker_id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(WorkingRecord::try_from).transpose()?)
}
