use foreman_job::{NewWorkerRecord, Signals, WorkerRecord, WorkerSignal, WorkerStatus};
use indoc::formatdoc;
use sqlx::{query, query_as, Acquire, FromRow, PgConnection, PgExecutor};

use crate::errors::Result;
use crate::rows::WorkerRow;

#[derive(FromRow)]
struct WorkerSignalRow {
    name: String,
    queue_names: String,
    signal: String,
}

#[derive(FromRow)]
struct WorkingSignalRow {
    id: i64,
    signal: String,
}

pub(crate) async fn get_workers<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    application_name: &str,
    machine_address: &str,
    machine_name: &str,
) -> Result<Vec<WorkerRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.workers
                where application_name = $1::text
                and machine_address = $2::text
                and machine_name = $3::text
                order by id asc
        "#
    );

    let rows: Vec<WorkerRow> = query_as(&sql)
        .bind(application_name)
        .bind(machine_address)
        .bind(machine_name)
        .fetch_all(executor)
        .await?;

    rows.into_iter()
        .map(|row| WorkerRecord::try_from(row).map_err(Into::into))
        .collect()
}

pub(crate) async fn get_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
) -> Result<Option<WorkerRecord>> {
    let sql = format!("select * from {escaped_schema}.workers where id = $1::bigint");

    let row: Option<WorkerRow> = query_as(&sql).bind(id).fetch_optional(executor).await?;
    Ok(row.map(WorkerRecord::try_from).transpose()?)
}

pub(crate) async fn create_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker: &NewWorkerRecord,
) -> Result<WorkerRecord> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.workers
                (application_name, name, machine_address, machine_name, queue_names, status, startup)
                values ($1, $2, $3, $4, $5, $6, $7)
                returning *
        "#
    );

    let row: WorkerRow = query_as(&sql)
        .bind(&worker.application_name)
        .bind(&worker.name)
        .bind(&worker.machine_address)
        .bind(&worker.machine_name)
        .bind(&worker.queue_names)
        .bind(worker.status.as_str())
        .bind(worker.startup.as_str())
        .fetch_one(executor)
        .await?;

    Ok(WorkerRecord::try_from(row)?)
}

/// Sets one text column of a worker and bumps `updated_on`.
async fn update_worker_column<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
    column: &str,
    value: &str,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.workers
                set {column} = $2::text, updated_on = now()
                where id = $1::bigint
        "#
    );

    let result = query(&sql).bind(id).bind(value).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn update_worker_queue_names<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
    queue_names: &str,
) -> Result<bool> {
    update_worker_column(executor, escaped_schema, id, "queue_names", queue_names).await
}

pub(crate) async fn update_worker_status<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
    status: WorkerStatus,
) -> Result<bool> {
    update_worker_column(executor, escaped_schema, id, "status", status.as_str()).await
}

pub(crate) async fn set_worker_signal<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
    signal: WorkerSignal,
) -> Result<bool> {
    update_worker_column(executor, escaped_schema, id, "signal", signal.as_str()).await
}

pub(crate) async fn delete_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
) -> Result<bool> {
    let sql = format!("delete from {escaped_schema}.workers where id = $1::bigint");

    let result = query(&sql).bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

/// Reads and clears the pending signals of a worker and, when given, of one
/// of its working records. Returns `None` once the worker row is gone.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", worker_id = worker_id))]
pub(crate) async fn take_signals(
    conn: &mut PgConnection,
    escaped_schema: &str,
    worker_id: i64,
    working_id: Option<i64>,
) -> Result<Option<Signals>> {
    let mut tx = conn.begin().await?;

    let sql = formatdoc!(
        r#"
            select name, queue_names, signal from {escaped_schema}.workers
                where id = $1::bigint
                for update
        "#
    );
    let worker: Option<WorkerSignalRow> = query_as(&sql)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(worker) = worker else {
        tx.rollback().await?;
        return Ok(None);
    };

    let mut signals = Signals {
        worker_name: worker.name,
        queue_names: worker.queue_names,
        worker_signal: worker.signal.parse()?,
        ..Default::default()
    };

    if signals.worker_signal != WorkerSignal::None {
        let sql = format!("update {escaped_schema}.workers set signal = 'none' where id = $1::bigint");
        query(&sql).bind(worker_id).execute(&mut *tx).await?;
    }

    if let Some(working_id) = working_id {
        let sql = formatdoc!(
            r#"
                select id, signal from {escaped_schema}.working
                    where id = $1::bigint and worker_id = $2::bigint
                    for update
            "#
        );
        let working: Option<WorkingSignalRow> = query_as(&sql)
            .bind(working_id)
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(working) = working {
            signals.working_id = Some(working.id);
            signals.working_signal = working.signal.parse()?;

            let sql = format!("update {escaped_schema}.working set signal = 'none' where id = $1::bigint");
            query(&sql).bind(working.id).execute(&mut *tx).await?;
        }
    }

    tx.commit().await?;
    Ok(Some(signals))
}
