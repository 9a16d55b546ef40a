use std::collections::HashMap;

use chrono::{DateTime, Utc};
use foreman_job::{NewHistoryRecord, NewQueueRecord, NewScheduleRecord, ScheduleRecord, ScheduledJobRecord};
use indoc::formatdoc;
use sqlx::{query, query_as, Acquire, PgConnection, PgExecutor};

use super::{history::insert_history, queue::insert_queued};
use crate::errors::Result;
use crate::rows::{ScheduleRow, ScheduledJobRow};

/// Loads the schedules of an application along with their scheduled jobs,
/// ordered by schedule id then job number.
pub(crate) async fn get_schedules(
    conn: &mut PgConnection,
    escaped_schema: &str,
    application_name: &str,
) -> Result<Vec<ScheduleRecord>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.schedules
                where application_name = $1::text
                order by id asc
        "#
    );
    let schedules: Vec<ScheduleRow> = query_as(&sql)
        .bind(application_name)
        .fetch_all(&mut *conn)
        .await?;

    let ids: Vec<i64> = schedules.iter().map(|s| s.id).collect();
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.scheduled_jobs
                where schedule_id = any($1::bigint[])
                order by schedule_id asc, number asc
        "#
    );
    let jobs: Vec<ScheduledJobRow> = query_as(&sql).bind(&ids).fetch_all(&mut *conn).await?;

    let mut jobs_by_schedule: HashMap<i64, Vec<ScheduledJobRecord>> = HashMap::new();
    for job in jobs {
        jobs_by_schedule
            .entry(job.schedule_id)
            .or_default()
            .push(job.into());
    }

    schedules
        .into_iter()
        .map(|row| {
            let jobs = jobs_by_schedule.remove(&row.id).unwrap_or_default();
            row.into_record(jobs).map_err(Into::into)
        })
        .collect()
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub(crate) async fn create_schedule(
    conn: &mut PgConnection,
    escaped_schema: &str,
    schedule: &NewScheduleRecord,
) -> Result<ScheduleRecord> {
    let mut tx = conn.begin().await?;

    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.schedules
                (application_name, queue_name, name, start_on, end_on, repeat_type, repeat_value, enabled)
                values ($1, $2, $3, $4, $5, $6, $7, $8)
                returning *
        "#
    );
    let row: ScheduleRow = query_as(&sql)
        .bind(&schedule.application_name)
        .bind(&schedule.queue_name)
        .bind(&schedule.name)
        .bind(schedule.start_on)
        .bind(schedule.end_on)
        .bind(schedule.repeat_type.as_str())
        .bind(schedule.repeat_value)
        .bind(schedule.enabled)
        .fetch_one(&mut *tx)
        .await?;

    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.scheduled_jobs (schedule_id, job_type, data, number)
                values ($1, $2, $3, $4)
                returning *
        "#
    );
    let mut jobs = Vec::with_capacity(schedule.jobs.len());
    for (number, job) in (1..).zip(&schedule.jobs) {
        let job_row: ScheduledJobRow = query_as(&sql)
            .bind(row.id)
            .bind(&job.job_type)
            .bind(&job.data)
            .bind(number)
            .fetch_one(&mut *tx)
            .await?;
        jobs.push(job_row.into());
    }

    tx.commit().await?;
    Ok(row.into_record(jobs)?)
}

pub(crate) async fn delete_schedule<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    id: i64,
) -> Result<bool> {
    let sql = format!("delete from {escaped_schema}.schedules where id = $1::bigint");

    let result = query(&sql).bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

/// Whether an occurrence of the schedule at `date` was already written to
/// the queue, working or history table.
pub(crate) async fn schedule_date_exists<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    schedule_id: i64,
    date: DateTime<Utc>,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            select
                exists(select 1 from {escaped_schema}.queue where schedule_id = $1::bigint and queued_on = $2::timestamptz)
                or exists(select 1 from {escaped_schema}.working where schedule_id = $1::bigint and queued_on = $2::timestamptz)
                or exists(select 1 from {escaped_schema}.history where schedule_id = $1::bigint and queued_on = $2::timestamptz)
        "#
    );

    let (exists,): (bool,) = query_as(&sql)
        .bind(schedule_id)
        .bind(date)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", schedule_id = schedule_id, %date))]
pub(crate) async fn create_queued_and_history_for_schedule(
    conn: &mut PgConnection,
    escaped_schema: &str,
    schedule_id: i64,
    date: DateTime<Utc>,
    queued: &[NewQueueRecord],
    history: &[NewHistoryRecord],
) -> Result<()> {
    let mut tx = conn.begin().await?;

    for record in queued {
        insert_queued(&mut tx, escaped_schema, record).await?;
    }
    for record in history {
        insert_history(&mut tx, escaped_schema, record).await?;
    }

    tx.commit().await?;
    Ok(())
}
