use indoc::indoc;

use super::ForemanMigration;

pub const M000001_MIGRATION: ForemanMigration = ForemanMigration {
    number: 1,
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :FOREMAN_SCHEMA.workers (
                id bigint generated always as identity primary key,
                application_name text not null,
                name text not null,
                machine_address text not null,
                machine_name text not null,
                queue_names text not null default '*',
                status text not null default 'stopped'
                    check (status in ('stopped', 'working', 'stopping')),
                signal text not null default 'none'
                    check (signal in ('none', 'start', 'stop', 'refresh_schedules')),
                startup text not null default 'automatic'
                    check (startup in ('automatic', 'manual')),
                updated_on timestamptz not null default now(),
                locked boolean not null default false,
                lock_updated_on timestamptz
            );
        "#},
        indoc! {r#"
            create table :FOREMAN_SCHEMA.schedules (
                id bigint generated always as identity primary key,
                application_name text not null,
                queue_name text not null,
                name text not null,
                start_on timestamptz not null,
                end_on timestamptz,
                repeat_type text not null default 'none'
                    check (repeat_type in ('none', 'seconds', 'minutes', 'hours', 'days', 'weeks')),
                repeat_value bigint not null default 0,
                enabled boolean not null default true,
                enqueueing boolean not null default false,
                enqueueing_updated_on timestamptz
            );
        "#},
        indoc! {r#"
            create table :FOREMAN_SCHEMA.scheduled_jobs (
                id bigint generated always as identity primary key,
                schedule_id bigint not null
                    references :FOREMAN_SCHEMA.schedules (id) on delete cascade,
                job_type text not null,
                data text not null default '{}',
                number int not null,
                unique (schedule_id, number)
            );
        "#},
        indoc! {r#"
            create table :FOREMAN_SCHEMA.queue (
                id bigint generated always as identity primary key,
                application_name text not null,
                queue_name text not null,
                job_name text not null,
                job_type text not null,
                data text not null default '{}',
                queued_on timestamptz not null default now(),
                try_number int not null default 1 check (try_number > 0),
                schedule_id bigint,
                locked boolean not null default false,
                lock_updated_on timestamptz
            );
        "#},
        indoc! {r#"
            create table :FOREMAN_SCHEMA.working (
                id bigint generated always as identity primary key,
                application_name text not null,
                worker_id bigint not null,
                queue_name text not null,
                job_name text not null,
                job_type text not null,
                data text not null,
                queued_on timestamptz not null,
                try_number int not null check (try_number > 0),
                started_on timestamptz not null default now(),
                signal text not null default 'none' check (signal in ('none', 'cancel')),
                schedule_id bigint,
                locked boolean not null default false,
                lock_updated_on timestamptz
            );
        "#},
        indoc! {r#"
            create table :FOREMAN_SCHEMA.history (
                id bigint generated always as identity primary key,
                application_name text not null,
                worker_id bigint,
                queue_name text not null,
                job_name text not null,
                job_type text not null,
                data text not null,
                queued_on timestamptz not null,
                try_number int not null check (try_number > 0),
                started_on timestamptz not null,
                finished_on timestamptz not null,
                status text not null
                    check (status in ('succeeded', 'failed', 'canceled', 'timed_out', 'interrupted')),
                exception text,
                schedule_id bigint
            );
        "#},
    ],
};
