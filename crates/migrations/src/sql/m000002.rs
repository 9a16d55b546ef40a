use indoc::indoc;

use super::ForemanMigration;

pub const M000002_MIGRATION: ForemanMigration = ForemanMigration {
    number: 2,
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create index queue_application_name_queued_on_id_idx
                on :FOREMAN_SCHEMA.queue (application_name, queued_on, id)
                where locked is false;
        "#},
        indoc! {r#"
            create index queue_schedule_id_queued_on_idx
                on :FOREMAN_SCHEMA.queue (schedule_id, queued_on)
                where schedule_id is not null;
        "#},
        indoc! {r#"
            create index working_worker_id_idx on :FOREMAN_SCHEMA.working (worker_id);
        "#},
        indoc! {r#"
            create index working_schedule_id_queued_on_idx
                on :FOREMAN_SCHEMA.working (schedule_id, queued_on)
                where schedule_id is not null;
        "#},
        indoc! {r#"
            create index history_schedule_id_queued_on_idx
                on :FOREMAN_SCHEMA.history (schedule_id, queued_on)
                where schedule_id is not null;
        "#},
        indoc! {r#"
            create index history_application_name_finished_on_idx
                on :FOREMAN_SCHEMA.history (application_name, finished_on);
        "#},
        indoc! {r#"
            create index workers_application_name_machine_idx
                on :FOREMAN_SCHEMA.workers (application_name, machine_address, machine_name);
        "#},
        indoc! {r#"
            create index schedules_application_name_idx
                on :FOREMAN_SCHEMA.schedules (application_name) where enabled;
        "#},
    ],
};
