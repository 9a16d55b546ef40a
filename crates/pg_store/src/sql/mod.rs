pub(crate) mod history;
pub(crate) mod lock;
pub(crate) mod queue;
pub(crate) mod schedule;
pub(crate) mod worker;
pub(crate) mod working;
