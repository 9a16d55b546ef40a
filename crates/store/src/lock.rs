use chrono::{DateTime, Utc};

/// A record carrying lock fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Queue(i64),
    Working(i64),
    Worker(i64),
    /// The enqueueing lock of a schedule
    Schedule(i64),
}

/// Advisory lock rule shared by every store: a lock may be taken when it is
/// free, or when its holder has not refreshed it since `force_if_older_than`.
pub fn lock_is_acquirable(
    locked: bool,
    lock_updated_on: Option<DateTime<Utc>>,
    force_if_older_than: DateTime<Utc>,
) -> bool {
    if !locked {
        return true;
    }

    match lock_updated_on {
        Some(updated_on) => updated_on <= force_if_older_than,
        None => true,
    }
}
