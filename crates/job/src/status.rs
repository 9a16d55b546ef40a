use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a stored enum value does not match any known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Stable lower-case name, as persisted by the stores.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Terminal status of one execution attempt.
    HistoryStatus, "history status" {
        Succeeded => "succeeded",
        Failed => "failed",
        Canceled => "canceled",
        TimedOut => "timed_out",
        Interrupted => "interrupted",
    }
}

impl HistoryStatus {
    /// Failed, timed out and interrupted attempts consume a try and may be re-enqueued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HistoryStatus::Failed | HistoryStatus::TimedOut | HistoryStatus::Interrupted
        )
    }
}

string_enum! {
    /// Lifecycle state of a worker.
    WorkerStatus, "worker status" {
        Stopped => "stopped",
        Working => "working",
        Stopping => "stopping",
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        WorkerStatus::Stopped
    }
}

string_enum! {
    /// Control-plane instruction addressed to a worker.
    WorkerSignal, "worker signal" {
        None => "none",
        Start => "start",
        Stop => "stop",
        RefreshSchedules => "refresh_schedules",
    }
}

impl Default for WorkerSignal {
    fn default() -> Self {
        WorkerSignal::None
    }
}

string_enum! {
    /// Control-plane instruction addressed to an in-flight job.
    WorkingSignal, "working signal" {
        None => "none",
        Cancel => "cancel",
    }
}

impl Default for WorkingSignal {
    fn default() -> Self {
        WorkingSignal::None
    }
}

string_enum! {
    /// Whether the machine starts a worker as soon as it loads its record.
    WorkerStartupType, "worker startup type" {
        Automatic => "automatic",
        Manual => "manual",
    }
}

impl Default for WorkerStartupType {
    fn default() -> Self {
        WorkerStartupType::Automatic
    }
}

string_enum! {
    /// Unit of a schedule's repeat interval.
    ScheduleRepeatType, "schedule repeat type" {
        None => "none",
        Seconds => "seconds",
        Minutes => "minutes",
        Hours => "hours",
        Days => "days",
        Weeks => "weeks",
    }
}

impl ScheduleRepeatType {
    /// Number of seconds in one unit, `0` for a non-repeating schedule.
    pub fn unit_seconds(&self) -> i64 {
        match self {
            ScheduleRepeatType::None => 0,
            ScheduleRepeatType::Seconds => 1,
            ScheduleRepeatType::Minutes => 60,
            ScheduleRepeatType::Hours => 60 * 60,
            ScheduleRepeatType::Days => 24 * 60 * 60,
            ScheduleRepeatType::Weeks => 7 * 24 * 60 * 60,
        }
    }
}

impl Default for ScheduleRepeatType {
    fn default() -> Self {
        ScheduleRepeatType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_persisted_names() {
        assert_eq!("timed_out".parse(), Ok(HistoryStatus::TimedOut));
        assert_eq!("stopping".parse(), Ok(WorkerStatus::Stopping));
        assert_eq!(
            "refresh_schedules".parse(),
            Ok(WorkerSignal::RefreshSchedules)
        );
        assert_eq!("cancel".parse(), Ok(WorkingSignal::Cancel));
        assert_eq!("manual".parse(), Ok(WorkerStartupType::Manual));
        assert_eq!("weeks".parse(), Ok(ScheduleRepeatType::Weeks));
    }

    #[test]
    fn should_reject_unknown_names() {
        let err = "paused".parse::<WorkerStatus>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown worker status value 'paused'");
    }

    #[test]
    fn retryable_statuses() {
        assert!(HistoryStatus::Failed.is_retryable());
        assert!(HistoryStatus::TimedOut.is_retryable());
        assert!(HistoryStatus::Interrupted.is_retryable());
        assert!(!HistoryStatus::Succeeded.is_retryable());
        assert!(!HistoryStatus::Canceled.is_retryable());
    }

    #[test]
    fn serde_uses_persisted_names() {
        let json = serde_json::to_string(&HistoryStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let signal: WorkerSignal = serde_json::from_str("\"refresh_schedules\"").unwrap();
        assert_eq!(signal, WorkerSignal::RefreshSchedules);
    }

    #[test]
    fn unit_seconds() {
        assert_eq!(ScheduleRepeatType::None.unit_seconds(), 0);
        assert_eq!(ScheduleRepeatType::Hours.unit_seconds(), 3600);
        assert_eq!(ScheduleRepeatType::Weeks.unit_seconds(), 604_800);
    }
}
