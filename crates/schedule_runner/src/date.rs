use chrono::{prelude::*, Duration, SubsecRound};
use foreman_job::ScheduleRecord;

pub(crate) fn floor_to_second(datetime: DateTime<Utc>) -> DateTime<Utc> {
    datetime.trunc_subsecs(0)
}

/// Occurrence of `schedule` due in the window `(window_begin, window_end]`, if any.
///
/// Both bounds are floored to whole seconds. A schedule whose end date is at or
/// before the end of the window is never due. A start date inside the window is
/// used as is; otherwise a repeating schedule is due at its first occurrence
/// after `window_begin`, provided it does not fall after `window_end`.
pub fn calculate_schedule_date(
    schedule: &ScheduleRecord,
    window_begin: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let begin = floor_to_second(window_begin);
    let end = floor_to_second(window_end);

    if schedule.end_on.is_some_and(|end_on| end_on <= end) {
        return None;
    }

    let start = schedule.start_on;
    if begin < start && start <= end {
        return Some(start);
    }

    let repeat_ms = schedule.repeat_seconds()?.checked_mul(1000)?;
    if repeat_ms <= 0 || start > begin {
        return None;
    }

    // Intervals too large for a date are never due.
    let elapsed_ms = (begin - start).num_milliseconds();
    let occurrences = elapsed_ms / repeat_ms + i64::from(elapsed_ms % repeat_ms != 0);
    let offset = Duration::try_milliseconds(occurrences.checked_mul(repeat_ms)?)?;
    let candidate = start.checked_add_signed(offset)?;

    (begin < candidate && candidate <= end).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_job::ScheduleRepeatType;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, h, m, s).unwrap()
    }

    fn schedule(repeat_type: ScheduleRepeatType, repeat_value: i64) -> ScheduleRecord {
        ScheduleRecord {
            id: 1,
            application_name: "app".into(),
            queue_name: "default".into(),
            name: "test".into(),
            start_on: at(0, 0, 0),
            end_on: None,
            repeat_type,
            repeat_value,
            enabled: true,
            enqueueing: false,
            enqueueing_updated_on: None,
            scheduled_jobs: vec![],
        }
    }

    #[test]
    fn next_hourly_occurrence() {
        let s = schedule(ScheduleRepeatType::Hours, 1);
        assert_eq!(
            calculate_schedule_date(&s, at(2, 30, 0), at(3, 0, 0)),
            Some(at(3, 0, 0))
        );
        assert_eq!(calculate_schedule_date(&s, at(3, 0, 0), at(3, 30, 0)), None);
        assert_eq!(calculate_schedule_date(&s, at(2, 0, 0), at(2, 59, 59)), None);
    }

    #[test]
    fn window_bounds_are_floored() {
        let s = schedule(ScheduleRepeatType::Minutes, 15);
        let begin = at(0, 14, 59) + Duration::milliseconds(900);
        let end = at(0, 15, 0) + Duration::milliseconds(700);

        assert_eq!(calculate_schedule_date(&s, begin, end), Some(at(0, 15, 0)));
    }

    #[test]
    fn non_repeating_schedule_is_due_once() {
        let mut s = schedule(ScheduleRepeatType::None, 0);
        s.start_on = at(1, 0, 0);

        assert_eq!(calculate_schedule_date(&s, at(0, 0, 0), at(0, 59, 59)), None);
        assert_eq!(
            calculate_schedule_date(&s, at(0, 59, 59), at(1, 0, 0)),
            Some(at(1, 0, 0))
        );
        assert_eq!(calculate_schedule_date(&s, at(1, 0, 0), at(1, 0, 10)), None);
        assert_eq!(calculate_schedule_date(&s, at(5, 0, 0), at(6, 0, 0)), None);
    }

    #[test]
    fn start_inside_window_is_used_directly() {
        let mut s = schedule(ScheduleRepeatType::Days, 1);
        s.start_on = at(10, 0, 3);

        assert_eq!(
            calculate_schedule_date(&s, at(10, 0, 0), at(10, 0, 10)),
            Some(at(10, 0, 3))
        );
        assert_eq!(calculate_schedule_date(&s, at(9, 0, 0), at(9, 0, 10)), None);
    }

    #[test]
    fn ended_schedule_is_never_due() {
        let mut s = schedule(ScheduleRepeatType::Hours, 1);
        s.end_on = Some(at(3, 0, 0));

        assert_eq!(calculate_schedule_date(&s, at(2, 30, 0), at(3, 0, 0)), None);

        s.end_on = Some(at(3, 0, 1));
        assert_eq!(
            calculate_schedule_date(&s, at(2, 30, 0), at(3, 0, 0)),
            Some(at(3, 0, 0))
        );
    }

    #[test]
    fn repeat_value_multiplies_the_unit() {
        let s = schedule(ScheduleRepeatType::Seconds, 90);
        assert_eq!(
            calculate_schedule_date(&s, at(0, 2, 50), at(0, 3, 0)),
            Some(at(0, 3, 0))
        );
        assert_eq!(calculate_schedule_date(&s, at(0, 3, 1), at(0, 4, 0)), None);
    }

    #[test]
    fn interval_past_the_calendar_is_never_due() {
        let s = schedule(ScheduleRepeatType::Weeks, 20_000_000);
        assert_eq!(calculate_schedule_date(&s, at(1, 0, 0), at(1, 0, 10)), None);
    }

    #[test]
    fn interval_overflowing_seconds_is_never_due() {
        for repeat_value in [i64::MAX / 1000, i64::MAX] {
            let s = schedule(ScheduleRepeatType::Weeks, repeat_value);
            assert_eq!(s.repeat_seconds(), None);
            assert_eq!(calculate_schedule_date(&s, at(1, 0, 0), at(1, 0, 10)), None);
        }

        let s = schedule(ScheduleRepeatType::Seconds, i64::MAX / 1000);
        assert_eq!(calculate_schedule_date(&s, at(1, 0, 0), at(1, 0, 10)), None);
    }

    #[test]
    fn start_inside_window_wins_over_huge_interval() {
        let mut s = schedule(ScheduleRepeatType::Weeks, i64::MAX);
        s.start_on = at(1, 0, 5);
        assert_eq!(
            calculate_schedule_date(&s, at(1, 0, 0), at(1, 0, 10)),
            Some(at(1, 0, 5))
        );
    }
}
