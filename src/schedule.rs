//! Schedule compilation: turn a plan into wake events and commit them.
//!
//! Committing is fail-safe. If the plan cannot be compiled or the board
//! rejects it, [`SchedulePlan::FALLBACK`] is committed instead, and if even
//! that fails the next wake is estimated locally. A device that ends a run
//! without a schedule may never wake again.

use jiff::{Timestamp, Zoned};

use crate::board::{BoardError, PowerBoard};
use crate::model::{MINUTES_PER_DAY, ScheduleEvent, SchedulePlan, WakeSchedule};

/// Reasons a plan could not be committed.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("interval must be at least one minute")]
    ZeroInterval,

    #[error("at least one wake per day is required")]
    ZeroRepetitions,

    #[error("{repetitions} wakes every {interval_minutes} min do not fit in one day")]
    ExceedsDay {
        interval_minutes: u32,
        repetitions: u32,
    },

    #[error("board rejected schedule: {0}")]
    Board(#[from] BoardError),
}

/// What was committed to the board.
#[derive(Debug)]
pub struct Commit {
    /// The plan actually in effect: the requested one, or the fallback.
    pub plan: SchedulePlan,

    pub schedule: WakeSchedule,

    /// When the device wakes next.
    pub next_startup: Timestamp,

    /// Why the requested plan was replaced by the fallback, if it was.
    pub failure: Option<ScheduleError>,
}

/// Build the wake events for a plan.
///
/// Events start at the plan's start time and step by the interval, each
/// wrapped into the day.
pub fn build_events(plan: &SchedulePlan) -> Result<Vec<ScheduleEvent>, ScheduleError> {
    if plan.interval_minutes == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    if plan.repetitions == 0 {
        return Err(ScheduleError::ZeroRepetitions);
    }
    if u64::from(plan.interval_minutes) * u64::from(plan.repetitions) > u64::from(MINUTES_PER_DAY)
    {
        return Err(ScheduleError::ExceedsDay {
            interval_minutes: plan.interval_minutes,
            repetitions: plan.repetitions,
        });
    }
    Ok(events(plan))
}

fn events(plan: &SchedulePlan) -> Vec<ScheduleEvent> {
    let start = plan.start.minute_of_day();
    (0..plan.repetitions)
        .map(|i| ScheduleEvent::from_minute_of_day(start + i * plan.interval_minutes))
        .collect()
}

/// Commit a plan to the board, falling back to the default schedule on failure.
///
/// Always returns a next startup time.
pub fn commit(
    board: &mut dyn PowerBoard,
    plan: SchedulePlan,
    awake_minutes: u32,
    now: &Zoned,
) -> Commit {
    match try_commit(board, &plan, awake_minutes) {
        Ok((schedule, next_startup)) => {
            tracing::info!(%plan, next_startup = %next_startup, "schedule committed");
            Commit {
                plan,
                schedule,
                next_startup,
                failure: None,
            }
        }
        Err(failure) => {
            tracing::warn!(%plan, error = %failure, "committing fallback schedule");
            let fallback = SchedulePlan::FALLBACK;
            let schedule = WakeSchedule {
                events: events(&fallback),
                awake_minutes,
            };
            let next_startup = match board.apply_schedule(&schedule) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "board rejected the fallback schedule");
                    next_occurrence(&schedule.events, now)
                }
            };
            Commit {
                plan: fallback,
                schedule,
                next_startup,
                failure: Some(failure),
            }
        }
    }
}

fn try_commit(
    board: &mut dyn PowerBoard,
    plan: &SchedulePlan,
    awake_minutes: u32,
) -> Result<(WakeSchedule, Timestamp), ScheduleError> {
    let schedule = WakeSchedule {
        events: build_events(plan)?,
        awake_minutes,
    };
    let next = board.apply_schedule(&schedule)?;
    Ok((schedule, next))
}

/// The first event strictly after `now`, in `now`'s time zone.
pub fn next_occurrence(events: &[ScheduleEvent], now: &Zoned) -> Timestamp {
    let minute_now =
        u32::from(now.hour().unsigned_abs()) * 60 + u32::from(now.minute().unsigned_abs());
    let ahead = events
        .iter()
        .map(|e| (e.minute_of_day() + MINUTES_PER_DAY - minute_now - 1) % MINUTES_PER_DAY + 1)
        .min()
        .unwrap_or(MINUTES_PER_DAY);

    let start_of_minute = now.timestamp().as_second() - i64::from(now.second());
    Timestamp::from_second(start_of_minute + i64::from(ahead) * 60)
        .unwrap_or_else(|_| now.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::tz::TimeZone;

    use crate::model::PowerState;

    /// Records applied schedules; optionally rejects the first `reject` of them.
    struct FakeBoard {
        applied: Vec<WakeSchedule>,
        reject: usize,
        next: Timestamp,
    }

    impl FakeBoard {
        fn accepting() -> Self {
            Self {
                applied: Vec::new(),
                reject: 0,
                next: "2024-03-12T12:00:00Z".parse().unwrap(),
            }
        }

        fn rejecting(reject: usize) -> Self {
            Self {
                reject,
                ..Self::accepting()
            }
        }
    }

    impl PowerBoard for FakeBoard {
        fn read_power_state(&mut self) -> crate::board::Result<PowerState> {
            unimplemented!()
        }

        fn apply_schedule(&mut self, schedule: &WakeSchedule) -> crate::board::Result<Timestamp> {
            self.applied.push(schedule.clone());
            if self.applied.len() <= self.reject {
                return Err(BoardError::Schedule("rejected".to_string()));
            }
            Ok(self.next)
        }

        fn set_low_voltage_threshold(&mut self, _volts: f64) -> crate::board::Result<()> {
            Ok(())
        }

        fn set_recovery_voltage_threshold(&mut self, _volts: f64) -> crate::board::Result<()> {
            Ok(())
        }

        fn sync_time(&mut self) -> crate::board::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> crate::board::Result<()> {
            Ok(())
        }
    }

    fn now() -> Zoned {
        "2024-03-12T10:17:42Z"
            .parse::<Timestamp>()
            .unwrap()
            .to_zoned(TimeZone::UTC)
    }

    fn plan(hour: u8, minute: u8, interval_minutes: u32, repetitions: u32) -> SchedulePlan {
        SchedulePlan {
            start: ScheduleEvent::new(hour, minute),
            interval_minutes,
            repetitions,
        }
    }

    #[test]
    fn events_step_by_interval() {
        let events = build_events(&plan(6, 10, 10, 3)).unwrap();
        assert_eq!(
            events,
            vec![
                ScheduleEvent::new(6, 10),
                ScheduleEvent::new(6, 20),
                ScheduleEvent::new(6, 30)
            ]
        );
    }

    #[test]
    fn events_wrap_into_the_day() {
        let events = build_events(&plan(22, 0, 120, 3)).unwrap();
        assert_eq!(
            events,
            vec![
                ScheduleEvent::new(22, 0),
                ScheduleEvent::new(0, 0),
                ScheduleEvent::new(2, 0)
            ]
        );
    }

    #[test]
    fn rejects_invalid_plans() {
        assert!(matches!(
            build_events(&plan(8, 0, 0, 3)),
            Err(ScheduleError::ZeroInterval)
        ));
        assert!(matches!(
            build_events(&plan(8, 0, 30, 0)),
            Err(ScheduleError::ZeroRepetitions)
        ));
        assert!(matches!(
            build_events(&plan(8, 0, 60, 25)),
            Err(ScheduleError::ExceedsDay { .. })
        ));
    }

    #[test]
    fn commits_requested_plan() {
        let mut board = FakeBoard::accepting();
        let requested = plan(6, 0, 60, 12);

        let commit = commit(&mut board, requested, 3, &now());

        assert_eq!(commit.plan, requested);
        assert!(commit.failure.is_none());
        assert_eq!(commit.schedule.events.len(), 12);
        assert_eq!(commit.next_startup, board.next);
        assert_eq!(board.applied.len(), 1);
    }

    #[test]
    fn board_failure_commits_fallback() {
        let mut board = FakeBoard::rejecting(1);

        let commit = commit(&mut board, plan(6, 0, 60, 12), 3, &now());

        assert_eq!(commit.plan, SchedulePlan::FALLBACK);
        assert_eq!(commit.plan.start, ScheduleEvent::new(8, 0));
        assert_eq!(commit.plan.interval_minutes, 30);
        assert_eq!(commit.plan.repetitions, 8);
        assert!(matches!(commit.failure, Some(ScheduleError::Board(_))));
        assert_eq!(commit.next_startup, board.next);
        assert_eq!(board.applied.len(), 2);
        assert_eq!(board.applied[1].events.len(), 8);
    }

    #[test]
    fn invalid_plan_commits_fallback() {
        let mut board = FakeBoard::accepting();

        let commit = commit(&mut board, plan(6, 0, 0, 12), 3, &now());

        assert_eq!(commit.plan, SchedulePlan::FALLBACK);
        assert!(matches!(commit.failure, Some(ScheduleError::ZeroInterval)));
        assert_eq!(board.applied.len(), 1);
    }

    #[test]
    fn failed_fallback_still_yields_next_startup() {
        let mut board = FakeBoard::rejecting(2);

        let commit = commit(&mut board, plan(6, 0, 60, 12), 3, &now());

        assert_eq!(commit.plan, SchedulePlan::FALLBACK);
        // 10:17 local; the next fallback wake is 10:30.
        assert_eq!(
            commit.next_startup,
            "2024-03-12T10:30:00Z".parse::<Timestamp>().unwrap()
        );
    }

    #[test]
    fn next_occurrence_rolls_over_to_tomorrow() {
        let events = [ScheduleEvent::new(8, 0)];
        assert_eq!(
            next_occurrence(&events, &now()),
            "2024-03-13T08:00:00Z".parse::<Timestamp>().unwrap()
        );
    }

    #[test]
    fn next_occurrence_is_strictly_after_now() {
        let at_wake = "2024-03-12T08:00:00Z"
            .parse::<Timestamp>()
            .unwrap()
            .to_zoned(TimeZone::UTC);
        let events = [ScheduleEvent::new(8, 0), ScheduleEvent::new(8, 30)];
        assert_eq!(
            next_occurrence(&events, &at_wake),
            "2024-03-12T08:30:00Z".parse::<Timestamp>().unwrap()
        );
    }
}
