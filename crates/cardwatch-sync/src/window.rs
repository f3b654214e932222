//! Result windows: when, relative to an event's resolved start, a re-fetch
//! of that event is due.

use cardwatch_core::{Event, EventCategory};
use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::config::WindowTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("event has no scheduled date")]
    MissingDate,
    #[error("event has no scheduled start time")]
    MissingStartTime,
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("{date} {time} does not exist in {tz}")]
    NonexistentLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        tz: String,
    },
}

/// Combine a civil date and clock time in `tz` into an instant, using the
/// offset in force on that date. A repeated (fall-back) local time resolves
/// to the later of its two instants. A skipped (spring-forward) local time
/// is read with the offset in force just before the gap, so 02:30 on a
/// New York spring-forward day lands at 07:30 UTC.
pub fn resolve_start_instant(
    date: NaiveDate,
    time: NaiveTime,
    tz: Tz,
) -> Result<DateTime<Utc>, WindowError> {
    let local = date.and_time(time);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => Ok(at.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => Ok(first.max(second).with_timezone(&Utc)),
        LocalResult::None => local
            .checked_sub_days(Days::new(1))
            .map(|day_before| tz.offset_from_utc_datetime(&day_before).fix())
            .and_then(|before| before.from_local_datetime(&local).single())
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| WindowError::NonexistentLocalTime {
                date,
                time,
                tz: tz.name().to_string(),
            }),
    }
}

pub fn event_start_instant(event: &Event) -> Result<DateTime<Utc>, WindowError> {
    let date = event.date.ok_or(WindowError::MissingDate)?;
    let time = event.start_time.ok_or(WindowError::MissingStartTime)?;
    let tz: Tz = event
        .timezone
        .parse()
        .map_err(|_| WindowError::UnknownTimezone(event.timezone.clone()))?;
    resolve_start_instant(date, time, tz)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: u8,
    pub at: DateTime<Utc>,
}

pub fn windows_for(category: EventCategory, start: DateTime<Utc>, table: &WindowTable) -> Vec<Window> {
    let offsets = match category {
        EventCategory::Numbered => &table.numbered,
        EventCategory::FightNight => &table.fight_night,
    };
    offsets
        .iter()
        .zip(0u8..)
        .map(|(offset, index)| Window {
            index,
            at: start + *offset,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NoWindowDue,
    WindowDue(Window),
    WindowFired(Window),
}

/// First unfired window whose instant has passed, if any. At most one window
/// is ever reported, so a tick fires at most once per event.
pub fn due_window(event: &Event, windows: &[Window], now: DateTime<Utc>) -> Option<Window> {
    windows
        .iter()
        .find(|w| !event.has_fired(w.index) && w.at <= now)
        .copied()
}

pub fn window_state(event: &Event, windows: &[Window], now: DateTime<Utc>) -> WindowState {
    match due_window(event, windows, now) {
        Some(window) => WindowState::WindowDue(window),
        None => WindowState::NoWindowDue,
    }
}
