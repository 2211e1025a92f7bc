use chrono::{Days, NaiveDateTime};
use icalendar::{Calendar, Component, Event as IcalEvent, EventLike, EventStatus};

use crate::calendar::{Agenda, Occurrence};

/// Renders the agenda's active and cancelled occurrences as an iCalendar
/// feed. Times are floating since listings are venue-local.
pub fn agenda_to_ics(agenda: &Agenda) -> String {
    let mut calendar = Calendar::new();

    for occurrence in agenda.active.iter().chain(agenda.cancelled.iter()) {
        calendar.push(occurrence_to_event(occurrence));
    }

    calendar.to_string()
}

pub fn occurrence_uid(occurrence: &Occurrence) -> String {
    format!("{}-{}@happenings", occurrence.happening_id, occurrence.date.format("%Y%m%d"))
}

fn occurrence_to_event(occurrence: &Occurrence) -> IcalEvent {
    let mut event = IcalEvent::new();
    event.summary(&occurrence.title).uid(&occurrence_uid(occurrence));

    match occurrence.start_time {
        Some(start_time) => {
            let start = occurrence.date.and_time(start_time);
            event.starts(start);
            if let Some(end) = occurrence.end_time.and_then(|end_time| end_after(start, end_time)) {
                event.ends(end);
            }
        }
        None => {
            event.all_day(occurrence.date);
        }
    }

    if let Some(venue) = &occurrence.venue {
        event.location(venue);
    }
    if let Some(notes) = &occurrence.notes {
        event.description(notes);
    }
    if occurrence.is_cancelled() {
        event.status(EventStatus::Cancelled);
    } else {
        event.status(EventStatus::Confirmed);
    }

    event.done()
}

/// An end time at or before the start runs past midnight.
fn end_after(start: NaiveDateTime, end_time: chrono::NaiveTime) -> Option<NaiveDateTime> {
    let end = start.date().and_time(end_time);
    if end > start {
        Some(end)
    } else {
        end.checked_add_days(Days::new(1))
    }
}
