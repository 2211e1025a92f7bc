//! Classification of expanded occurrences into the buckets listings render:
//! active, cancelled and schedule unknown. Also groups occurrences back into
//! one row per series.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::dedup::{dedupe_by_title, normalize_title};
use crate::calendar::event::Happening;
use crate::calendar::occurrence::{DateWindow, Occurrence, expand, next_active_occurrence, sort_occurrences};
use crate::calendar::overrides::{OccurrenceOverride, OverrideIndex, OverrideKey, apply_override};
use crate::calendar::recurrence::{Confidence, RecurrenceRule, Schedule, resolve_schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgendaOptions {
    pub dedupe: bool,
}

impl Default for AgendaOptions {
    fn default() -> Self {
        Self { dedupe: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnscheduledHappening {
    pub happening_id: String,
    pub title: String,
    pub venue: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agenda {
    pub window: DateWindow,
    pub active: Vec<Occurrence>,
    pub cancelled: Vec<Occurrence>,
    pub unknown: Vec<UnscheduledHappening>,
    /// Overrides inside the window that matched no occurrence.
    pub orphaned_overrides: Vec<OverrideKey>,
}

impl Agenda {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.cancelled.is_empty() && self.unknown.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesRow {
    pub happening_id: String,
    pub title: String,
    pub venue: Option<String>,
    pub schedule_label: String,
    pub confidence: Option<Confidence>,
    pub is_recurring: bool,
    /// Next active occurrence, looked up past the window end when nothing
    /// in the window is active.
    pub next: Option<Occurrence>,
    pub upcoming: Vec<NaiveDate>,
    pub cancelled_dates: Vec<NaiveDate>,
}

struct Prepared {
    happenings: Vec<Happening>,
    overrides: OverrideIndex,
}

fn prepare(happenings: &[Happening], overrides: &[OccurrenceOverride], options: AgendaOptions) -> Prepared {
    let index = OverrideIndex::build(overrides.iter().cloned());
    if !options.dedupe {
        let mut happenings = happenings.to_vec();
        happenings.sort_by(|a, b| a.id.cmp(&b.id));
        return Prepared { happenings, overrides: index };
    }
    let outcome = dedupe_by_title(happenings.to_vec());
    Prepared {
        happenings: outcome.kept,
        overrides: index.remap(&outcome.aliases),
    }
}

fn merged_occurrences(
    happening: &Happening,
    schedule: &Schedule,
    overrides: &OverrideIndex,
    window: &DateWindow,
) -> Vec<Occurrence> {
    expand(happening, schedule, window)
        .into_iter()
        .map(|occurrence| match overrides.get(&occurrence.happening_id, occurrence.date) {
            Some(item) => apply_override(&occurrence, item),
            None => occurrence,
        })
        .collect()
}

fn unscheduled(happening: &Happening, reason: &str) -> UnscheduledHappening {
    UnscheduledHappening {
        happening_id: happening.id.clone(),
        title: happening.title.clone(),
        venue: happening.venue.clone(),
        reason: reason.to_string(),
    }
}

pub fn build_agenda(
    happenings: &[Happening],
    overrides: &[OccurrenceOverride],
    window: &DateWindow,
    options: AgendaOptions,
) -> Agenda {
    let prepared = prepare(happenings, overrides, options);

    let mut active = Vec::new();
    let mut cancelled = Vec::new();
    let mut unknown = Vec::new();
    let mut matched = BTreeSet::new();

    for happening in &prepared.happenings {
        let schedule = resolve_schedule(happening);
        if let Schedule::Unknown { reason } = &schedule {
            unknown.push(unscheduled(happening, reason));
            continue;
        }
        for occurrence in merged_occurrences(happening, &schedule, &prepared.overrides, window) {
            matched.insert(OverrideKey {
                happening_id: occurrence.happening_id.clone(),
                date: occurrence.date,
            });
            if occurrence.is_cancelled() {
                cancelled.push(occurrence);
            } else {
                active.push(occurrence);
            }
        }
    }

    let mut orphaned_overrides: Vec<OverrideKey> = prepared
        .overrides
        .keys()
        .filter(|key| window.contains(key.date) && !matched.contains(*key))
        .cloned()
        .collect();
    orphaned_overrides.sort();
    for key in &orphaned_overrides {
        tracing::debug!("Override for {} on {} matches no occurrence", key.happening_id, key.date);
    }

    sort_occurrences(&mut active);
    sort_occurrences(&mut cancelled);
    unknown.sort_by(|a, b| {
        normalize_title(&a.title)
            .cmp(&normalize_title(&b.title))
            .then_with(|| a.happening_id.cmp(&b.happening_id))
    });

    tracing::info!(
        "Agenda {}..={}: {} active, {} cancelled, {} unknown",
        window.start,
        window.end,
        active.len(),
        cancelled.len(),
        unknown.len()
    );

    Agenda {
        window: *window,
        active,
        cancelled,
        unknown,
        orphaned_overrides,
    }
}

/// One row per happening, for listing screens that show a series once
/// rather than every date.
pub fn build_series_view(
    happenings: &[Happening],
    overrides: &[OccurrenceOverride],
    window: &DateWindow,
    options: AgendaOptions,
) -> Vec<SeriesRow> {
    let prepared = prepare(happenings, overrides, options);
    let mut rows = Vec::new();

    for happening in &prepared.happenings {
        let schedule = resolve_schedule(happening);
        let is_recurring = !matches!(schedule.rule(), None | Some(RecurrenceRule::Once { .. }));
        let occurrences = merged_occurrences(happening, &schedule, &prepared.overrides, window);

        let (cancelled, active): (Vec<Occurrence>, Vec<Occurrence>) =
            occurrences.into_iter().partition(Occurrence::is_cancelled);

        let next = match active.first() {
            Some(first) => Some(first.clone()),
            None => next_active_occurrence(happening, &prepared.overrides, window.start).and_then(|date| {
                let day = DateWindow::new(date, date).ok()?;
                merged_occurrences(happening, &schedule, &prepared.overrides, &day)
                    .into_iter()
                    .next()
            }),
        };

        if matches!(schedule, Schedule::Known { .. }) && cancelled.is_empty() && next.is_none() {
            continue;
        }

        rows.push(SeriesRow {
            happening_id: happening.id.clone(),
            title: happening.title.clone(),
            venue: happening.venue.clone(),
            schedule_label: schedule.label(),
            confidence: schedule.confidence(),
            is_recurring,
            upcoming: active.iter().map(|o| o.date).collect(),
            cancelled_dates: cancelled.iter().map(|o| o.date).collect(),
            next,
        });
    }

    rows.sort_by(|a, b| {
        let key = |row: &SeriesRow| {
            (
                row.next.is_none(),
                row.next.as_ref().map(|o| (o.date, o.start_time.is_none(), o.start_time)),
                normalize_title(&row.title),
                row.happening_id.clone(),
            )
        };
        key(a).cmp(&key(b))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::event::HappeningStatus;
    use crate::calendar::occurrence::OccurrenceStatus;
    use chrono::{DateTime, TimeZone, Utc, Weekday};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    // Two weeks starting Monday 2026-10-19.
    fn fortnight() -> DateWindow {
        DateWindow::new(date(2026, 10, 19), date(2026, 11, 1)).unwrap()
    }

    fn sample_happenings() -> Vec<Happening> {
        vec![
            Happening::new("quiz", "Pub Quiz")
                .with_venue("The Anchor")
                .with_rule(RecurrenceRule::Weekly { days: vec![Weekday::Tue] })
                .with_times("8pm", None),
            Happening::new("quiz-copy", "The Pub Quiz").with_recurrence_text("Tuesdays"),
            Happening::new("mic", "Open Mic")
                .with_venue("Crown Inn")
                .with_recurrence_text("Thursdays")
                .with_times("7:30pm", None),
            Happening::new("jam", "Folk Jam").with_recurrence_text("varies, check socials"),
            Happening::new("gala", "Winter Gala").on_date(date(2026, 10, 24)),
        ]
    }

    fn sample_overrides() -> Vec<OccurrenceOverride> {
        vec![
            OccurrenceOverride::new("o-cancel", "quiz", date(2026, 10, 27))
                .cancel()
                .with_notes("Private booking")
                .updated(at(100)),
            OccurrenceOverride::new("o-move", "mic", date(2026, 10, 22))
                .with_times(Some("9pm"), None)
                .with_venue("Crown Inn Garden")
                .updated(at(100)),
            OccurrenceOverride::new("o-orphan", "mic", date(2026, 10, 23)).cancel().updated(at(100)),
        ]
    }

    #[test]
    fn classifies_occurrences_into_buckets() {
        let agenda = build_agenda(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());

        let active: Vec<(&str, NaiveDate)> =
            agenda.active.iter().map(|o| (o.happening_id.as_str(), o.date)).collect();
        assert_eq!(
            active,
            vec![
                ("quiz", date(2026, 10, 20)),
                ("mic", date(2026, 10, 22)),
                ("gala", date(2026, 10, 24)),
                ("mic", date(2026, 10, 29)),
            ]
        );

        assert_eq!(agenda.cancelled.len(), 1);
        assert_eq!(agenda.cancelled[0].happening_id, "quiz");
        assert_eq!(agenda.cancelled[0].notes.as_deref(), Some("Private booking"));

        assert_eq!(agenda.unknown.len(), 1);
        assert_eq!(agenda.unknown[0].happening_id, "jam");
    }

    #[test]
    fn applies_reschedule_and_venue_swap() {
        let agenda = build_agenda(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());

        let moved = agenda
            .active
            .iter()
            .find(|o| o.happening_id == "mic" && o.date == date(2026, 10, 22))
            .unwrap();
        assert_eq!(moved.start_time, chrono::NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(moved.venue.as_deref(), Some("Crown Inn Garden"));
        assert_eq!(moved.confidence, Confidence::Inferred);
        assert_eq!(moved.override_id.as_deref(), Some("o-move"));
    }

    #[test]
    fn reports_overrides_matching_no_occurrence() {
        let agenda = build_agenda(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());

        assert_eq!(
            agenda.orphaned_overrides,
            vec![OverrideKey { happening_id: "mic".to_string(), date: date(2026, 10, 23) }]
        );
    }

    #[test]
    fn overrides_of_merged_duplicates_follow_the_survivor() {
        let overrides = vec![
            OccurrenceOverride::new("o-dup", "quiz-copy", date(2026, 10, 20)).cancel().updated(at(50)),
        ];

        let agenda = build_agenda(&sample_happenings(), &overrides, &fortnight(), AgendaOptions::default());

        assert!(agenda.cancelled.iter().any(|o| o.happening_id == "quiz" && o.date == date(2026, 10, 20)));
        assert!(agenda.orphaned_overrides.is_empty());
    }

    #[test]
    fn without_dedupe_duplicates_both_appear() {
        let agenda = build_agenda(&sample_happenings(), &[], &fortnight(), AgendaOptions { dedupe: false });

        let on_tuesday: Vec<&str> = agenda
            .active
            .iter()
            .filter(|o| o.date == date(2026, 10, 20))
            .map(|o| o.happening_id.as_str())
            .collect();
        assert_eq!(on_tuesday, vec!["quiz", "quiz-copy"]);
    }

    #[test]
    fn cancelled_series_lands_in_cancelled_bucket() {
        let mut happening = Happening::new("closed", "Swing Night").with_day_of_week("Wednesday");
        happening.status = HappeningStatus::Cancelled;

        let agenda = build_agenda(&[happening], &[], &fortnight(), AgendaOptions::default());

        assert!(agenda.active.is_empty());
        assert_eq!(agenda.cancelled.len(), 2);
        assert!(agenda.cancelled.iter().all(|o| o.status == OccurrenceStatus::Cancelled));
    }

    #[test]
    fn empty_input_gives_empty_agenda() {
        let agenda = build_agenda(&[], &[], &fortnight(), AgendaOptions::default());

        assert!(agenda.is_empty());
        assert!(agenda.orphaned_overrides.is_empty());
    }

    #[test]
    fn series_view_groups_by_happening() {
        let rows = build_series_view(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());

        let ids: Vec<&str> = rows.iter().map(|r| r.happening_id.as_str()).collect();
        assert_eq!(ids, vec!["quiz", "mic", "gala", "jam"]);

        let quiz = &rows[0];
        assert_eq!(quiz.schedule_label, "Every Tuesday");
        assert!(quiz.is_recurring);
        assert_eq!(quiz.upcoming, vec![date(2026, 10, 20)]);
        assert_eq!(quiz.cancelled_dates, vec![date(2026, 10, 27)]);
        assert_eq!(quiz.confidence, Some(Confidence::Explicit));

        let gala = &rows[2];
        assert!(!gala.is_recurring);
        assert_eq!(gala.schedule_label, "Once on 2026-10-24");

        let jam = &rows[3];
        assert_eq!(jam.schedule_label, "Schedule unknown");
        assert_eq!(jam.confidence, None);
        assert!(jam.next.is_none());
    }

    #[test]
    fn series_view_drops_finished_one_time_events() {
        let happenings = vec![Happening::new("past", "Summer Fete").on_date(date(2026, 7, 4))];

        let rows = build_series_view(&happenings, &[], &fortnight(), AgendaOptions::default());

        assert!(rows.is_empty());
    }

    #[test]
    fn series_view_keeps_recurring_series_with_nothing_in_window() {
        let happenings = vec![Happening::new("late", "Winter Market")
            .with_day_of_week("Saturday")
            .between(Some(date(2026, 12, 1)), None)];

        let rows = build_series_view(&happenings, &[], &fortnight(), AgendaOptions::default());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].next.as_ref().map(|o| o.date), Some(date(2026, 12, 5)));
        assert!(rows[0].upcoming.is_empty());
    }

    #[test]
    fn series_view_looks_past_window_when_every_date_is_cancelled() {
        let overrides = vec![
            OccurrenceOverride::new("c1", "quiz", date(2026, 10, 20)).cancel().updated(at(10)),
            OccurrenceOverride::new("c2", "quiz", date(2026, 10, 27)).cancel().updated(at(10)),
            OccurrenceOverride::new("late", "quiz", date(2026, 11, 3)).with_notes("Halloween rematch").updated(at(10)),
        ];

        let rows = build_series_view(&sample_happenings()[..1], &overrides, &fortnight(), AgendaOptions::default());

        let quiz = &rows[0];
        assert!(quiz.upcoming.is_empty());
        assert_eq!(quiz.cancelled_dates, vec![date(2026, 10, 20), date(2026, 10, 27)]);
        let next = quiz.next.as_ref().unwrap();
        assert_eq!(next.date, date(2026, 11, 3));
        assert_eq!(next.notes.as_deref(), Some("Halloween rematch"));
    }

    #[test]
    fn distinct_series_sharing_a_title_all_appear() {
        let happenings = vec![
            Happening::new("a", "Open Mic")
                .with_venue("The Anchor")
                .with_rule(RecurrenceRule::Weekly { days: vec![Weekday::Tue] }),
            Happening::new("b", "Open Mic")
                .with_venue("The Anchor")
                .with_rule(RecurrenceRule::Weekly { days: vec![Weekday::Thu] }),
            Happening::new("c", "Album Launch").with_venue("The Anchor").on_date(date(2026, 10, 20)),
            Happening::new("d", "Album Launch").with_venue("The Anchor").on_date(date(2026, 10, 27)),
        ];

        let agenda = build_agenda(&happenings, &[], &fortnight(), AgendaOptions::default());

        let active: Vec<(&str, NaiveDate)> =
            agenda.active.iter().map(|o| (o.happening_id.as_str(), o.date)).collect();
        assert_eq!(
            active,
            vec![
                ("c", date(2026, 10, 20)),
                ("a", date(2026, 10, 20)),
                ("b", date(2026, 10, 22)),
                ("d", date(2026, 10, 27)),
                ("a", date(2026, 10, 27)),
                ("b", date(2026, 10, 29)),
            ]
        );
    }

    proptest! {
        #[test]
        fn agenda_is_independent_of_input_order(seed in 0usize..120) {
            let mut happenings = sample_happenings();
            let mut overrides = sample_overrides();
            let len = happenings.len();
            happenings.rotate_left(seed % len);
            if seed % 2 == 0 {
                happenings.reverse();
                overrides.reverse();
            }

            let expected = build_agenda(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());
            let actual = build_agenda(&happenings, &overrides, &fortnight(), AgendaOptions::default());

            prop_assert_eq!(expected, actual);
        }

        #[test]
        fn rebuilding_with_duplicated_overrides_is_idempotent(copies in 1usize..4) {
            let mut overrides = Vec::new();
            for _ in 0..copies {
                overrides.extend(sample_overrides());
            }

            let once = build_agenda(&sample_happenings(), &sample_overrides(), &fortnight(), AgendaOptions::default());
            let repeated = build_agenda(&sample_happenings(), &overrides, &fortnight(), AgendaOptions::default());

            prop_assert_eq!(once, repeated);
        }
    }
}
