use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::calendar::event::Happening;
use crate::calendar::recurrence::{Confidence, RecurrenceRule, Schedule, resolve_schedule};

/// Lowercased title with punctuation dropped, `&` spelled out and a leading
/// "the" removed. Two titles naming the same event normalize equal.
pub fn normalize_title(title: &str) -> String {
    let spaced = title.to_lowercase().replace('&', " and ");
    let cleaned: String = spaced
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let words = match words.as_slice() {
        ["the", rest @ ..] if !rest.is_empty() => rest,
        all => all,
    };
    words.join(" ")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// Surviving records, ordered by id.
    pub kept: Vec<Happening>,
    /// Merged-away id to surviving id.
    pub aliases: BTreeMap<String, String>,
}

pub fn dedupe_by_title(happenings: Vec<Happening>) -> DedupOutcome {
    let mut sorted = happenings;
    sorted.sort_by(|a, b| {
        a.id.cmp(&b.id)
            .then(a.updated_at.cmp(&b.updated_at))
            .then(a.title.cmp(&b.title))
    });

    let mut groups: Vec<(String, Vec<(Happening, Schedule)>)> = Vec::new();
    for happening in sorted {
        let title = normalize_title(&happening.title);
        let schedule = resolve_schedule(&happening);
        let slot = groups.iter_mut().find(|(key, members)| {
            *key == title
                && members.iter().all(|(m, other)| {
                    venues_compatible(m, &happening) && schedules_compatible(other, &schedule)
                })
        });
        match slot {
            Some((_, members)) => members.push((happening, schedule)),
            None => groups.push((title, vec![(happening, schedule)])),
        }
    }

    let mut outcome = DedupOutcome::default();
    for (_, members) in groups {
        let members = members.into_iter().map(|(happening, _)| happening).collect();
        let (survivor, aliases) = merge_group(members);
        outcome.aliases.extend(aliases);
        outcome.kept.push(survivor);
    }
    outcome.kept.sort_by(|a, b| a.id.cmp(&b.id));

    if !outcome.aliases.is_empty() {
        tracing::info!("Merged {} duplicate happenings by title", outcome.aliases.len());
    }
    outcome
}

fn venues_compatible(a: &Happening, b: &Happening) -> bool {
    match (a.venue.as_deref(), b.venue.as_deref()) {
        (Some(x), Some(y)) => normalize_title(x) == normalize_title(y),
        _ => true,
    }
}

/// Records describe the same series when their rules agree, when either
/// schedule is unknown, or when a one-off date falls on the other's rule.
fn schedules_compatible(a: &Schedule, b: &Schedule) -> bool {
    match (a.rule(), b.rule()) {
        (Some(x), Some(y)) => {
            x.normalized() == y.normalized() || once_on_rule(x, y) || once_on_rule(y, x)
        }
        _ => true,
    }
}

fn once_on_rule(once: &RecurrenceRule, rule: &RecurrenceRule) -> bool {
    match once {
        RecurrenceRule::Once { date } => rule.next_on_or_after(*date) == Some(*date),
        _ => false,
    }
}

type SurvivorRank = (bool, u8, bool, bool, bool, DateTime<Utc>, Reverse<String>);

fn survivor_rank(happening: &Happening) -> SurvivorRank {
    let schedule = resolve_schedule(happening);
    let schedule_rank = match schedule {
        Schedule::Known { confidence: Confidence::Explicit, .. } => 2,
        Schedule::Known { confidence: Confidence::Inferred, .. } => 1,
        Schedule::Unknown { .. } => 0,
    };
    let recurring = matches!(
        schedule.rule(),
        Some(rule) if !matches!(rule, RecurrenceRule::Once { .. })
    );
    (
        !happening.is_cancelled(),
        schedule_rank,
        recurring,
        happening.start_time_of_day().is_some(),
        happening.venue.is_some(),
        happening.updated_at,
        Reverse(happening.id.clone()),
    )
}

fn merge_group(members: Vec<Happening>) -> (Happening, Vec<(String, String)>) {
    let best = members
        .iter()
        .enumerate()
        .max_by_key(|(_, h)| survivor_rank(h))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut others = members;
    let mut survivor = others.remove(best);

    for other in &others {
        tracing::debug!("Happening {} duplicates {} ({:?})", other.id, survivor.id, survivor.title);
        fill_missing(&mut survivor.venue, &other.venue);
        fill_missing(&mut survivor.description, &other.description);
        if survivor.start_time_of_day().is_none() && other.start_time_of_day().is_some() {
            survivor.start_time = other.start_time.clone();
            survivor.end_time = other.end_time.clone();
        }
    }

    let aliases = others
        .into_iter()
        .map(|other| (other.id, survivor.id.clone()))
        .collect();
    (survivor, aliases)
}

fn fill_missing(target: &mut Option<String>, source: &Option<String>) {
    if target.as_deref().is_none_or(|t| t.trim().is_empty()) && source.is_some() {
        *target = source.clone();
    }
}
