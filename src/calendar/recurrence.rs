use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::event::Happening;

/// How far `MonthlyNth` searches ahead for a month holding the ordinal.
const MONTH_SEARCH_LIMIT: u32 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceParseError {
    #[error("Recurrence text is ambiguous: {0}")]
    Ambiguous(String),
    #[error("Recurrence text not recognized: {0}")]
    Unrecognized(String),
    #[error("Every-other-week schedule has no anchor date: {0}")]
    MissingAnchor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nth {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Last,
}

impl Nth {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "first" | "1st" => Some(Nth::First),
            "second" | "2nd" => Some(Nth::Second),
            "third" | "3rd" => Some(Nth::Third),
            "fourth" | "4th" => Some(Nth::Fourth),
            "fifth" | "5th" => Some(Nth::Fifth),
            "last" => Some(Nth::Last),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Nth::First => "1st",
            Nth::Second => "2nd",
            Nth::Third => "3rd",
            Nth::Fourth => "4th",
            Nth::Fifth => "5th",
            Nth::Last => "Last",
        }
    }

    fn date_in_month(self, year: i32, month: u32, day: Weekday) -> Option<NaiveDate> {
        let n = match self {
            Nth::First => 1,
            Nth::Second => 2,
            Nth::Third => 3,
            Nth::Fourth => 4,
            Nth::Fifth => 5,
            Nth::Last => return last_weekday_of_month(year, month, day),
        };
        NaiveDate::from_weekday_of_month_opt(year, month, day, n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "freq", rename_all = "snake_case")]
pub enum RecurrenceRule {
    Once { date: NaiveDate },
    Daily,
    Weekly { days: Vec<Weekday> },
    EveryOtherWeek { day: Weekday, anchor: NaiveDate },
    MonthlyNth { ordinals: Vec<Nth>, day: Weekday },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Taken from structured columns.
    Explicit,
    /// Read out of free text, or a fallback after free text failed.
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Known {
        rule: RecurrenceRule,
        confidence: Confidence,
    },
    Unknown {
        reason: String,
    },
}

impl Schedule {
    pub fn rule(&self) -> Option<&RecurrenceRule> {
        match self {
            Schedule::Known { rule, .. } => Some(rule),
            Schedule::Unknown { .. } => None,
        }
    }

    pub fn confidence(&self) -> Option<Confidence> {
        match self {
            Schedule::Known { confidence, .. } => Some(*confidence),
            Schedule::Unknown { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Schedule::Known { rule, .. } => rule.to_string(),
            Schedule::Unknown { .. } => "Schedule unknown".to_string(),
        }
    }
}

impl RecurrenceRule {
    /// Sorts weekday and ordinal lists and drops repeats, so that rules
    /// describing the same dates compare equal.
    pub fn normalized(&self) -> Self {
        match self {
            RecurrenceRule::Weekly { days } => RecurrenceRule::Weekly {
                days: sorted_weekdays(days),
            },
            RecurrenceRule::MonthlyNth { ordinals, day } => {
                let mut ordinals = ordinals.clone();
                ordinals.sort();
                ordinals.dedup();
                RecurrenceRule::MonthlyNth { ordinals, day: *day }
            }
            other => other.clone(),
        }
    }

    pub fn next_on_or_after(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            RecurrenceRule::Once { date } => (*date >= from).then_some(*date),
            RecurrenceRule::Daily => Some(from),
            RecurrenceRule::Weekly { days } => days
                .iter()
                .filter_map(|day| next_weekday_on_or_after(from, *day))
                .min(),
            RecurrenceRule::EveryOtherWeek { day, anchor } => {
                let aligned = next_weekday_on_or_after(*anchor, *day)?;
                let candidate = next_weekday_on_or_after(from, *day)?;
                if (candidate - aligned).num_days().rem_euclid(14) == 0 {
                    Some(candidate)
                } else {
                    candidate.checked_add_days(Days::new(7))
                }
            }
            RecurrenceRule::MonthlyNth { ordinals, day } => {
                let month_start = from.with_day(1)?;
                (0..MONTH_SEARCH_LIMIT).find_map(|offset| {
                    let month = month_start.checked_add_months(Months::new(offset))?;
                    ordinals
                        .iter()
                        .filter_map(|nth| nth.date_in_month(month.year(), month.month(), *day))
                        .filter(|date| *date >= from)
                        .min()
                })
            }
        }
    }

    /// All matching dates in `start..=end`, ascending.
    pub fn dates_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut cursor = start;
        while let Some(date) = self.next_on_or_after(cursor) {
            if date > end {
                break;
            }
            dates.push(date);
            match date.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        dates
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceRule::Once { date } => write!(f, "Once on {}", date),
            RecurrenceRule::Daily => write!(f, "Daily"),
            RecurrenceRule::Weekly { days } => {
                let days = sorted_weekdays(days);
                if days == WEEKDAYS {
                    write!(f, "Every weekday")
                } else if days == WEEKEND {
                    write!(f, "Every weekend")
                } else if days.len() == 7 {
                    write!(f, "Daily")
                } else if let [day] = days.as_slice() {
                    write!(f, "Every {}", weekday_name(*day))
                } else {
                    let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                    write!(f, "Every {}", join_with_ampersand(&names))
                }
            }
            RecurrenceRule::EveryOtherWeek { day, .. } => {
                write!(f, "Every other {}", weekday_name(*day))
            }
            RecurrenceRule::MonthlyNth { ordinals, day } => {
                let mut ordinals = ordinals.clone();
                ordinals.sort();
                ordinals.dedup();
                let labels: Vec<String> = ordinals.iter().map(|n| n.label().to_string()).collect();
                write!(f, "{} {} of the month", join_with_ampersand(&labels), weekday_name(*day))
            }
        }
    }
}

const WEEKDAYS: [Weekday; 5] = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];
const WEEKEND: [Weekday; 2] = [Weekday::Sat, Weekday::Sun];

const WEEKDAY_NAMES: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

const AMBIGUITY_MARKERS: [&str; 16] = [
    "varies", "vary", "varying", "tba", "tbd", "irregular", "irregularly", "occasionally",
    "sometimes", "seasonal", "seasonally", "check", "call", "appointment", "except", "excluding",
];

const BIWEEKLY_MARKERS: [&str; 5] = ["biweekly", "fortnightly", "fortnight", "alternate", "alternating"];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Accepts full names, plurals and abbreviations of at least three letters.
pub fn parse_weekday(token: &str) -> Option<Weekday> {
    let token = token.trim().to_ascii_lowercase();
    if token == "weds" {
        return Some(Weekday::Wed);
    }
    if token.len() < 3 {
        return None;
    }
    WEEKDAY_NAMES.iter().find_map(|(name, day)| {
        let plural = format!("{}s", name);
        (name.starts_with(token.as_str()) || token == plural).then_some(*day)
    })
}

/// Reads a day-of-week column such as "Tuesday" or "Mon & Thu".
pub fn parse_weekday_list(text: &str) -> Option<Vec<Weekday>> {
    let days: Vec<Weekday> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(parse_weekday)
        .collect();
    (!days.is_empty()).then(|| sorted_weekdays(&days))
}

fn range_regex() -> &'static Regex {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    RANGE.get_or_init(|| {
        Regex::new(r"([a-z]+)\s*(?:-|–|—|\bto\b|\bthrough\b|\bthru\b)\s*([a-z]+)")
            .expect("weekday range pattern is valid")
    })
}

/// Turns free-text recurrence ("2nd & 4th Thursdays", "every other Friday")
/// into a rule. `anchor` pins the fortnight for every-other-week text.
pub fn parse_recurrence_text(
    text: &str,
    anchor: Option<NaiveDate>,
) -> Result<RecurrenceRule, RecurrenceParseError> {
    let lower = text.trim().to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |word: &str| tokens.contains(&word);

    if lower.contains('?') || AMBIGUITY_MARKERS.iter().any(|m| has(*m)) {
        return Err(RecurrenceParseError::Ambiguous(text.to_string()));
    }

    if has("daily")
        || has("nightly")
        || has("everyday")
        || lower.contains("every day")
        || lower.contains("every night")
    {
        return Ok(RecurrenceRule::Daily);
    }

    let mut days = Vec::new();
    for caps in range_regex().captures_iter(&lower) {
        if let (Some(from), Some(to)) = (parse_weekday(&caps[1]), parse_weekday(&caps[2])) {
            days.extend(weekday_range(from, to));
        }
    }
    for token in &tokens {
        match *token {
            "weekday" | "weekdays" => days.extend(WEEKDAYS),
            "weekend" | "weekends" => days.extend(WEEKEND),
            other => days.extend(parse_weekday(other)),
        }
    }
    let days = sorted_weekdays(&days);

    let mut ordinals: Vec<Nth> = tokens.iter().filter_map(|t| Nth::from_token(t)).collect();
    ordinals.sort();
    ordinals.dedup();

    let biweekly = BIWEEKLY_MARKERS.iter().any(|m| has(*m))
        || lower.contains("every other")
        || lower.contains("every two weeks")
        || lower.contains("every 2 weeks");
    let monthly = has("monthly") || has("month");

    if days.is_empty() {
        if monthly || biweekly || !ordinals.is_empty() || has("weekly") {
            return Err(RecurrenceParseError::Ambiguous(text.to_string()));
        }
        return Err(RecurrenceParseError::Unrecognized(text.to_string()));
    }

    if !ordinals.is_empty() {
        return match days.as_slice() {
            [day] => Ok(RecurrenceRule::MonthlyNth { ordinals, day: *day }),
            _ => Err(RecurrenceParseError::Ambiguous(text.to_string())),
        };
    }

    if biweekly {
        return match (days.as_slice(), anchor) {
            ([day], Some(anchor)) => Ok(RecurrenceRule::EveryOtherWeek { day: *day, anchor }),
            ([_], None) => Err(RecurrenceParseError::MissingAnchor(text.to_string())),
            _ => Err(RecurrenceParseError::Ambiguous(text.to_string())),
        };
    }

    if monthly {
        return Err(RecurrenceParseError::Ambiguous(text.to_string()));
    }

    Ok(RecurrenceRule::Weekly { days })
}

/// Decides which of a happening's schedule fields wins.
pub fn resolve_schedule(happening: &Happening) -> Schedule {
    if let Some(rule) = &happening.recurrence {
        return Schedule::Known {
            rule: rule.normalized(),
            confidence: Confidence::Explicit,
        };
    }

    let anchor = happening.series_start.or(happening.event_date);
    let mut text_failure = None;

    if let Some(text) = happening.recurrence_text.as_deref().filter(|t| !t.trim().is_empty()) {
        match parse_recurrence_text(text, anchor) {
            Ok(rule) => {
                return Schedule::Known {
                    rule: rule.normalized(),
                    confidence: Confidence::Inferred,
                };
            }
            Err(err) => {
                tracing::debug!("Happening {}: {}", happening.id, err);
                text_failure = Some(err);
            }
        }
    }

    let fallback_confidence = if text_failure.is_some() {
        Confidence::Inferred
    } else {
        Confidence::Explicit
    };

    if let Some(days) = happening.day_of_week.as_deref().and_then(parse_weekday_list) {
        return Schedule::Known {
            rule: RecurrenceRule::Weekly { days },
            confidence: fallback_confidence,
        };
    }

    if let Some(date) = happening.event_date {
        return Schedule::Known {
            rule: RecurrenceRule::Once { date },
            confidence: fallback_confidence,
        };
    }

    let reason = match text_failure {
        Some(err) => err.to_string(),
        None => "No recurrence, day of week or date given".to_string(),
    };
    Schedule::Unknown { reason }
}

fn next_weekday_on_or_after(from: NaiveDate, day: Weekday) -> Option<NaiveDate> {
    let offset = (7 + day.num_days_from_monday() - from.weekday().num_days_from_monday()) % 7;
    from.checked_add_days(Days::new(u64::from(offset)))
}

fn last_weekday_of_month(year: i32, month: u32, day: Weekday) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - day.num_days_from_monday()) % 7;
    last.checked_sub_days(Days::new(u64::from(back)))
}

fn weekday_range(from: Weekday, to: Weekday) -> Vec<Weekday> {
    let mut days = vec![from];
    let mut day = from;
    while day != to {
        day = day.succ();
        days.push(day);
    }
    days
}

fn sorted_weekdays(days: &[Weekday]) -> Vec<Weekday> {
    let mut days = days.to_vec();
    days.sort_by_key(|d| d.num_days_from_monday());
    days.dedup();
    days
}

fn join_with_ampersand(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} & {}", init.join(", "), last),
    }
}
