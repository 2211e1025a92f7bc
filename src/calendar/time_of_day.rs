use std::sync::OnceLock;

use chrono::{NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[default]
    #[serde(rename = "24h")]
    TwentyFourHour,
    #[serde(rename = "12h")]
    TwelveHour,
}

fn clock_regex() -> &'static Regex {
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    CLOCK.get_or_init(|| {
        Regex::new(r"^(\d{1,2})(?:[:.](\d{2}))?\s*(a\.?\s*m\.?|p\.?\s*m\.?)?$")
            .expect("clock pattern is valid")
    })
}

/// Parses the loose time strings admins type into event forms.
///
/// A bare hour without a meridiem ("7") is rejected since it cannot be told
/// apart from a morning or evening start.
pub fn parse_time_of_day(input: &str) -> Option<NaiveTime> {
    let text = input.trim().to_ascii_lowercase();
    match text.as_str() {
        "" => return None,
        "noon" | "midday" => return NaiveTime::from_hms_opt(12, 0, 0),
        "midnight" => return NaiveTime::from_hms_opt(0, 0, 0),
        _ => {}
    }

    let caps = clock_regex().captures(&text)?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let meridiem = caps.get(3).map(|m| m.as_str().starts_with('p'));

    let hour = match meridiem {
        Some(is_pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            (hour % 12) + if is_pm { 12 } else { 0 }
        }
        None => {
            caps.get(2)?;
            hour
        }
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn format_time_of_day(time: NaiveTime, format: TimeFormat) -> String {
    match format {
        TimeFormat::TwentyFourHour => time.format("%H:%M").to_string(),
        TimeFormat::TwelveHour => {
            let (is_pm, hour) = time.hour12();
            let suffix = if is_pm { "pm" } else { "am" };
            if time.minute() == 0 {
                format!("{}{}", hour, suffix)
            } else {
                format!("{}:{:02}{}", hour, time.minute(), suffix)
            }
        }
    }
}
