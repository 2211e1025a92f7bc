use std::{
    env,
    io::{self, Write},
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use happenings::{
    calendar::{
        Agenda, AgendaOptions, Confidence, DateWindow, Occurrence, OccurrenceOverride, OverrideIndex, SeriesRow,
        build_agenda, build_series_view, format_time_of_day, next_active_occurrence,
    },
    export::agenda_to_ics,
    storage::{Config, Feed, Store, config::DisplayConfig},
};

#[derive(Debug, Parser)]
#[command(name = "happenings")]
#[command(version)]
#[command(about = "Expand recurring happenings and their per-date overrides into listings")]
pub struct Cli {
    #[arg(long, env = "HAPPENINGS_DB", help = "Path to the SQLite store; defaults to the configured one.")]
    pub db: Option<PathBuf>,

    #[arg(long, env = "HAPPENINGS_CONFIG", help = "Path to config.toml.")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Load happenings and overrides from a JSON feed.")]
    Import { file: PathBuf },
    #[command(about = "Write every stored record to a JSON feed.")]
    Export { file: PathBuf },
    #[command(about = "List dated occurrences in a window.")]
    Agenda(AgendaArgs),
    #[command(about = "List one row per series with its next date.")]
    Series(WindowArgs),
    #[command(about = "Show the next active date of one happening.")]
    Next {
        id: String,
        #[arg(long, value_parser = parse_date_arg)]
        from: Option<NaiveDate>,
    },
    #[command(about = "Cancel a single occurrence.")]
    Cancel {
        id: String,
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
        #[arg(long)]
        note: Option<String>,
    },
    #[command(about = "Delete a happening and its overrides.")]
    Remove { id: String },
    #[command(about = "Reschedule, move or annotate a single occurrence.")]
    Override(OverrideArgs),
    #[command(about = "Export the window as an iCalendar file.")]
    Ics {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, help = "Write to this file instead of stdout.")]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct WindowArgs {
    #[arg(long, value_parser = parse_date_arg, help = "First day of the window (YYYY-MM-DD); defaults to today.")]
    pub from: Option<NaiveDate>,
    #[arg(long, help = "Days after --from to include; defaults to the configured lookahead.")]
    pub days: Option<u32>,
    #[arg(long, help = "Keep records whose titles look like duplicates.")]
    pub no_dedupe: bool,
}

#[derive(Debug, Args)]
pub struct AgendaArgs {
    #[command(flatten)]
    pub window: WindowArgs,
    #[arg(long, help = "Print the agenda as JSON.")]
    pub json: bool,
    #[arg(long, env = "COLUMNS", help = "Truncate agenda lines to this many columns.")]
    pub width: Option<usize>,
}

#[derive(Debug, Args)]
pub struct OverrideArgs {
    pub id: String,
    #[arg(value_parser = parse_date_arg)]
    pub date: NaiveDate,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub venue: Option<String>,
    #[arg(long)]
    pub note: Option<String>,
}

pub fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD.", value))
}

pub fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_or_create_at(path),
        None => Config::load_or_create(),
    }
    .context("loading config")?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.storage.database.clone());
    let mut store = Store::open(&db_path)
        .with_context(|| format!("opening store at {}", db_path.display()))?;

    match cli.command {
        Commands::Import { file } => {
            let feed = Feed::load(&file).with_context(|| format!("reading {}", file.display()))?;
            let summary = feed.import_into(&store)?;
            println!(
                "Imported {} happenings and {} overrides.",
                summary.happenings, summary.overrides
            );
        }
        Commands::Export { file } => {
            let feed = Feed::from_store(&store)?;
            feed.save(&file).with_context(|| format!("writing {}", file.display()))?;
            println!(
                "Exported {} happenings and {} overrides.",
                feed.happenings.len(),
                feed.overrides.len()
            );
        }
        Commands::Agenda(args) => {
            let agenda = load_agenda(&store, &config, &args.window)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&agenda)?);
            } else {
                display_with_pager(&format_agenda_text(&agenda, &config.display, args.width.unwrap_or(0)))?;
            }
        }
        Commands::Series(window) => {
            let range = resolve_window(&window, &config)?;
            let rows = build_series_view(
                &store.list_happenings()?,
                &store.list_overrides()?,
                &range,
                agenda_options(&window, &config),
            );
            display_with_pager(&format_series_text(&rows, &config.display))?;
        }
        Commands::Next { id, from } => {
            let happening = store
                .load_happening(&id)?
                .with_context(|| format!("no happening with id {}", id))?;
            let overrides = OverrideIndex::build(store.overrides_for(&id)?);
            let from = from.unwrap_or_else(|| Local::now().date_naive());
            match next_active_occurrence(&happening, &overrides, from) {
                Some(date) => println!("{}: {}", happening.title, date.format(&config.display.date_format)),
                None => println!("{}: no upcoming date", happening.title),
            }
        }
        Commands::Cancel { id, date, note } => {
            ensure_happening(&store, &id)?;
            let mut item = OccurrenceOverride::new(Uuid::new_v4().to_string(), id, date)
                .cancel()
                .updated(Utc::now());
            item.notes = note;
            store.upsert_override(&item)?;
            println!("Cancelled {} on {} ({})", item.happening_id, item.date, item.id);
        }
        Commands::Remove { id } => {
            ensure_happening(&store, &id)?;
            store.delete_happening(&id)?;
            println!("Removed {}", id);
        }
        Commands::Override(args) => {
            ensure_happening(&store, &args.id)?;
            if args.start.is_none() && args.end.is_none() && args.venue.is_none() && args.note.is_none() {
                bail!("nothing to override: pass --start, --end, --venue or --note");
            }
            let item = OccurrenceOverride {
                start_time: args.start,
                end_time: args.end,
                venue: args.venue,
                notes: args.note,
                ..OccurrenceOverride::new(Uuid::new_v4().to_string(), args.id, args.date).updated(Utc::now())
            };
            store.upsert_override(&item)?;
            println!("Saved override {} for {} on {}", item.id, item.happening_id, item.date);
        }
        Commands::Ics { window, out } => {
            let agenda = load_agenda(&store, &config, &window)?;
            let ics = agenda_to_ics(&agenda);
            match out {
                Some(path) => {
                    std::fs::write(&path, ics).with_context(|| format!("writing {}", path.display()))?;
                    println!("Wrote {} events to {}", agenda.active.len() + agenda.cancelled.len(), path.display());
                }
                None => print!("{}", ics),
            }
        }
    }

    Ok(())
}

fn ensure_happening(store: &Store, id: &str) -> Result<()> {
    if store.load_happening(id)?.is_none() {
        bail!("no happening with id {}", id);
    }
    Ok(())
}

fn resolve_window(args: &WindowArgs, config: &Config) -> Result<DateWindow> {
    let start = args.from.unwrap_or_else(|| Local::now().date_naive());
    let days = args.days.unwrap_or(config.window.lookahead_days);
    Ok(DateWindow::starting(start, days)?)
}

fn agenda_options(args: &WindowArgs, config: &Config) -> AgendaOptions {
    AgendaOptions {
        dedupe: config.dedup.enabled && !args.no_dedupe,
    }
}

fn load_agenda(store: &Store, config: &Config, args: &WindowArgs) -> Result<Agenda> {
    let window = resolve_window(args, config)?;
    Ok(build_agenda(
        &store.list_happenings()?,
        &store.list_overrides()?,
        &window,
        agenda_options(args, config),
    ))
}

/// `width` of 0 leaves lines untruncated.
fn format_agenda_text(agenda: &Agenda, display: &DisplayConfig, width: usize) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Agenda – {} to {}",
        agenda.window.start.format(&display.date_format),
        agenda.window.end.format(&display.date_format)
    ));

    if agenda.is_empty() {
        lines.push(String::new());
        lines.push("No happenings scheduled.".to_string());
        return lines.join("\n");
    }

    let mut current_date = None;
    for occurrence in &agenda.active {
        if current_date != Some(occurrence.date) {
            lines.push(String::new());
            lines.push(occurrence.date.format(&display.date_format).to_string());
            current_date = Some(occurrence.date);
        }
        lines.push(format!("  {}", build_agenda_line(occurrence, display, width.saturating_sub(2))));
    }

    if !agenda.cancelled.is_empty() {
        lines.push(String::new());
        lines.push("Cancelled".to_string());
        for occurrence in &agenda.cancelled {
            let mut line = format!("  {}  {}", occurrence.date.format(&display.date_format), occurrence.title);
            if let Some(notes) = &occurrence.notes {
                line.push_str(&format!(" ({})", notes));
            }
            lines.push(line);
        }
    }

    if !agenda.unknown.is_empty() {
        lines.push(String::new());
        lines.push("Schedule unknown".to_string());
        for item in &agenda.unknown {
            lines.push(format!("  {}: {}", item.title, item.reason));
        }
    }

    if !agenda.orphaned_overrides.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "{} override(s) match no occurrence in this window.",
            agenda.orphaned_overrides.len()
        ));
    }

    lines.join("\n")
}

fn time_label(occurrence: &Occurrence, display: &DisplayConfig) -> String {
    match (occurrence.start_time, occurrence.end_time) {
        (Some(start), Some(end)) => format!(
            "{}-{}",
            format_time_of_day(start, display.time_format),
            format_time_of_day(end, display.time_format)
        ),
        (Some(start), None) => format_time_of_day(start, display.time_format),
        (None, _) => "Time TBA".to_string(),
    }
}

fn build_agenda_line(occurrence: &Occurrence, display: &DisplayConfig, width: usize) -> String {
    let mut line = format!("{:<13} {}", time_label(occurrence, display), occurrence.title);
    if let Some(venue) = &occurrence.venue
        && !venue.is_empty()
    {
        line.push_str(&format!(" @ {}", venue));
    }
    if let Some(notes) = &occurrence.notes {
        line.push_str(&format!(" ({})", notes));
    }
    if occurrence.confidence == Confidence::Inferred {
        line.push_str(" [inferred]");
    }
    truncate_to_width(&line, width)
}

fn format_series_text(rows: &[SeriesRow], display: &DisplayConfig) -> String {
    if rows.is_empty() {
        return "No happenings listed.".to_string();
    }

    rows.iter()
        .map(|row| {
            let next = match &row.next {
                Some(occurrence) => format!(
                    "next {} {}",
                    occurrence.date.format(&display.date_format),
                    time_label(occurrence, display)
                ),
                None => "no upcoming date".to_string(),
            };
            let mut line = format!("{} ({}) {}", row.title, row.schedule_label, next);
            if !row.cancelled_dates.is_empty() {
                line.push_str(&format!(", {} cancelled", row.cancelled_dates.len()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_to_width(line: &str, width: usize) -> String {
    if width > 0 && line.chars().count() > width {
        let mut truncated = line.chars().take(width.saturating_sub(1)).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        line.to_string()
    }
}

fn display_with_pager(text: &str) -> Result<(), io::Error> {
    let pager_value = env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager_value.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => {
            println!("{text}");
            return Ok(());
        }
    };
    let args: Vec<&str> = parts.collect();

    match Command::new(cmd)
        .args(&args)
        .stdin(Stdio::piped())
        .spawn()
    {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(text.as_bytes())?;
            }
            let _ = child.wait();
        }
        Err(_) => {
            println!("{text}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use happenings::calendar::{OccurrenceStatus, TimeFormat, UnscheduledHappening};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn display() -> DisplayConfig {
        DisplayConfig {
            time_format: TimeFormat::TwelveHour,
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    fn occurrence(title: &str, start: Option<(u32, u32)>) -> Occurrence {
        Occurrence {
            happening_id: title.to_lowercase(),
            title: title.to_string(),
            date: date(2026, 10, 20),
            start_time: start.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            end_time: None,
            venue: Some("The Anchor".to_string()),
            notes: None,
            status: OccurrenceStatus::Scheduled,
            confidence: Confidence::Explicit,
            override_id: None,
        }
    }

    #[test]
    fn parses_dashed_and_slashed_dates() {
        assert_eq!(parse_date_arg("2026-10-20"), Ok(date(2026, 10, 20)));
        assert_eq!(parse_date_arg("2026/10/20"), Ok(date(2026, 10, 20)));
        assert!(parse_date_arg("20/10/2026").is_err());
    }

    #[test]
    fn cli_parses_agenda_window() {
        let cli = Cli::try_parse_from(["happenings", "agenda", "--from", "2026-10-19", "--days", "14", "--json"])
            .unwrap();

        match cli.command {
            Commands::Agenda(args) => {
                assert_eq!(args.window.from, Some(date(2026, 10, 19)));
                assert_eq!(args.window.days, Some(14));
                assert!(args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn cli_rejects_bad_cancel_date() {
        assert!(Cli::try_parse_from(["happenings", "cancel", "quiz", "tomorrow"]).is_err());
    }

    #[test]
    fn agenda_line_shows_time_title_and_venue() {
        let line = build_agenda_line(&occurrence("Pub Quiz", Some((20, 0))), &display(), usize::MAX);

        assert_eq!(line, format!("{:<13} Pub Quiz @ The Anchor", "8pm"));
    }

    #[test]
    fn agenda_line_marks_missing_time_and_inferred_schedule() {
        let mut o = occurrence("Open Mic", None);
        o.confidence = Confidence::Inferred;

        let line = build_agenda_line(&o, &display(), usize::MAX);

        assert!(line.starts_with("Time TBA"));
        assert!(line.ends_with("[inferred]"));
    }

    #[test]
    fn truncates_long_lines() {
        assert_eq!(truncate_to_width("abcdef", 4), "abc…");
        assert_eq!(truncate_to_width("abc", 4), "abc");
    }

    #[test]
    fn agenda_text_lists_every_bucket() {
        let mut cancelled = occurrence("Bingo", Some((19, 0)));
        cancelled.status = OccurrenceStatus::Cancelled;
        cancelled.notes = Some("Flooded".to_string());
        let agenda = Agenda {
            window: DateWindow::new(date(2026, 10, 19), date(2026, 10, 25)).unwrap(),
            active: vec![occurrence("Pub Quiz", Some((20, 0)))],
            cancelled: vec![cancelled],
            unknown: vec![UnscheduledHappening {
                happening_id: "jam".to_string(),
                title: "Folk Jam".to_string(),
                venue: None,
                reason: "Recurrence text is ambiguous: varies".to_string(),
            }],
            orphaned_overrides: vec![],
        };

        let text = format_agenda_text(&agenda, &display(), 0);

        assert!(text.starts_with("Agenda – 2026-10-19 to 2026-10-25"));
        assert!(text.contains("\n2026-10-20\n  8pm"));
        assert!(text.contains("Cancelled\n  2026-10-20  Bingo (Flooded)"));
        assert!(text.contains("Schedule unknown\n  Folk Jam: Recurrence text is ambiguous: varies"));
    }

    #[test]
    fn agenda_text_truncates_to_requested_width() {
        let mut long = occurrence("Pub Quiz", Some((20, 0)));
        long.notes = Some("Bring your own pens and a sense of humour".to_string());
        let agenda = Agenda {
            window: DateWindow::new(date(2026, 10, 19), date(2026, 10, 25)).unwrap(),
            active: vec![long],
            cancelled: vec![],
            unknown: vec![],
            orphaned_overrides: vec![],
        };

        let text = format_agenda_text(&agenda, &display(), 30);

        let line = text.lines().find(|l| l.starts_with("  8pm")).unwrap();
        assert_eq!(line.chars().count(), 30);
        assert!(line.ends_with('…'));
    }

    #[test]
    fn cli_reads_agenda_width() {
        let cli = Cli::try_parse_from(["happenings", "agenda", "--width", "72"]).unwrap();

        match cli.command {
            Commands::Agenda(args) => assert_eq!(args.width, Some(72)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn empty_agenda_says_so() {
        let agenda = Agenda {
            window: DateWindow::new(date(2026, 10, 19), date(2026, 10, 25)).unwrap(),
            active: vec![],
            cancelled: vec![],
            unknown: vec![],
            orphaned_overrides: vec![],
        };

        assert!(format_agenda_text(&agenda, &display(), 0).ends_with("No happenings scheduled."));
    }
}
