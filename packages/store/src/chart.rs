//! Chart entry parsing.
//!
//! Editors type each chart row as `"Title - Artist"`. Movement is either picked
//! explicitly or derived from the previous week's position; legacy seed files store the
//! whole chart as one `|`-separated string.

use chrono::{DateTime, Datelike, Utc};

use crate::models::{Chart, ChartEntry, Movement};
use crate::validate::{ValidationError, CHART_ENTRY_COUNT};

pub const DEFAULT_CHART_TITLE: &str = "The Hot 15";

/// Split `"Title - Artist"`. Falls back to the first bare `-` so `"Song-Band"` works.
pub fn split_title_artist(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let (title, artist) = match line.find(" - ") {
        Some(idx) if idx > 0 => (&line[..idx], &line[idx + 3..]),
        _ => match line.find('-') {
            Some(idx) if idx > 0 => (&line[..idx], &line[idx + 1..]),
            _ => return None,
        },
    };
    let (title, artist) = (title.trim(), artist.trim());
    if title.is_empty() || artist.is_empty() {
        None
    } else {
        Some((title.to_string(), artist.to_string()))
    }
}

/// Movement implied by last week's position. No (or zero) position means `new`.
pub fn auto_movement(position: u32, last_position: Option<u32>) -> Movement {
    match last_position.filter(|p| *p > 0) {
        None => Movement::New,
        Some(last) if last == position => Movement::Same,
        Some(last) if last > position => Movement::Up,
        Some(_) => Movement::Down,
    }
}

/// One editor row before parsing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryInput {
    pub line: String,
    /// `None` derives movement from `last_position`.
    pub movement: Option<Movement>,
    pub last_position: Option<u32>,
}

impl EntryInput {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            ..Default::default()
        }
    }

    pub fn with_last_position(mut self, last: u32) -> Self {
        self.last_position = Some(last);
        self
    }

    pub fn with_movement(mut self, movement: Movement) -> Self {
        self.movement = Some(movement);
        self
    }
}

pub fn parse_entry(position: u32, input: &EntryInput) -> Result<ChartEntry, ValidationError> {
    if input.line.trim().is_empty() {
        return Err(ValidationError::MissingChartEntry(position as usize));
    }
    let (track_title, artist) = split_title_artist(&input.line)
        .ok_or(ValidationError::MalformedChartEntry(position as usize))?;
    let last_position = input.last_position.filter(|p| *p > 0);
    let movement = input
        .movement
        .unwrap_or_else(|| auto_movement(position, last_position));
    Ok(ChartEntry {
        position,
        track_title,
        artist,
        movement,
        last_position,
    })
}

/// Build a chart from editor rows. Blank title defaults to [`DEFAULT_CHART_TITLE`], blank
/// issue number to the current year.
pub fn build_chart(
    title: &str,
    issue_number: &str,
    rows: &[EntryInput],
    now: DateTime<Utc>,
) -> Result<Chart, ValidationError> {
    let mut entries = Vec::with_capacity(CHART_ENTRY_COUNT);
    for position in 1..=CHART_ENTRY_COUNT {
        let row = rows
            .get(position - 1)
            .ok_or(ValidationError::MissingChartEntry(position))?;
        entries.push(parse_entry(position as u32, row)?);
    }
    let title = title.trim();
    let issue = issue_number.trim();
    Ok(Chart {
        chart_title: if title.is_empty() {
            DEFAULT_CHART_TITLE.to_string()
        } else {
            title.to_string()
        },
        issue_number: if issue.is_empty() {
            now.year().to_string()
        } else {
            issue.to_string()
        },
        entries,
    })
}

/// Parse a legacy `"Title - Artist | Title - Artist | ..."` string. Rows without a
/// separator keep the whole text as the title. Movement is always `same`.
pub fn parse_legacy_content(content: &str) -> Vec<ChartEntry> {
    const SEPARATORS: [&str; 5] = [" - ", " \u{2014} ", " \u{2013} ", " -", "- "];

    content
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, line)| {
            let split = SEPARATORS.iter().find_map(|sep| match line.find(sep) {
                Some(idx) if idx > 0 => Some((
                    line[..idx].trim().to_string(),
                    line[idx + sep.len()..].trim().to_string(),
                )),
                _ => None,
            });
            let (track_title, artist) = match split {
                Some((t, a)) if !t.is_empty() && !a.is_empty() => (t, a),
                _ => (line.to_string(), String::new()),
            };
            ChartEntry {
                position: index as u32 + 1,
                track_title,
                artist,
                movement: Movement::Same,
                last_position: None,
            }
        })
        .collect()
}
