//! Required-field checks run before any payload leaves the client or enters a store.

use crate::models::{Chart, Critic, CoverPayload, Interview, ItemBody, ItemPayload, News};

/// Number of entries every chart must carry.
pub const CHART_ENTRY_COUNT: usize = 15;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("Score must be between 0 and 10 (got {0})")]
    ScoreOutOfRange(f64),
    /// 1-based position of the first missing chart entry.
    #[error("chart entry {0} is required")]
    MissingChartEntry(usize),
    #[error("chart entry {0} must be in format \"Title - Artist\"")]
    MalformedChartEntry(usize),
    #[error("Invalid image data (expected a base64 data URL)")]
    InvalidImageData,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn collect_missing(fields: &[(&'static str, &str)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| blank(value))
        .map(|(label, _)| *label)
        .collect()
}

fn check_missing(fields: &[(&'static str, &str)]) -> Result<(), ValidationError> {
    let missing = collect_missing(fields);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields(missing))
    }
}

pub fn validate_critic(c: &Critic) -> Result<(), ValidationError> {
    let mut missing = collect_missing(&[
        ("Album Title", c.album.as_str()),
        ("Artist Name", c.artist.as_str()),
    ]);
    if c.score.is_none() {
        missing.push("Score");
    }
    missing.extend(collect_missing(&[
        ("Review Content", c.content.as_str()),
        ("Author Name", c.author.as_str()),
    ]));
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }
    match c.score {
        Some(score) if !(MIN_SCORE..=MAX_SCORE).contains(&score) => {
            Err(ValidationError::ScoreOutOfRange(score))
        }
        _ => Ok(()),
    }
}

pub fn validate_news(n: &News) -> Result<(), ValidationError> {
    check_missing(&[
        ("Category", n.category.as_str()),
        ("Headline", n.headline.as_str()),
        ("Subtitle", n.subtitle.as_str()),
        ("Content", n.content.as_str()),
        ("Author", n.author.as_str()),
    ])
}

pub fn validate_interview(i: &Interview) -> Result<(), ValidationError> {
    check_missing(&[
        ("Guest Name", i.guest.as_str()),
        ("Title", i.title.as_str()),
        ("Subtitle", i.subtitle.as_str()),
        ("Content", i.content.as_str()),
        ("Author", i.author.as_str()),
    ])
}

/// Entries must cover positions 1..=15; the first gap is reported.
pub fn validate_chart(c: &Chart) -> Result<(), ValidationError> {
    for position in 1..=CHART_ENTRY_COUNT {
        let entry = c
            .entries
            .iter()
            .find(|e| e.position as usize == position);
        match entry {
            None => return Err(ValidationError::MissingChartEntry(position)),
            Some(e) if blank(&e.track_title) && blank(&e.artist) => {
                return Err(ValidationError::MissingChartEntry(position))
            }
            Some(e) if blank(&e.track_title) || blank(&e.artist) => {
                return Err(ValidationError::MalformedChartEntry(position))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn validate_body(body: &ItemBody) -> Result<(), ValidationError> {
    match body {
        ItemBody::Critic(c) => validate_critic(c),
        ItemBody::News(n) => validate_news(n),
        ItemBody::Interview(i) => validate_interview(i),
        ItemBody::Chart(c) => validate_chart(c),
    }
}

impl ItemPayload {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_body(&self.body)
    }
}

impl CoverPayload {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_missing(&[
            ("Issue Number", self.issue_number.as_str()),
            ("Issue Date", self.issue_date.as_str()),
            ("Description", self.description.as_str()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartEntry, Movement};

    fn critic(score: Option<f64>) -> Critic {
        Critic {
            album: "Blue".into(),
            artist: "Joni Mitchell".into(),
            score,
            content: "A landmark.".into(),
            author: "Staff".into(),
            ..Default::default()
        }
    }

    fn chart_with(n: usize) -> Chart {
        Chart {
            chart_title: "The Hot 15".into(),
            issue_number: "2024".into(),
            entries: (1..=n as u32)
                .map(|position| ChartEntry {
                    position,
                    track_title: format!("Song {position}"),
                    artist: "Band".into(),
                    movement: Movement::New,
                    last_position: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_score_bounds_are_inclusive() {
        assert!(validate_critic(&critic(Some(0.0))).is_ok());
        assert!(validate_critic(&critic(Some(10.0))).is_ok());
        assert_eq!(
            validate_critic(&critic(Some(10.5))),
            Err(ValidationError::ScoreOutOfRange(10.5))
        );
        assert!(validate_critic(&critic(Some(-0.1))).is_err());
    }

    #[test]
    fn test_missing_fields_are_listed_in_order() {
        let c = Critic {
            artist: "Someone".into(),
            ..Default::default()
        };
        let err = validate_critic(&c).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: Album Title, Score, Review Content, Author Name"
        );
    }

    #[test]
    fn test_whitespace_counts_as_missing() {
        let n = News {
            category: "  ".into(),
            headline: "h".into(),
            subtitle: "s".into(),
            content: "c".into(),
            author: "a".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_news(&n),
            Err(ValidationError::MissingFields(vec!["Category"]))
        );
    }

    #[test]
    fn test_short_chart_names_first_missing_entry() {
        let err = validate_chart(&chart_with(12)).unwrap_err();
        assert_eq!(err.to_string(), "chart entry 13 is required");
        assert!(validate_chart(&chart_with(15)).is_ok());
    }

    #[test]
    fn test_chart_entry_without_artist_is_malformed() {
        let mut chart = chart_with(15);
        chart.entries[4].artist.clear();
        assert_eq!(
            validate_chart(&chart),
            Err(ValidationError::MalformedChartEntry(5))
        );
    }

    #[test]
    fn test_cover_requires_issue_fields() {
        let cover = CoverPayload {
            issue_number: "42".into(),
            issue_date: String::new(),
            description: "d".into(),
            cover_image_url: String::new(),
        };
        assert_eq!(
            cover.validate(),
            Err(ValidationError::MissingFields(vec!["Issue Date"]))
        );
    }
}
