pub mod source;
pub mod text;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::DataQuality;
use source::{RawMovie, parse_id, parse_name_list};

/// Overviews must be strictly longer than this (in characters).
pub const MIN_OVERVIEW_CHARS: usize = 10;

/// A validated, embeddable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: i64,
    pub title: String,
    pub overview: String,
    pub release_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
}

impl MovieRecord {
    pub fn embedding_text(&self, keyword_limit: usize) -> String {
        text::build_embedding_text(
            &self.title,
            Some(&self.overview),
            &self.genres,
            &self.keywords,
            keyword_limit,
        )
    }
}

/// The filtered, deduplicated catalog plus everything that was dropped or
/// altered on the way in.
#[derive(Debug, Default)]
pub struct Catalog {
    pub movies: Vec<MovieRecord>,
    pub issues: Vec<DataQuality>,
    pub rows_read: usize,
}

impl Catalog {
    pub fn skipped(&self) -> usize {
        self.issues.iter().filter(|i| i.is_skip()).count()
    }

    /// Issue counts grouped by kind, for reporting.
    pub fn issue_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Hash of the batch size and the ordered ids and embedding texts. Two
    /// runs with the same fingerprint produce the same batch boundaries.
    pub fn fingerprint(&self, keyword_limit: usize, batch_size: usize) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(batch_size as u64).to_le_bytes());
        for movie in &self.movies {
            hasher.update(&movie.id.to_le_bytes());
            hasher.update(movie.embedding_text(keyword_limit).as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Load both CSV files and build the catalog.
pub fn load(movies_path: &Path, keywords_path: Option<&Path>, keyword_limit: usize) -> Result<Catalog> {
    let (rows, read_issues) = source::read_movies_file(movies_path)?;
    let keywords = match keywords_path {
        Some(path) => source::read_keywords_file(path)?,
        None => HashMap::new(),
    };
    let mut catalog = build(rows, &keywords, keyword_limit);
    catalog.rows_read += read_issues.len();
    let mut issues = read_issues;
    issues.append(&mut catalog.issues);
    catalog.issues = issues;
    Ok(catalog)
}

/// Left-join metadata rows with keywords, validate, and dedup by id
/// (first row wins). Source order is preserved.
pub fn build(rows: Vec<RawMovie>, keywords: &HashMap<i64, Vec<String>>, keyword_limit: usize) -> Catalog {
    let mut catalog = Catalog {
        rows_read: rows.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for row in rows {
        match validate(row, keywords, keyword_limit) {
            Ok((movie, notes)) => {
                if !seen.insert(movie.id) {
                    let issue = DataQuality::DuplicateId(movie.id);
                    debug!(%issue, "skipping row");
                    catalog.issues.push(issue);
                    continue;
                }
                for note in &notes {
                    debug!(issue = %note, "normalized field");
                }
                catalog.issues.extend(notes);
                catalog.movies.push(movie);
            }
            Err(issue) => {
                debug!(%issue, "skipping row");
                catalog.issues.push(issue);
            }
        }
    }
    catalog
}

/// Turn a raw row into a record, or say why it can't be one. The second
/// element lists field normalizations that didn't reject the row.
pub fn validate(
    row: RawMovie,
    keywords: &HashMap<i64, Vec<String>>,
    keyword_limit: usize,
) -> Result<(MovieRecord, Vec<DataQuality>), DataQuality> {
    let raw_id = row.id.unwrap_or_default();
    let id = parse_id(&raw_id).ok_or(DataQuality::InvalidId(raw_id))?;

    let title = row
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(DataQuality::MissingTitle(id))?;

    let overview = row
        .overview
        .map(|o| o.trim().to_string())
        .filter(|o| o.chars().count() > MIN_OVERVIEW_CHARS)
        .ok_or(DataQuality::ShortOverview(id))?;

    let mut notes = Vec::new();

    let release_date = match row.release_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            let date = normalize_date(raw);
            if date.is_none() {
                notes.push(DataQuality::InvalidDate {
                    id,
                    raw: raw.to_string(),
                });
            }
            date
        }
    };

    let mut movie_keywords = keywords.get(&id).cloned().unwrap_or_default();
    if movie_keywords.len() > keyword_limit {
        notes.push(DataQuality::KeywordsTruncated {
            id,
            count: movie_keywords.len(),
        });
        movie_keywords.truncate(keyword_limit);
    }

    let movie = MovieRecord {
        id,
        title,
        overview,
        release_date,
        poster_path: normalize_poster(row.poster_path.as_deref()),
        genres: parse_name_list(row.genres.as_deref()),
        keywords: movie_keywords,
        vote_average: parse_rating(row.vote_average.as_deref()),
        vote_count: parse_count(row.vote_count.as_deref()),
    };
    Ok((movie, notes))
}

/// Keep the leading `YYYY-MM-DD` of a timestamp-ish string if it is a real date.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn normalize_poster(raw: Option<&str>) -> Option<String> {
    match raw.map(str::trim) {
        None | Some("") | Some("nan") | Some("NaN") => None,
        Some(p) => Some(p.to_string()),
    }
}

/// Missing or unparseable ratings stay `None`; zero is a real rating.
pub fn parse_rating(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Counts arrive as `"5415"` or `"5415.0"` depending on the export.
pub fn parse_count(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}
