use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::DataQuality;

/// One row of `movies_metadata.csv`, untyped except for presence.
/// Unknown columns are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawMovie {
    pub id: Option<String>,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub genres: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub vote_average: Option<String>,
    pub vote_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKeywords {
    id: Option<String>,
    keywords: Option<String>,
}

/// Matches the `name` entry of a Python dict literal such as
/// `{'id': 18, 'name': 'Drama'}`. Names containing an apostrophe are
/// written with double quotes by the dataset.
static NAME_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]name['"]\s*:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
        .expect("static regex")
});

/// Extract the `name` values, in order, from a list-of-dicts column.
/// Anything that isn't a list yields an empty list.
pub fn parse_name_list(value: Option<&str>) -> Vec<String> {
    let value = match value.map(str::trim) {
        Some(v) if v.starts_with('[') && v.ends_with(']') => v,
        _ => return Vec::new(),
    };
    NAME_FIELD
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| unescape(m.as_str()))
        .collect()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().flexible(true).from_reader(reader)
}

/// Read metadata rows. Rows the CSV layer can't decode are reported and
/// skipped; everything else is validated later.
pub fn read_movies<R: Read>(reader: R) -> (Vec<RawMovie>, Vec<DataQuality>) {
    let mut rows = Vec::new();
    let mut issues = Vec::new();
    for result in csv_reader(reader).deserialize::<RawMovie>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                let issue = DataQuality::MalformedRow {
                    line,
                    reason: e.to_string(),
                };
                debug!(%issue, "skipping row");
                issues.push(issue);
            }
        }
    }
    (rows, issues)
}

/// Read the keyword side table into an id → names map. The first row for
/// an id wins; rows with unusable ids are dropped since they can never join.
pub fn read_keywords<R: Read>(reader: R) -> HashMap<i64, Vec<String>> {
    let mut map = HashMap::new();
    for result in csv_reader(reader).deserialize::<RawKeywords>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!(error = %e, "skipping keyword row");
                continue;
            }
        };
        let Some(id) = row.id.as_deref().and_then(parse_id) else {
            continue;
        };
        map.entry(id)
            .or_insert_with(|| parse_name_list(row.keywords.as_deref()));
    }
    map
}

pub fn read_movies_file(path: &Path) -> Result<(Vec<RawMovie>, Vec<DataQuality>)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening movie metadata {}", path.display()))?;
    Ok(read_movies(std::io::BufReader::new(file)))
}

pub fn read_keywords_file(path: &Path) -> Result<HashMap<i64, Vec<String>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening keywords {}", path.display()))?;
    Ok(read_keywords(std::io::BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_literal_names() {
        let genres = parse_name_list(Some(
            "[{'id': 16, 'name': 'Animation'}, {'id': 35, 'name': 'Comedy'}, {'id': 10751, 'name': 'Family'}]",
        ));
        assert_eq!(genres, vec!["Animation", "Comedy", "Family"]);
    }

    #[test]
    fn parses_double_quoted_and_escaped_names() {
        let names = parse_name_list(Some(
            r#"[{'id': 1, 'name': "children's book"}, {'id': 2, 'name': 'rock \'n\' roll'}]"#,
        ));
        assert_eq!(names, vec!["children's book", "rock 'n' roll"]);
    }

    #[test]
    fn non_list_values_are_empty() {
        assert!(parse_name_list(None).is_empty());
        assert!(parse_name_list(Some("")).is_empty());
        assert!(parse_name_list(Some("[]")).is_empty());
        assert!(parse_name_list(Some("{'name': 'Drama'}")).is_empty());
        assert!(parse_name_list(Some("nan")).is_empty());
    }

    #[test]
    fn reads_movie_rows_ignoring_extra_columns() {
        let csv = "adult,genres,id,overview,title,vote_average\n\
                   False,\"[{'id': 18, 'name': 'Drama'}]\",597,A ship sinks.,Titanic,7.5\n\
                   False,[],1997-08-20,,,\n";
        let (rows, issues) = read_movies(csv.as_bytes());
        assert!(issues.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_deref(), Some("597"));
        assert_eq!(rows[0].title.as_deref(), Some("Titanic"));
        assert_eq!(rows[0].vote_average.as_deref(), Some("7.5"));
        assert_eq!(rows[1].id.as_deref(), Some("1997-08-20"));
        assert!(rows[1].title.is_none());
    }

    #[test]
    fn short_rows_are_tolerated() {
        let csv = "id,title,overview\n12,Finding Nemo\n";
        let (rows, issues) = read_movies(csv.as_bytes());
        assert!(issues.is_empty());
        assert_eq!(rows[0].title.as_deref(), Some("Finding Nemo"));
        assert!(rows[0].overview.is_none());
    }

    #[test]
    fn keywords_first_row_wins() {
        let csv = "id,keywords\n\
                   597,\"[{'id': 1, 'name': 'iceberg'}]\"\n\
                   597,\"[{'id': 2, 'name': 'duplicate'}]\"\n\
                   oops,\"[{'id': 3, 'name': 'lost'}]\"\n";
        let map = read_keywords(csv.as_bytes());
        assert_eq!(map.len(), 1);
        assert_eq!(map[&597], vec!["iceberg"]);
    }
}
