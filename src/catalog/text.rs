/// Build the single string embedded for a movie:
/// `"{title}. {overview} Genres: {g1}, {g2}. Keywords: {k1}, {k2}"`.
///
/// Empty segments are dropped. Segments are joined with `". "` unless the
/// previous one already ends a sentence, in which case a bare space is
/// used. Only the first `keyword_limit` keywords are kept, in source order.
///
/// Stored vectors are only comparable while this derivation is unchanged;
/// any edit here means the whole catalog must be re-embedded.
pub fn build_embedding_text(
    title: &str,
    overview: Option<&str>,
    genres: &[String],
    keywords: &[String],
    keyword_limit: usize,
) -> String {
    let mut segments: Vec<String> = Vec::with_capacity(4);

    let title = title.trim();
    if !title.is_empty() {
        segments.push(title.to_string());
    }
    if let Some(overview) = overview.map(str::trim).filter(|o| !o.is_empty()) {
        segments.push(overview.to_string());
    }
    let genres = non_empty(genres.iter());
    if !genres.is_empty() {
        segments.push(format!("Genres: {}", genres.join(", ")));
    }
    let keywords = non_empty(keywords.iter().take(keyword_limit));
    if !keywords.is_empty() {
        segments.push(format!("Keywords: {}", keywords.join(", ")));
    }

    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            if ends_sentence(&segments[i - 1]) {
                out.push(' ');
            } else {
                out.push_str(". ");
            }
        }
        out.push_str(segment);
    }
    out
}

fn non_empty<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    items.map(|s| s.trim()).filter(|s| !s.is_empty()).collect()
}

fn ends_sentence(s: &str) -> bool {
    s.ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_segments() {
        let text = build_embedding_text(
            "Titanic",
            Some("A seventeen-year-old aristocrat falls in love..."),
            &strings(&["Drama", "Romance"]),
            &strings(&["iceberg", "ship", "love", "disaster", "ocean", "tragedy"]),
            20,
        );
        assert_eq!(
            text,
            "Titanic. A seventeen-year-old aristocrat falls in love... Genres: Drama, Romance. \
             Keywords: iceberg, ship, love, disaster, ocean, tragedy"
        );
    }

    #[test]
    fn overview_without_terminal_punctuation_gets_separator() {
        let text = build_embedding_text("Heat", Some("Cops and robbers"), &strings(&["Crime"]), &[], 20);
        assert_eq!(text, "Heat. Cops and robbers. Genres: Crime");
    }

    #[test]
    fn title_only_has_no_trailing_punctuation() {
        assert_eq!(build_embedding_text("Alien", None, &[], &[], 20), "Alien");
        assert_eq!(build_embedding_text("Alien", Some("   "), &[], &[], 20), "Alien");
    }

    #[test]
    fn missing_genres_skips_segment() {
        let text = build_embedding_text("Up", Some("A house floats away."), &[], &strings(&["balloon"]), 20);
        assert_eq!(text, "Up. A house floats away. Keywords: balloon");
    }

    #[test]
    fn keywords_truncated_in_source_order() {
        let keywords: Vec<String> = (0..30).map(|i| format!("k{i}")).collect();
        let text = build_embedding_text("T", None, &[], &keywords, 3);
        assert_eq!(text, "T. Keywords: k0, k1, k2");
    }

    #[test]
    fn blank_list_entries_are_ignored() {
        let text = build_embedding_text("T", None, &strings(&["", "Drama", " "]), &[], 20);
        assert_eq!(text, "T. Genres: Drama");
    }

    #[test]
    fn deterministic() {
        let genres = strings(&["Action"]);
        let keywords = strings(&["heist"]);
        let a = build_embedding_text("Heat", Some("LA crime."), &genres, &keywords, 20);
        let b = build_embedding_text("Heat", Some("LA crime."), &genres.clone(), &keywords.clone(), 20);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
