use rayon::prelude::*;
use tracing::trace;

use crate::table::row::Row;

/// How query words are matched against the full name of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every query word starts some word of the full name.
    WordPrefix,
    /// Every query word occurs somewhere in the full name.
    Substring,
}

pub fn query_words(query: &str) -> Vec<String> {
    query
        .trim()
        .to_lowercase()
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Full name of a row: first and second cell joined by a space, lowercased.
fn full_name(row: &Row) -> String {
    format!("{} {}", row.cell(0), row.cell(1)).to_lowercase()
}

pub fn matches(row: &Row, query: &str, mode: MatchMode) -> bool {
    let words = query_words(query);
    if words.is_empty() {
        return true;
    }

    let name = full_name(row);
    let by_name = match mode {
        MatchMode::WordPrefix => {
            let name_words: Vec<&str> = name.split_whitespace().collect();
            words
                .iter()
                .all(|w| name_words.iter().any(|nw| nw.starts_with(w.as_str())))
        }
        MatchMode::Substring => words.iter().all(|w| name.contains(w.as_str())),
    };
    if by_name {
        return true;
    }

    let raw = query.to_lowercase();
    row.fields
        .iter()
        .any(|f| f.shown().to_lowercase().contains(&raw))
}

/// Recomputes the visibility of every row. Returns the number of visible rows.
pub fn apply(rows: &mut [Row], query: &str, mode: MatchMode) -> usize {
    rows.par_iter_mut().for_each(|row| {
        row.visible = matches(row, query, mode);
    });
    let visible = rows.iter().filter(|r| r.visible).count();
    trace!("Search {query:?} ({mode:?}) left {visible}/{} rows", rows.len());
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row::{EditKind, Field};

    fn person(id: u64, first: &str, last: &str, email: &str) -> Row {
        Row::new(
            id,
            vec![
                Field::new("first_name", first, EditKind::Text),
                Field::new("last_name", last, EditKind::Text),
                Field::new("email", email, EditKind::Text),
            ],
        )
    }

    #[test]
    fn query_is_normalized() {
        assert_eq!(query_words("  Anna   KOWAL "), vec!["anna", "kowal"]);
        assert!(query_words("   ").is_empty());
    }

    #[test]
    fn word_prefix_needs_every_word() {
        let anna = person(1, "Anna", "Kowalska", "anna@example.org");
        let jan = person(2, "Jan", "Kowalczyk", "jk@example.org");

        assert!(matches(&anna, "an kowal", MatchMode::WordPrefix));
        assert!(!matches(&jan, "an kowal", MatchMode::WordPrefix));
        assert!(matches(&jan, "an kowal", MatchMode::Substring));
    }

    #[test]
    fn falls_back_to_any_cell() {
        let anna = person(1, "Anna", "Kowalska", "anna@Example.org");
        assert!(matches(&anna, "EXAMPLE.org", MatchMode::WordPrefix));
        assert!(!matches(&anna, "nowak", MatchMode::Substring));
    }

    #[test]
    fn empty_query_shows_everything() {
        let mut rows = vec![
            person(1, "Anna", "Kowalska", ""),
            person(2, "Jan", "Nowak", ""),
        ];
        assert_eq!(apply(&mut rows, "nowak", MatchMode::WordPrefix), 1);
        assert!(!rows[0].visible);
        assert_eq!(apply(&mut rows, "  ", MatchMode::WordPrefix), 2);
        assert!(rows.iter().all(|r| r.visible));
    }

    #[test]
    fn filtering_keeps_order() {
        let mut rows = vec![
            person(3, "Zofia", "Nowak", ""),
            person(1, "Anna", "Nowak", ""),
            person(2, "Jan", "Kowalski", ""),
        ];
        apply(&mut rows, "nowak", MatchMode::Substring);
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
