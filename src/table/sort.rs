use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use tracing::trace;

use crate::table::collate::{self, CollationKey};
use crate::table::row::Row;

/// `num_days_from_ce` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Date,
    Number,
    Text,
}

/// Ordering used for text columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrder {
    Locale,
    /// Locale order with digit runs compared as numbers.
    Numeric,
}

#[derive(Debug, Clone, Default)]
pub struct SortState {
    pub column: Option<usize>,
    pub direction: SortDirection,
    remembered: HashMap<usize, SortDirection>,
}

impl SortState {
    /// Makes `column` the active one. A column sorted before flips its last
    /// direction, a fresh column starts ascending.
    pub fn activate(&mut self, column: usize) -> SortDirection {
        let direction = match self.remembered.get(&column) {
            Some(previous) => previous.flipped(),
            None => SortDirection::Ascending,
        };
        self.remembered.insert(column, direction);
        self.column = Some(column);
        self.direction = direction;
        direction
    }

    pub fn indicator(&self, column: usize) -> &'static str {
        match (self.column, self.direction) {
            (Some(active), SortDirection::Ascending) if active == column => " ▲",
            (Some(active), SortDirection::Descending) if active == column => " ▼",
            _ => "",
        }
    }
}

fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn infer_type(sample: &str) -> ColumnType {
    let sample = sample.trim();
    if is_iso_date(sample) {
        ColumnType::Date
    } else if parse_number(sample).is_some() {
        ColumnType::Number
    } else {
        ColumnType::Text
    }
}

/// Type most non empty cells of `column` agree on, ties going to Date, then
/// Number. Empty columns are Text. The result does not depend on row order.
pub fn infer_column_type(rows: &[Row], column: usize) -> ColumnType {
    let mut votes = [0usize; 3];
    for cell in rows.iter().map(|r| r.cell(column)) {
        if cell.trim().is_empty() {
            continue;
        }
        match infer_type(&cell) {
            ColumnType::Date => votes[0] += 1,
            ColumnType::Number => votes[1] += 1,
            ColumnType::Text => votes[2] += 1,
        }
    }
    if votes[0] > 0 && votes[0] >= votes[1] && votes[0] >= votes[2] {
        ColumnType::Date
    } else if votes[1] > 0 && votes[1] >= votes[2] {
        ColumnType::Number
    } else {
        ColumnType::Text
    }
}

/// Days since 1970-01-01, invalid dates count as the epoch itself.
fn date_key(s: &str) -> i64 {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map(|d| i64::from(d.num_days_from_ce() - EPOCH_DAYS_FROM_CE))
        .unwrap_or(0)
}

enum SortKey {
    Date(i64),
    Number(f64),
    Text(CollationKey),
}

impl SortKey {
    fn build(value: &str, column_type: ColumnType, order: TextOrder) -> Self {
        match column_type {
            ColumnType::Date => SortKey::Date(date_key(value)),
            ColumnType::Number => SortKey::Number(parse_number(value).unwrap_or(0.0)),
            ColumnType::Text => SortKey::Text(collate::key(value, order == TextOrder::Numeric)),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Stable sort of all rows by the cell at `column`. Columns without a
/// `declared` type get one from [`infer_column_type`].
pub fn sort_rows(
    rows: &mut Vec<Row>,
    column: usize,
    declared: Option<ColumnType>,
    direction: SortDirection,
    order: TextOrder,
) -> ColumnType {
    let column_type = declared.unwrap_or_else(|| infer_column_type(rows, column));

    let mut keyed: Vec<(SortKey, Row)> = rows
        .drain(..)
        .map(|row| (SortKey::build(&row.cell(column), column_type, order), row))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match direction {
        SortDirection::Ascending => a.compare(b),
        SortDirection::Descending => b.compare(a),
    });
    rows.extend(keyed.into_iter().map(|(_, row)| row));

    trace!("Sorted {} rows by column {column} as {column_type:?} {direction:?}", rows.len());
    column_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row::{EditKind, Field};

    fn rows(values: &[&str]) -> Vec<Row> {
        values
            .iter()
            .enumerate()
            .map(|(idx, v)| Row::new(idx as u64, vec![Field::new("value", *v, EditKind::Text)]))
            .collect()
    }

    fn cells(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.cell(0)).collect()
    }

    #[test]
    fn invalid_dates_sort_as_epoch() {
        let mut table = rows(&["2023-05-01", "2023-01-10", "invalid"]);
        let kind = sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Locale);
        assert_eq!(kind, ColumnType::Date);
        assert_eq!(cells(&table), vec!["invalid", "2023-01-10", "2023-05-01"]);
    }

    #[test]
    fn infers_column_types() {
        assert_eq!(infer_type("2024-02-29"), ColumnType::Date);
        assert_eq!(infer_type("2024-2-29"), ColumnType::Text);
        assert_eq!(infer_type(" 2024-02-29 "), ColumnType::Date);
        assert_eq!(infer_type("12.5"), ColumnType::Number);
        assert_eq!(infer_type("none"), ColumnType::Text);
        assert_eq!(infer_type("inf"), ColumnType::Text);
    }

    #[test]
    fn numbers_compare_by_value() {
        let mut table = rows(&["", "10", "9", "none", "100"]);
        sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Locale);
        assert_eq!(cells(&table), vec!["", "none", "9", "10", "100"]);
    }

    #[test]
    fn descending_is_exact_reverse_for_distinct_keys() {
        let mut table = rows(&["Żaneta", "adam", "Łukasz", "Bartek", "ewa"]);
        sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Locale);
        let ascending = cells(&table);
        assert_eq!(ascending, vec!["adam", "Bartek", "ewa", "Łukasz", "Żaneta"]);

        sort_rows(&mut table, 0, None, SortDirection::Descending, TextOrder::Locale);
        let mut reversed = ascending.clone();
        reversed.reverse();
        assert_eq!(cells(&table), reversed);
    }

    #[test]
    fn equal_keys_keep_their_order() {
        let mut table = rows(&["b", "a", "b", "a"]);
        sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Locale);
        let ids: Vec<u64> = table.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 0, 2]);
    }

    #[test]
    fn each_column_remembers_its_direction() {
        let mut state = SortState::default();
        assert_eq!(state.activate(1), SortDirection::Ascending);
        assert_eq!(state.activate(1), SortDirection::Descending);
        assert_eq!(state.indicator(1), " ▼");

        assert_eq!(state.activate(2), SortDirection::Ascending);
        assert_eq!(state.indicator(1), "");
        assert_eq!(state.indicator(2), " ▲");

        assert_eq!(state.activate(1), SortDirection::Ascending);
    }

    #[test]
    fn numeric_text_order_for_mixed_columns() {
        let mut table = rows(&["koło 12", "koło 2"]);
        sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Numeric);
        assert_eq!(cells(&table), vec!["koło 2", "koło 12"]);
    }

    fn reversed(mut values: Vec<String>) -> Vec<String> {
        values.reverse();
        values
    }

    #[test]
    fn invalid_first_row_does_not_change_the_column_type() {
        let mut table = rows(&["invalid", "2023-05-01", "2023-01-10"]);
        let kind = sort_rows(&mut table, 0, None, SortDirection::Ascending, TextOrder::Locale);
        assert_eq!(kind, ColumnType::Date);
        let ascending = cells(&table);
        assert_eq!(ascending, vec!["invalid", "2023-01-10", "2023-05-01"]);

        let kind = sort_rows(&mut table, 0, None, SortDirection::Descending, TextOrder::Locale);
        assert_eq!(kind, ColumnType::Date);
        assert_eq!(cells(&table), reversed(ascending));
    }

    #[test]
    fn declared_date_column_reverses_exactly() {
        let mut table = rows(&["", "2023-05-01", "1999-12-31", "2023-01-10"]);
        let declared = Some(ColumnType::Date);
        sort_rows(&mut table, 0, declared, SortDirection::Ascending, TextOrder::Locale);
        let ascending = cells(&table);
        assert_eq!(ascending, vec!["", "1999-12-31", "2023-01-10", "2023-05-01"]);

        sort_rows(&mut table, 0, declared, SortDirection::Descending, TextOrder::Locale);
        assert_eq!(cells(&table), reversed(ascending));
    }

    #[test]
    fn declared_number_column_ignores_the_first_cell() {
        let mut table = rows(&["none", "120", "7", "35.5"]);
        let declared = Some(ColumnType::Number);
        let kind = sort_rows(&mut table, 0, declared, SortDirection::Descending, TextOrder::Locale);
        assert_eq!(kind, ColumnType::Number);
        let descending = cells(&table);
        assert_eq!(descending, vec!["120", "35.5", "7", "none"]);

        sort_rows(&mut table, 0, declared, SortDirection::Ascending, TextOrder::Locale);
        assert_eq!(cells(&table), reversed(descending));
    }

    #[test]
    fn column_type_is_voted_by_all_cells() {
        let dates = rows(&["x", "2023-05-01", "", "2023-01-10"]);
        assert_eq!(infer_column_type(&dates, 0), ColumnType::Date);
        let mut shuffled = dates.clone();
        shuffled.reverse();
        assert_eq!(infer_column_type(&shuffled, 0), ColumnType::Date);

        assert_eq!(infer_column_type(&rows(&["Anna", "12", "Jan"]), 0), ColumnType::Text);
        assert_eq!(infer_column_type(&rows(&["", " "]), 0), ColumnType::Text);
    }
}
