//! Stable, sentinel-aware column sorting.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveTime, Utc};
use rodash_core::{CellValue, Cells};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Number,
    Text,
    Date,
}

impl ColumnType {
    /// Type of the well-known columns; anything unrecognised compares numerically.
    pub fn infer(column: &str) -> Self {
        match column {
            "date" | "timestamp" => ColumnType::Date,
            "recruiter_name" | "team_name" | "company_name" | "contract_type" | "event_type"
            | "call_type" | "sms_type" | "status" | "weekday" => ColumnType::Text,
            _ => ColumnType::Number,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub key: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

impl SortState {
    pub fn new(key: impl Into<String>, direction: Direction) -> Self {
        Self {
            key: Some(key.into()),
            direction,
        }
    }

    /// Same key flips the direction; a new key starts ascending.
    pub fn toggle(&mut self, key: &str) {
        if self.key.as_deref() == Some(key) {
            self.direction = self.direction.flipped();
        } else {
            self.key = Some(key.to_string());
            self.direction = Direction::Asc;
        }
    }

    pub fn apply<R: Cells + Clone>(&self, records: &[R]) -> Vec<R> {
        match &self.key {
            Some(key) => sort_by(records, key, self.direction, ColumnType::infer(key)),
            None => records.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Null,
    Infinite,
    Instant(DateTime<Utc>),
    Number(f64),
    Text { folded: String, raw: String },
}

/// Collation key: accents stripped, case folded.
fn fold_text(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn text_key(raw: String) -> SortKey {
    SortKey::Text {
        folded: fold_text(&raw),
        raw,
    }
}

fn sort_key(cell: CellValue, column_type: ColumnType) -> SortKey {
    if cell.is_absent() {
        return SortKey::Null;
    }
    if cell.is_infinite() {
        return SortKey::Infinite;
    }
    match (column_type, cell) {
        (ColumnType::Date, CellValue::Instant(t)) => SortKey::Instant(t),
        (ColumnType::Date, CellValue::Date(d)) => {
            SortKey::Instant(d.and_time(NaiveTime::MIN).and_utc())
        }
        (ColumnType::Number, CellValue::Number(n)) if !n.is_nan() => SortKey::Number(n),
        (ColumnType::Number, CellValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map_or(SortKey::Null, SortKey::Number),
        (ColumnType::Text, CellValue::Text(s)) => text_key(s),
        (ColumnType::Text, CellValue::Number(n)) => text_key(n.to_string()),
        (ColumnType::Text, CellValue::Date(d)) => text_key(d.format("%Y-%m-%d").to_string()),
        _ => SortKey::Null,
    }
}

/// Ascending order: values, then infinity, then absent.
fn compare_keys(a: &SortKey, b: &SortKey) -> Ordering {
    match (a, b) {
        (SortKey::Null, SortKey::Null) => Ordering::Equal,
        (SortKey::Null, _) => Ordering::Greater,
        (_, SortKey::Null) => Ordering::Less,
        (SortKey::Infinite, SortKey::Infinite) => Ordering::Equal,
        (SortKey::Infinite, _) => Ordering::Greater,
        (_, SortKey::Infinite) => Ordering::Less,
        (SortKey::Instant(x), SortKey::Instant(y)) => x.cmp(y),
        (SortKey::Number(x), SortKey::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (
            SortKey::Text { folded: x, raw: xr },
            SortKey::Text { folded: y, raw: yr },
        ) => x.cmp(y).then_with(|| xr.cmp(yr)),
        _ => Ordering::Equal,
    }
}

/// Returns a sorted copy; rows that compare equal keep their input order.
/// Descending reverses the whole comparator, so absent values lead.
pub fn sort_by<R: Cells + Clone>(
    records: &[R],
    key: &str,
    direction: Direction,
    column_type: ColumnType,
) -> Vec<R> {
    let mut keyed: Vec<(SortKey, &R)> = records
        .iter()
        .map(|r| (sort_key(r.cell(key), column_type), r))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| match direction {
        Direction::Asc => compare_keys(a, b),
        Direction::Desc => compare_keys(b, a),
    });
    keyed.into_iter().map(|(_, r)| r.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Debug, Clone, PartialEq)]
    struct Cell(&'static str, CellValue);

    impl Cells for Cell {
        fn cell(&self, column: &str) -> CellValue {
            match column {
                "name" => CellValue::from(self.0),
                _ => self.1.clone(),
            }
        }
    }

    fn values(rows: &[Cell]) -> Vec<CellValue> {
        rows.iter().map(|r| r.1.clone()).collect()
    }

    #[test]
    fn infinity_sorts_before_absent_ascending() {
        let rows = vec![
            Cell("a", CellValue::Number(5.0)),
            Cell("b", CellValue::Never),
            Cell("c", CellValue::Absent),
            Cell("d", CellValue::Number(2.0)),
        ];
        let sorted = sort_by(&rows, "v", Direction::Asc, ColumnType::Number);
        assert_eq!(
            values(&sorted),
            vec![
                CellValue::Number(2.0),
                CellValue::Number(5.0),
                CellValue::Never,
                CellValue::Absent
            ]
        );
        let desc = sort_by(&rows, "v", Direction::Desc, ColumnType::Number);
        assert_eq!(desc[0].1, CellValue::Absent);
        assert_eq!(desc[1].1, CellValue::Never);
        assert_eq!(desc[3].1, CellValue::Number(2.0));
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let rows = vec![
            Cell("first", CellValue::Number(1.0)),
            Cell("second", CellValue::Number(0.0)),
            Cell("third", CellValue::Number(1.0)),
        ];
        let sorted = sort_by(&rows, "v", Direction::Asc, ColumnType::Number);
        let names: Vec<&str> = sorted.iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["second", "first", "third"]);
        assert_eq!(sort_by(&sorted, "v", Direction::Asc, ColumnType::Number), sorted);
    }

    #[test]
    fn text_compares_case_insensitively() {
        let rows = vec![
            Cell("bob", CellValue::Absent),
            Cell("Alice", CellValue::Absent),
            Cell("carl", CellValue::Absent),
        ];
        let sorted = sort_by(&rows, "name", Direction::Asc, ColumnType::Text);
        let names: Vec<&str> = sorted.iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["Alice", "bob", "carl"]);
    }

    #[test]
    fn accented_text_sorts_by_base_letter() {
        let rows = vec![
            Cell("Zed", CellValue::Absent),
            Cell("Émile", CellValue::Absent),
            Cell("adam", CellValue::Absent),
            Cell("emile", CellValue::Absent),
        ];
        let sorted = sort_by(&rows, "name", Direction::Asc, ColumnType::Text);
        let names: Vec<&str> = sorted.iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["adam", "emile", "Émile", "Zed"]);
    }

    #[test]
    fn dates_compare_chronologically() {
        let d = |s| CellValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap());
        let rows = vec![
            Cell("x", d("2024-03-01")),
            Cell("y", d("2023-12-31")),
            Cell("z", d("2024-01-15")),
        ];
        let sorted = sort_by(&rows, "date", Direction::Desc, ColumnType::Date);
        let names: Vec<&str> = sorted.iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["x", "z", "y"]);
    }

    #[test]
    fn toggle_flips_or_resets_direction() {
        let mut state = SortState::default();
        state.toggle("total_calls");
        assert_eq!(state, SortState::new("total_calls", Direction::Asc));
        state.toggle("total_calls");
        assert_eq!(state.direction, Direction::Desc);
        state.toggle("total_sms");
        assert_eq!(state, SortState::new("total_sms", Direction::Asc));
    }

    #[test]
    fn column_types_are_inferred_from_names() {
        assert_eq!(ColumnType::infer("date"), ColumnType::Date);
        assert_eq!(ColumnType::infer("team_name"), ColumnType::Text);
        assert_eq!(ColumnType::infer("p50_new"), ColumnType::Number);
    }
}
