//! Column summary statistics, percentiles and heatmap rank buckets.

use std::cmp::Ordering;

use rodash_core::Cells;
use serde::{Deserialize, Serialize};

pub const HEAT_BUCKETS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Sum,
    Average,
    Median,
    Min,
    Max,
}

/// Summary of the finite values of one column. `count == 0` marks an empty
/// column whose zeros should be shown as N/A.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub sum: f64,
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl ColumnStats {
    pub fn get(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Sum => self.sum,
            Statistic::Average => self.average,
            Statistic::Median => self.median,
            Statistic::Min => self.min,
            Statistic::Max => self.max,
        }
    }
}

fn total_cmp(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

fn sorted_finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    finite.sort_by(total_cmp);
    finite
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

pub fn column_stats(values: &[f64]) -> ColumnStats {
    let sorted = sorted_finite(values.iter().copied());
    let Some((&min, &max)) = sorted.first().zip(sorted.last()) else {
        return ColumnStats::default();
    };
    let sum: f64 = sorted.iter().sum();
    ColumnStats {
        count: sorted.len(),
        sum,
        average: sum / sorted.len() as f64,
        median: median_of_sorted(&sorted),
        min,
        max,
    }
}

pub fn finite_column<R: Cells>(rows: &[R], column: &str) -> Vec<f64> {
    rows.iter().filter_map(|r| r.cell(column).as_finite()).collect()
}

pub fn column_stats_of<R: Cells>(rows: &[R], column: &str) -> ColumnStats {
    column_stats(&finite_column(rows, column))
}

/// Percentile `p` (0..=100) with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let sorted = sorted_finite(values.iter().copied());
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bucket", content = "rank", rename_all = "snake_case")]
pub enum HeatBucket {
    Neutral,
    /// Column holds a single distinct value.
    Uniform,
    Rank(u8),
}

#[derive(Debug, Clone)]
pub struct HeatScale {
    sorted: Vec<f64>,
    single_valued: bool,
}

impl HeatScale {
    pub fn new(column: &[Option<f64>]) -> Self {
        let sorted = sorted_finite(column.iter().flatten().copied());
        let single_valued = match (sorted.first(), sorted.last()) {
            (Some(lo), Some(hi)) => lo == hi,
            _ => true,
        };
        Self {
            sorted,
            single_valued,
        }
    }

    pub fn bucket(&self, value: Option<f64>) -> HeatBucket {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return HeatBucket::Neutral;
        };
        if self.single_valued {
            return HeatBucket::Uniform;
        }
        let position = self.sorted.partition_point(|stored| *stored < value);
        let fraction = position as f64 / (self.sorted.len() - 1) as f64;
        let rank = (fraction * HEAT_BUCKETS as f64).floor() as u8;
        HeatBucket::Rank(rank.min(HEAT_BUCKETS - 1))
    }
}

pub fn heat_bucket(value: Option<f64>, column: &[Option<f64>]) -> HeatBucket {
    HeatScale::new(column).bucket(value)
}

pub fn heat_column<R: Cells>(rows: &[R], column: &str) -> Vec<HeatBucket> {
    let values: Vec<Option<f64>> = rows.iter().map(|r| r.cell(column).as_finite()).collect();
    let scale = HeatScale::new(&values);
    values.iter().map(|v| scale.bucket(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_skip_non_finite_values() {
        let stats = column_stats(&[4.0, f64::INFINITY, 1.0, f64::NAN, 7.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 12.0);
        assert_eq!(stats.average, 4.0);
        assert_eq!(stats.median, 4.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 7.0);
    }

    #[test]
    fn empty_input_yields_zero_stats() {
        let stats = column_stats(&[]);
        assert_eq!(stats, ColumnStats::default());
        assert_eq!(stats.count, 0);
        assert_eq!(column_stats(&[f64::INFINITY]).count, 0);
    }

    #[test]
    fn even_median_averages_middle_pair() {
        assert_eq!(column_stats(&[1.0, 9.0, 3.0, 5.0]).median, 4.0);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 50.0), Some(30.0));
        assert_eq!(percentile(&values, 100.0), Some(50.0));
        assert_eq!(percentile(&values, 25.0), Some(20.0));
        assert_eq!(percentile(&values, 62.5), Some(35.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn heat_buckets_rank_by_sorted_position() {
        let column: Vec<Option<f64>> = (0..11).map(|v| Some(v as f64)).collect();
        assert_eq!(heat_bucket(Some(0.0), &column), HeatBucket::Rank(0));
        assert_eq!(heat_bucket(Some(5.0), &column), HeatBucket::Rank(5));
        assert_eq!(heat_bucket(Some(10.0), &column), HeatBucket::Rank(9));
    }

    #[test]
    fn heat_ties_take_first_matching_index() {
        let column = vec![Some(1.0), Some(3.0), Some(3.0), Some(3.0), Some(9.0)];
        // first index with stored >= 3 is 1 of 4
        assert_eq!(heat_bucket(Some(3.0), &column), HeatBucket::Rank(2));
    }

    #[test]
    fn neutral_and_uniform_buckets() {
        let column = vec![Some(2.0), None, Some(2.0)];
        assert_eq!(heat_bucket(None, &column), HeatBucket::Neutral);
        assert_eq!(heat_bucket(Some(f64::INFINITY), &column), HeatBucket::Neutral);
        assert_eq!(heat_bucket(Some(2.0), &column), HeatBucket::Uniform);
    }
}
