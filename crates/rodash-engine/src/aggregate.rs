//! Group-by aggregation for every view, plus heatmap and chart shaping.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, Timelike};
use rodash_core::{
    ActivityCounters, ActivityRecord, CellValue, Cells, Dimension, DocumentCounts, DocumentKind,
    DocumentRecord, Engage, EngageColumn, EngageGrid, EventKind, EventRecord, LeadAge,
    LeadAssignmentStub, Row, TimeToEngageRecord, HOT_LEADS, NEW_LEADS, OLD_LEADS, TEAM_NAME,
    TOTAL_DOCUMENTS, TOTAL_NEW_LEADS_HELD, TOTAL_OLD_LEADS_HELD,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const UNASSIGNED: &str = "Unassigned";

pub const ACTIVE_DAYS: &str = "active_days";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Stub,
    #[default]
    Aggregated,
    /// One row per group, counters averaged per active day.
    Average,
}

impl ViewMode {
    pub fn is_grouped(self) -> bool {
        !matches!(self, ViewMode::Stub)
    }
}

struct Group<'a, R> {
    label: String,
    team_name: String,
    rows: Vec<&'a R>,
}

impl<R: Row> Group<'_, R> {
    fn active_days(&self) -> usize {
        self.rows.iter().map(|r| r.day()).collect::<BTreeSet<_>>().len()
    }
}

fn group_label<R: Row + ?Sized>(row: &R, key: Dimension) -> String {
    row.attribute(key.field())
        .filter(|v| !v.is_empty())
        .unwrap_or(UNASSIGNED)
        .to_string()
}

fn team_of<R: Row + ?Sized>(row: &R) -> String {
    row.attribute(TEAM_NAME).unwrap_or_default().to_string()
}

/// Groups in label order; each group's team is the first one seen.
fn group_by<R: Row>(records: &[R], key: Dimension) -> Vec<Group<'_, R>> {
    let mut groups: BTreeMap<String, Group<'_, R>> = BTreeMap::new();
    for row in records {
        let label = group_label(row, key);
        groups
            .entry(label.clone())
            .or_insert_with(|| Group {
                label,
                team_name: team_of(row),
                rows: Vec::new(),
            })
            .rows
            .push(row);
    }
    groups.into_values().collect()
}

fn identity_cell(column: &str, key: Dimension, group: &str, team_name: &str) -> Option<CellValue> {
    if column == key.field() {
        Some(CellValue::from(group))
    } else if column == TEAM_NAME {
        Some(CellValue::from(team_name))
    } else {
        None
    }
}

fn date_cell(date: Option<NaiveDate>) -> CellValue {
    date.map_or(CellValue::Absent, CellValue::Date)
}

fn per_day(value: f64, days: usize) -> f64 {
    rodash_core::ratio(value, days as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub key: Dimension,
    pub group: String,
    pub team_name: String,
    pub date: Option<NaiveDate>,
    pub days: usize,
    pub counters: ActivityCounters,
}

impl Cells for ActivitySummary {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return date_cell(self.date);
        }
        if column == ACTIVE_DAYS {
            return CellValue::Number(self.days as f64);
        }
        if let Some(cell) = identity_cell(column, self.key, &self.group, &self.team_name) {
            return cell;
        }
        self.counters.value(column).into()
    }
}

pub fn aggregate_activity(
    records: &[ActivityRecord],
    key: Dimension,
    mode: ViewMode,
) -> Vec<ActivitySummary> {
    if !mode.is_grouped() {
        return records
            .iter()
            .map(|r| ActivitySummary {
                key,
                group: group_label(r, key),
                team_name: r.team_name.clone(),
                date: Some(r.date),
                days: 1,
                counters: r.counters,
            })
            .collect();
    }
    group_by(records, key)
        .into_iter()
        .map(|group| {
            let days = group.active_days();
            let mut counters = ActivityCounters::default();
            for row in &group.rows {
                counters.accumulate(&row.counters);
            }
            if mode == ViewMode::Average {
                for counter in rodash_core::Counter::ALL {
                    counters.set(counter, per_day(counters.get(counter), days));
                }
            }
            ActivitySummary {
                key,
                group: group.label,
                team_name: group.team_name,
                date: None,
                days,
                counters,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadSummary {
    pub key: Dimension,
    pub group: String,
    pub team_name: String,
    pub date: Option<NaiveDate>,
    pub days: usize,
    pub new_leads: f64,
    pub old_leads: f64,
    pub hot_leads: f64,
    /// Portfolio snapshot on the as-of day; `None` when the group has no row that day.
    pub total_new_leads_held: Option<f64>,
    pub total_old_leads_held: Option<f64>,
}

impl Cells for LeadSummary {
    fn cell(&self, column: &str) -> CellValue {
        match column {
            "date" => date_cell(self.date),
            ACTIVE_DAYS => CellValue::Number(self.days as f64),
            NEW_LEADS => self.new_leads.into(),
            OLD_LEADS => self.old_leads.into(),
            HOT_LEADS => self.hot_leads.into(),
            TOTAL_NEW_LEADS_HELD => self.total_new_leads_held.into(),
            TOTAL_OLD_LEADS_HELD => self.total_old_leads_held.into(),
            other => identity_cell(other, self.key, &self.group, &self.team_name)
                .unwrap_or(CellValue::Absent),
        }
    }
}

/// Day whose snapshot counters represent the window: its upper bound, or
/// the latest day present when the window is open-ended.
pub fn lead_as_of(records: &[LeadAssignmentStub], window_to: Option<NaiveDate>) -> Option<NaiveDate> {
    window_to.or_else(|| records.iter().map(|r| r.date).max())
}

/// Flows (`new`, `old`, `hot`) are summed over the window; the `*_held`
/// snapshot comes only from the as-of day and is never summed across days.
pub fn aggregate_leads(
    records: &[LeadAssignmentStub],
    key: Dimension,
    mode: ViewMode,
    window_to: Option<NaiveDate>,
) -> Vec<LeadSummary> {
    if !mode.is_grouped() {
        return records
            .iter()
            .map(|r| LeadSummary {
                key,
                group: group_label(r, key),
                team_name: r.team_name.clone(),
                date: Some(r.date),
                days: 1,
                new_leads: r.new_leads,
                old_leads: r.old_leads,
                hot_leads: r.hot_leads,
                total_new_leads_held: Some(r.total_new_leads_held),
                total_old_leads_held: Some(r.total_old_leads_held),
            })
            .collect();
    }
    let as_of = lead_as_of(records, window_to);
    group_by(records, key)
        .into_iter()
        .map(|group| {
            let days = group.active_days();
            let sum = |f: fn(&LeadAssignmentStub) -> f64| group.rows.iter().map(|r| f(r)).sum::<f64>();
            let (mut new_leads, mut old_leads, mut hot_leads) =
                (sum(|r| r.new_leads), sum(|r| r.old_leads), sum(|r| r.hot_leads));
            if mode == ViewMode::Average {
                new_leads = per_day(new_leads, days);
                old_leads = per_day(old_leads, days);
                hot_leads = per_day(hot_leads, days);
            }
            let snapshot: Vec<&&LeadAssignmentStub> = group
                .rows
                .iter()
                .filter(|r| Some(r.date) == as_of)
                .collect();
            let held = |f: fn(&LeadAssignmentStub) -> f64| {
                (!snapshot.is_empty()).then(|| snapshot.iter().map(|r| f(r)).sum::<f64>())
            };
            LeadSummary {
                key,
                team_name: group.team_name.clone(),
                date: None,
                days,
                new_leads,
                old_leads,
                hot_leads,
                total_new_leads_held: held(|r| r.total_new_leads_held),
                total_old_leads_held: held(|r| r.total_old_leads_held),
                group: group.label.clone(),
            }
        })
        .collect()
}

/// Median over engage states: finite values ascending, `Never` appended as
/// +inf, `Absent` excluded.
pub fn engage_median(values: &[Engage]) -> Engage {
    let mut ordered: Vec<f64> = values
        .iter()
        .filter_map(|v| match v {
            Engage::Minutes(m) if m.is_finite() => Some(*m),
            _ => None,
        })
        .collect();
    ordered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let never = values
        .iter()
        .filter(|v| matches!(v, Engage::Never) || matches!(v, Engage::Minutes(m) if m.is_infinite()))
        .count();
    ordered.extend(std::iter::repeat(f64::INFINITY).take(never));

    let n = ordered.len();
    if n == 0 {
        return Engage::Absent;
    }
    let as_engage = |v: f64| if v.is_finite() { Engage::Minutes(v) } else { Engage::Never };
    if n % 2 == 1 {
        return as_engage(ordered[n / 2]);
    }
    let (lo, hi) = (ordered[n / 2 - 1], ordered[n / 2]);
    if lo.is_finite() && hi.is_finite() {
        Engage::Minutes((lo + hi) / 2.0)
    } else {
        Engage::Never
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeToEngageSummary {
    pub key: Dimension,
    pub group: String,
    pub team_name: String,
    pub date: Option<NaiveDate>,
    pub days: usize,
    pub grid: EngageGrid,
}

impl TimeToEngageSummary {
    fn has_values_for(&self, age: LeadAge) -> bool {
        EngageColumn::all()
            .filter(|c| c.age == age)
            .any(|c| !self.grid.get(c).is_absent())
    }
}

impl Cells for TimeToEngageSummary {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return date_cell(self.date);
        }
        if column == ACTIVE_DAYS {
            return CellValue::Number(self.days as f64);
        }
        if let Some(col) = EngageColumn::parse(column) {
            return self.grid.get(col).into();
        }
        identity_cell(column, self.key, &self.group, &self.team_name).unwrap_or(CellValue::Absent)
    }
}

/// Grouped modes take the per-cell median; averaging engage times is not
/// meaningful with the `Never` sentinel, so `Average` behaves like `Aggregated`.
pub fn aggregate_time_to_engage(
    records: &[TimeToEngageRecord],
    key: Dimension,
    mode: ViewMode,
    lead_age: Option<LeadAge>,
) -> Vec<TimeToEngageSummary> {
    if !mode.is_grouped() {
        return records
            .iter()
            .map(|r| TimeToEngageSummary {
                key,
                group: group_label(r, key),
                team_name: r.team_name.clone(),
                date: Some(r.date),
                days: 1,
                grid: r.grid,
            })
            .collect();
    }
    group_by(records, key)
        .into_iter()
        .filter_map(|group| {
            let days = group.active_days();
            let mut grid = EngageGrid::default();
            for column in EngageColumn::all() {
                let values: Vec<Engage> = group.rows.iter().map(|r| r.grid.get(column)).collect();
                grid.set(column, engage_median(&values));
            }
            let summary = TimeToEngageSummary {
                key,
                group: group.label,
                team_name: group.team_name,
                date: None,
                days,
                grid,
            };
            match lead_age {
                Some(age) if !summary.has_values_for(age) => {
                    debug!(group = %summary.group, age = age.suffix(), "dropping group without engage values");
                    None
                }
                _ => Some(summary),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub key: Dimension,
    pub group: String,
    pub team_name: String,
    pub date: Option<NaiveDate>,
    pub days: usize,
    pub counts: DocumentCounts,
}

impl Cells for DocumentSummary {
    fn cell(&self, column: &str) -> CellValue {
        match column {
            "date" => date_cell(self.date),
            ACTIVE_DAYS => CellValue::Number(self.days as f64),
            TOTAL_DOCUMENTS => CellValue::Number(self.counts.total()),
            other => match DocumentKind::from_prefix(other) {
                Some(kind) => CellValue::Number(self.counts.get(kind)),
                None => identity_cell(other, self.key, &self.group, &self.team_name)
                    .unwrap_or(CellValue::Absent),
            },
        }
    }
}

pub fn aggregate_documents(
    records: &[DocumentRecord],
    key: Dimension,
    mode: ViewMode,
) -> Vec<DocumentSummary> {
    if !mode.is_grouped() {
        return records
            .iter()
            .map(|r| DocumentSummary {
                key,
                group: group_label(r, key),
                team_name: r.team_name.clone(),
                date: Some(r.date),
                days: 1,
                counts: r.counts,
            })
            .collect();
    }
    group_by(records, key)
        .into_iter()
        .map(|group| {
            let days = group.active_days();
            let mut counts = DocumentCounts::default();
            for row in &group.rows {
                for kind in DocumentKind::ALL {
                    counts.add(kind, row.counts.get(kind));
                }
            }
            if mode == ViewMode::Average {
                let totals = counts;
                counts = DocumentCounts::default();
                for kind in DocumentKind::ALL {
                    counts.add(kind, per_day(totals.get(kind), days));
                }
            }
            DocumentSummary {
                key,
                group: group.label,
                team_name: group.team_name,
                date: None,
                days,
                counts,
            }
        })
        .collect()
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatCell {
    /// 0 = Monday.
    pub weekday: u8,
    pub hour: u8,
    pub calls: usize,
    pub sms: usize,
    pub call_seconds: f64,
    pub tooltip: String,
}

impl HeatCell {
    pub fn events(&self) -> usize {
        self.calls + self.sms
    }
}

impl Cells for HeatCell {
    fn cell(&self, column: &str) -> CellValue {
        match column {
            "weekday" => CellValue::from(WEEKDAYS[usize::from(self.weekday) % 7]),
            "hour" => CellValue::Number(f64::from(self.hour)),
            "calls" => CellValue::Number(self.calls as f64),
            "sms" => CellValue::Number(self.sms as f64),
            "events" => CellValue::Number(self.events() as f64),
            "call_seconds" => CellValue::Number(self.call_seconds),
            _ => CellValue::Absent,
        }
    }
}

fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    match (total / 3600, (total % 3600) / 60, total % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}

/// All 7 x 24 cells, Monday 00:00 first, including empty ones.
pub fn event_heatmap(events: &[EventRecord]) -> Vec<HeatCell> {
    let mut tallies = [[(0usize, 0usize, 0.0f64); 24]; 7];
    for event in events {
        let weekday = event.timestamp.weekday().num_days_from_monday() as usize;
        let hour = event.timestamp.hour() as usize;
        let slot = &mut tallies[weekday][hour];
        match &event.kind {
            EventKind::Call {
                duration_seconds, ..
            } => {
                slot.0 += 1;
                slot.2 += duration_seconds;
            }
            EventKind::Sms { .. } => slot.1 += 1,
        }
    }
    let mut cells = Vec::with_capacity(7 * 24);
    for (weekday, hours) in tallies.iter().enumerate() {
        for (hour, &(calls, sms, call_seconds)) in hours.iter().enumerate() {
            let tooltip = format!(
                "{} {:02}:00-{:02}:59: {} calls ({}), {} sms",
                WEEKDAYS[weekday],
                hour,
                hour,
                calls,
                format_seconds(call_seconds),
                sms
            );
            cells.push(HeatCell {
                weekday: weekday as u8,
                hour: hour as u8,
                calls,
                sms,
                call_seconds,
                tooltip,
            });
        }
    }
    cells
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

fn label_of(cell: CellValue) -> Option<String> {
    match cell {
        CellValue::Text(s) => Some(s),
        CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        CellValue::Instant(t) => Some(t.to_rfc3339()),
        CellValue::Number(n) if n.is_finite() => Some(n.to_string()),
        _ => None,
    }
}

pub fn chart_series<R: Cells>(rows: &[R], label_column: &str, value_column: &str) -> ChartSeries {
    let mut series = ChartSeries::default();
    for row in rows {
        let Some(value) = row.cell(value_column).as_finite() else {
            continue;
        };
        let Some(label) = label_of(row.cell(label_column)) else {
            continue;
        };
        series.labels.push(label);
        series.data.push(value);
    }
    series
}

pub fn daily_trend<R: Row>(rows: &[R], column: &str) -> ChartSeries {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in rows {
        if let Some(value) = row.cell(column).as_finite() {
            *by_day.entry(row.day()).or_default() += value;
        }
    }
    ChartSeries {
        labels: by_day.keys().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
        data: by_day.into_values().collect(),
    }
}
