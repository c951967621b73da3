//! View pipelines: filter, shape, sort, summarize and tag one table.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use rodash_core::{
    ActivityRecord, Cells, Counter, Dimension, DocumentKind, DocumentRecord, EngageColumn,
    EventKind, EventRecord, LeadAge, LeadAssignmentStub, MilestoneRecord, TimeToEngageRecord,
    DERIVED_COLUMNS, HOT_LEADS, NEW_LEADS, OLD_LEADS, TOTAL_DOCUMENTS, TOTAL_NEW_LEADS_HELD,
    TOTAL_OLD_LEADS_HELD,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::aggregate::{
    aggregate_activity, aggregate_documents, aggregate_leads, aggregate_time_to_engage,
    chart_series, event_heatmap, ActivitySummary, ChartSeries, DocumentSummary, HeatCell,
    LeadSummary, TimeToEngageSummary, ViewMode, ACTIVE_DAYS,
};
use crate::detector::{tag_rows, ActivityPeers, DetectionContext, DetectorRule};
use crate::filter::{filter, FilterCriteria};
use crate::sort::SortState;
use crate::stats::{column_stats_of, heat_column, ColumnStats, HeatBucket, HeatScale};

fn default_group_key() -> Dimension {
    Dimension::Recruiter
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRequest {
    #[serde(default)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub mode: ViewMode,
    #[serde(default = "default_group_key")]
    pub group_key: Dimension,
    #[serde(default)]
    pub sort: SortState,
    #[serde(default)]
    pub lead_age: Option<LeadAge>,
    #[serde(default)]
    pub chart_column: Option<String>,
}

impl Default for ViewRequest {
    fn default() -> Self {
        Self {
            criteria: FilterCriteria::default(),
            mode: ViewMode::default(),
            group_key: default_group_key(),
            sort: SortState::default(),
            lead_age: None,
            chart_column: None,
        }
    }
}

impl ViewRequest {
    fn label_column(&self) -> &'static str {
        if self.mode.is_grouped() {
            self.group_key.field()
        } else {
            "date"
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Detection<'a> {
    pub rules: &'a [DetectorRule],
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewOutput<T> {
    pub rows: Vec<T>,
    pub columns: Vec<String>,
    pub summary: BTreeMap<String, ColumnStats>,
    pub heat: BTreeMap<String, Vec<HeatBucket>>,
    pub chart: Option<ChartSeries>,
    /// Detector tag per row, aligned with `rows`; empty when no rules ran.
    pub tags: Vec<Option<String>>,
}

fn finish<T: Cells + Clone>(
    rows: Vec<T>,
    columns: Vec<String>,
    request: &ViewRequest,
) -> ViewOutput<T> {
    let rows = request.sort.apply(&rows);
    let summary = columns
        .iter()
        .map(|c| (c.clone(), column_stats_of(&rows, c)))
        .collect();
    let heat = columns
        .iter()
        .map(|c| (c.clone(), heat_column(&rows, c)))
        .collect();
    let chart = request
        .chart_column
        .as_deref()
        .map(|column| chart_series(&rows, request.label_column(), column));
    ViewOutput {
        rows,
        columns,
        summary,
        heat,
        chart,
        tags: Vec::new(),
    }
}

fn with_days(mut columns: Vec<String>, mode: ViewMode) -> Vec<String> {
    if mode.is_grouped() {
        columns.push(ACTIVE_DAYS.to_string());
    }
    columns
}

pub fn activity_columns() -> Vec<String> {
    Counter::ALL
        .iter()
        .map(|c| c.column())
        .chain(DERIVED_COLUMNS)
        .map(str::to_string)
        .collect()
}

pub fn activity_view(
    records: &[ActivityRecord],
    request: &ViewRequest,
    detection: Option<Detection<'_>>,
) -> ViewOutput<ActivitySummary> {
    let filtered = filter(records, &request.criteria);
    let rows = aggregate_activity(&filtered, request.group_key, request.mode);
    let mut output = finish(rows, with_days(activity_columns(), request.mode), request);
    if let Some(detection) = detection.filter(|d| !d.rules.is_empty()) {
        let peers = ActivityPeers {
            records,
            mode: request.mode,
            group_key: request.group_key,
        };
        let ctx = DetectionContext {
            peers: &peers,
            view: &request.criteria,
            today: detection.today,
        };
        output.tags = tag_rows(&output.rows, detection.rules, &ctx);
    }
    debug!(rows = output.rows.len(), mode = ?request.mode, "activity view");
    output
}

pub fn lead_view(records: &[LeadAssignmentStub], request: &ViewRequest) -> ViewOutput<LeadSummary> {
    let filtered = filter(records, &request.criteria);
    let rows = aggregate_leads(&filtered, request.group_key, request.mode, request.criteria.to);
    let columns = [
        NEW_LEADS,
        OLD_LEADS,
        HOT_LEADS,
        TOTAL_NEW_LEADS_HELD,
        TOTAL_OLD_LEADS_HELD,
    ]
    .map(str::to_string)
    .to_vec();
    let output = finish(rows, with_days(columns, request.mode), request);
    debug!(rows = output.rows.len(), "lead view");
    output
}

/// Grid columns shown for a lead-age selection: that age only, or all thirty.
pub fn engage_columns(lead_age: Option<LeadAge>) -> Vec<String> {
    EngageColumn::all()
        .filter(|c| lead_age.map_or(true, |age| c.age == age))
        .map(EngageColumn::name)
        .collect()
}

pub fn time_to_engage_view(
    records: &[TimeToEngageRecord],
    request: &ViewRequest,
) -> ViewOutput<TimeToEngageSummary> {
    let filtered = filter(records, &request.criteria);
    let rows = aggregate_time_to_engage(&filtered, request.group_key, request.mode, request.lead_age);
    let output = finish(rows, engage_columns(request.lead_age), request);
    debug!(rows = output.rows.len(), "time-to-engage view");
    output
}

pub fn document_view(records: &[DocumentRecord], request: &ViewRequest) -> ViewOutput<DocumentSummary> {
    let filtered = filter(records, &request.criteria);
    let rows = aggregate_documents(&filtered, request.group_key, request.mode);
    let columns = DocumentKind::ALL
        .iter()
        .map(|k| k.prefix())
        .chain([TOTAL_DOCUMENTS])
        .map(str::to_string)
        .collect();
    let output = finish(rows, with_days(columns, request.mode), request);
    debug!(rows = output.rows.len(), "document view");
    output
}

/// Arrivals and drug tests are listed row by row; numeric pass-through
/// fields become summary columns.
pub fn milestone_view(records: &[MilestoneRecord], request: &ViewRequest) -> ViewOutput<MilestoneRecord> {
    let rows = filter(records, &request.criteria);
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for (key, value) in &row.extra {
            if matches!(value, JsonValue::Number(_)) && !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns.sort();
    let stub = ViewRequest {
        mode: ViewMode::Stub,
        ..request.clone()
    };
    finish(rows, columns, &stub)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkingHoursOutput {
    pub events: ViewOutput<EventRecord>,
    pub heatmap: Vec<HeatCell>,
    pub heat: Vec<HeatBucket>,
    pub hourly_calls: ChartSeries,
}

pub fn working_hours_view(events: &[EventRecord], request: &ViewRequest) -> WorkingHoursOutput {
    let filtered = filter(events, &request.criteria);
    let heatmap = event_heatmap(&filtered);
    let counts: Vec<Option<f64>> = heatmap.iter().map(|c| Some(c.events() as f64)).collect();
    let scale = HeatScale::new(&counts);
    let heat = counts.iter().map(|v| scale.bucket(*v)).collect();

    let mut hourly = [0.0f64; 24];
    for event in &filtered {
        if matches!(event.kind, EventKind::Call { .. }) {
            hourly[event.timestamp.hour() as usize] += 1.0;
        }
    }
    let hourly_calls = ChartSeries {
        labels: (0..24).map(|h| format!("{h:02}:00")).collect(),
        data: hourly.to_vec(),
    };

    let stub = ViewRequest {
        mode: ViewMode::Stub,
        chart_column: None,
        ..request.clone()
    };
    let events = finish(filtered, vec!["duration_seconds".to_string()], &stub);
    debug!(events = events.rows.len(), "working-hours view");
    WorkingHoursOutput {
        events,
        heatmap,
        heat,
        hourly_calls,
    }
}
