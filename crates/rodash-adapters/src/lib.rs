//! Source adapter contracts + per-source normalizers from raw JSON payloads
//! into canonical records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rodash_core::{
    ActivityCounters, ActivityRecord, Counter, DocumentCounts, DocumentKind, DocumentOrigin,
    DocumentRecord, Engage, EngageColumn, EngageGrid, EventKind, EventRecord, LeadAssignmentStub,
    MilestoneKind, MilestoneRecord, Normalized, SourceKind, TimeToEngageRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "rodash-adapters";

const RECRUITER_ALIASES: &[&str] = &["recruiter_name", "recruiter", "profiler", "profiler_name"];
const TEAM_ALIASES: &[&str] = &["team_name", "team"];
const COMPANY_ALIASES: &[&str] = &["company_name", "company"];
const CONTRACT_ALIASES: &[&str] = &["contract_type", "contract"];
const DATE_ALIASES: &[&str] = &["date", "day"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("{kind} payload is not {expected}")]
    Shape {
        kind: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Company code (suffix of wide document columns) to display name.
    #[serde(default = "default_company_codes")]
    pub company_codes: BTreeMap<String, String>,
}

fn default_company_codes() -> BTreeMap<String, String> {
    BTreeMap::from([("eb".to_string(), "EB Infinity".to_string())])
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            company_codes: default_company_codes(),
        }
    }
}

impl NormalizerConfig {
    pub fn company_name(&self, code: &str) -> String {
        self.company_codes
            .get(&code.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| code.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub kind: SourceKind,
    pub records: Normalized,
    pub skipped_rows: usize,
}

impl NormalizedBatch {
    pub fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            records: Normalized::empty(kind),
            skipped_rows: 0,
        }
    }
}

pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn envelope_keys(&self) -> &'static [&'static str];

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError>;

    fn parse_payload(&self, payload: &JsonValue) -> Result<NormalizedBatch, AdapterError> {
        let rows = extract_rows(payload, self.envelope_keys());
        if rows.is_empty() && !payload.is_array() && !payload.is_object() {
            return Err(AdapterError::Shape {
                kind: self.kind().as_str(),
                expected: "an array or an enveloped array",
            });
        }
        self.parse_rows(rows)
    }
}

/// Rows of a payload: the first envelope property holding an array, else the
/// payload itself when it is an array, else nothing.
pub fn extract_rows<'a>(payload: &'a JsonValue, envelope_keys: &[&str]) -> &'a [JsonValue] {
    for key in envelope_keys {
        if let Some(rows) = payload.get(*key).and_then(JsonValue::as_array) {
            return rows;
        }
    }
    match payload.as_array() {
        Some(rows) => rows,
        None => &[],
    }
}

/// `Number(x) || 0`: missing, null, non-numeric and non-finite become 0.
pub fn coerce_number(value: Option<&JsonValue>) -> f64 {
    let parsed = match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Some(JsonValue::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn lookup<'a>(row: &'a JsonValue, aliases: &[&str]) -> Option<&'a JsonValue> {
    aliases
        .iter()
        .filter_map(|key| row.get(*key))
        .find(|v| !v.is_null())
}

fn number_field(row: &JsonValue, aliases: &[&str]) -> f64 {
    coerce_number(lookup(row, aliases))
}

fn text_field(row: &JsonValue, aliases: &[&str]) -> String {
    match lookup(row, aliases) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn optional_text_field(row: &JsonValue, aliases: &[&str]) -> Option<String> {
    let text = text_field(row, aliases);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn parse_day(value: &JsonValue) -> Option<NaiveDate> {
    if let Some(text) = value.as_str() {
        let text = text.trim();
        if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Some(day);
        }
    }
    parse_instant(value).map(|ts| ts.date_naive())
}

/// Instant of a timestamp value. Naive forms are read as UTC; numbers are epoch milliseconds.
pub fn parse_instant(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(text) => {
            let text = text.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Some(ts.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|day| day.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        JsonValue::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Time-to-engage cell: number is minutes, `never`/`inf` is the sentinel,
/// anything else (null, blank, negative, garbage) is absence.
pub fn parse_engage(value: Option<&JsonValue>) -> Engage {
    match value {
        Some(JsonValue::Number(n)) => match n.as_f64() {
            Some(m) if m.is_finite() && m >= 0.0 => Engage::Minutes(m),
            _ => Engage::Absent,
        },
        Some(JsonValue::String(s)) => {
            let lower = s.trim().to_ascii_lowercase();
            match lower.as_str() {
                "never" | "inf" | "infinity" | "∞" => Engage::Never,
                "" | "-" | "n/a" | "na" | "null" => Engage::Absent,
                other => match other.parse::<f64>() {
                    Ok(m) if m.is_finite() && m >= 0.0 => Engage::Minutes(m),
                    _ => Engage::Absent,
                },
            }
        }
        _ => Engage::Absent,
    }
}

fn row_day(row: &JsonValue, aliases: &[&str]) -> Option<NaiveDate> {
    lookup(row, aliases).and_then(parse_day)
}

fn counter_aliases(counter: Counter) -> &'static [&'static str] {
    match counter {
        Counter::TotalPhoneReveals => &["total_phone_reveals", "phone_reveals"],
        Counter::UniquePhoneReveals => &["unique_phone_reveals"],
        Counter::TotalCalls => &["total_calls", "calls"],
        Counter::UniqueCalls => &["unique_calls"],
        Counter::CallDurationSeconds => &["call_duration_seconds", "call_duration"],
        Counter::TotalSms => &["total_sms", "sms"],
        Counter::UniqueSms => &["unique_sms"],
        Counter::NewLeadsAssigned => &["new_leads_assigned", "new_leads"],
        Counter::OldLeadsAssigned => &["old_leads_assigned", "old_leads"],
        Counter::HotLeadsAssigned => &["hot_leads_assigned", "hot_leads"],
        Counter::ProfiledTotal => &["profiled_total", "profiled"],
        Counter::ProfiledUnique => &["profiled_unique"],
    }
}

fn collect_rows<T>(
    kind: SourceKind,
    rows: &[JsonValue],
    parse: impl Fn(&JsonValue) -> Option<T>,
) -> (Vec<T>, usize) {
    let mut out = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for (idx, row) in rows.iter().enumerate() {
        match row.is_object().then(|| parse(row)).flatten() {
            Some(record) => out.push(record),
            None => {
                skipped += 1;
                debug!(source = kind.as_str(), row = idx, "skipping unparsable row");
            }
        }
    }
    (out, skipped)
}

#[derive(Debug, Clone, Copy)]
struct ActivityAdapter;

#[derive(Debug, Clone, Copy)]
struct WorkingHoursAdapter;

#[derive(Debug, Clone, Copy)]
struct LeadAssignmentAdapter;

#[derive(Debug, Clone, Copy)]
struct LeadLifecycleAdapter;

#[derive(Debug, Clone)]
struct DocumentCollectionAdapter {
    config: NormalizerConfig,
}

#[derive(Debug, Clone, Copy)]
struct MilestoneAdapter {
    kind: SourceKind,
    milestone: MilestoneKind,
}

fn parse_activity_row(row: &JsonValue) -> Option<ActivityRecord> {
    let date = row_day(row, DATE_ALIASES)?;
    let mut counters = ActivityCounters::default();
    for counter in Counter::ALL {
        counters.set(counter, number_field(row, counter_aliases(counter)));
    }
    Some(ActivityRecord {
        date,
        recruiter_name: text_field(row, RECRUITER_ALIASES),
        team_name: text_field(row, TEAM_ALIASES),
        company_name: text_field(row, COMPANY_ALIASES),
        contract_type: text_field(row, CONTRACT_ALIASES),
        counters,
    })
}

impl SourceAdapter for ActivityAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Activity
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        &["data"]
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let (records, skipped_rows) = collect_rows(self.kind(), rows, parse_activity_row);
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::Activity(records),
            skipped_rows,
        })
    }
}

fn parse_event_row(row: &JsonValue) -> Option<EventRecord> {
    let timestamp = lookup(row, &["timestamp", "created_at", "event_time", "date"])
        .and_then(parse_instant)?;
    let event_type = text_field(row, &["event_type", "type"]).trim().to_ascii_lowercase();
    let kind = match event_type.as_str() {
        "call" => EventKind::Call {
            call_type: text_field(row, &["call_type", "direction"]),
            status: text_field(row, &["status", "call_status"]),
            duration_seconds: number_field(row, &["duration_seconds", "duration", "call_duration"]),
        },
        "sms" => EventKind::Sms {
            sms_type: text_field(row, &["sms_type", "direction"]),
            status: text_field(row, &["status", "sms_status"]),
        },
        _ => return None,
    };
    Some(EventRecord {
        timestamp,
        recruiter_name: text_field(row, RECRUITER_ALIASES),
        team_name: text_field(row, TEAM_ALIASES),
        company_name: text_field(row, COMPANY_ALIASES),
        kind,
    })
}

impl SourceAdapter for WorkingHoursAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::WorkingHours
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        &["events", "data"]
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let (records, skipped_rows) = collect_rows(self.kind(), rows, parse_event_row);
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::Events(records),
            skipped_rows,
        })
    }
}

fn parse_lead_assignment_row(row: &JsonValue) -> Option<LeadAssignmentStub> {
    let date = row_day(row, DATE_ALIASES)?;
    Some(LeadAssignmentStub {
        date,
        recruiter_name: text_field(row, RECRUITER_ALIASES),
        team_name: text_field(row, TEAM_ALIASES),
        new_leads: number_field(row, &["new_leads", "new_leads_assigned"]),
        old_leads: number_field(row, &["old_leads", "old_leads_assigned"]),
        hot_leads: number_field(row, &["hot_leads", "hot_leads_assigned"]),
        total_new_leads_held: number_field(row, &["total_new_leads_held", "total_new_leads"]),
        total_old_leads_held: number_field(row, &["total_old_leads_held", "total_old_leads"]),
    })
}

impl SourceAdapter for LeadAssignmentAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::LeadAssignments
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        &["data"]
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let (records, skipped_rows) = collect_rows(self.kind(), rows, parse_lead_assignment_row);
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::LeadAssignments(records),
            skipped_rows,
        })
    }
}

fn parse_time_to_engage_row(row: &JsonValue) -> Option<TimeToEngageRecord> {
    let date = row_day(row, DATE_ALIASES)?;
    let mut grid = EngageGrid::default();
    for column in EngageColumn::all() {
        grid.set(column, parse_engage(row.get(column.name())));
    }
    Some(TimeToEngageRecord {
        date,
        recruiter_name: text_field(row, RECRUITER_ALIASES),
        team_name: text_field(row, TEAM_ALIASES),
        grid,
    })
}

impl SourceAdapter for LeadLifecycleAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::LeadLifecycle
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        &["data"]
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let (records, skipped_rows) = collect_rows(self.kind(), rows, parse_time_to_engage_row);
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::TimeToEngage(records),
            skipped_rows,
        })
    }
}

const DOCUMENT_SECTIONS: [(&str, DocumentOrigin); 3] = [
    ("mvr_psp_cdl", DocumentOrigin::Collection),
    ("recruiter_capture", DocumentOrigin::RecruiterCapture),
    ("profiler_capture", DocumentOrigin::ProfilerCapture),
];

impl DocumentCollectionAdapter {
    /// Explodes one wide row (`{doc}_{CONTRACT}_{company}` columns) into one
    /// record per combination with at least one non-zero count.
    fn explode_row(&self, row: &JsonValue, origin: DocumentOrigin) -> Option<Vec<DocumentRecord>> {
        let date = row_day(row, DATE_ALIASES)?;
        let object = row.as_object()?;
        let mut combos: BTreeMap<(String, String), DocumentCounts> = BTreeMap::new();
        for (key, value) in object {
            let mut parts = key.splitn(3, '_');
            let (Some(prefix), Some(contract), Some(code)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Some(kind) = DocumentKind::from_prefix(prefix) else {
                continue;
            };
            combos
                .entry((contract.to_string(), self.config.company_name(code)))
                .or_default()
                .add(kind, coerce_number(Some(value)));
        }

        let recruiter_name = text_field(row, RECRUITER_ALIASES);
        let team_name = text_field(row, TEAM_ALIASES);
        Some(
            combos
                .into_iter()
                .filter(|(_, counts)| !counts.is_zero())
                .map(|((contract_type, company_name), counts)| DocumentRecord {
                    date,
                    origin,
                    recruiter_name: recruiter_name.clone(),
                    team_name: team_name.clone(),
                    company_name,
                    contract_type,
                    counts,
                })
                .collect(),
        )
    }

    fn explode_section(&self, rows: &[JsonValue], origin: DocumentOrigin) -> (Vec<DocumentRecord>, usize) {
        let (nested, skipped) = collect_rows(self.kind(), rows, |row| self.explode_row(row, origin));
        (nested.into_iter().flatten().collect(), skipped)
    }
}

impl SourceAdapter for DocumentCollectionAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DocumentCollection
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        &["mvr_psp_cdl"]
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let (records, skipped_rows) = self.explode_section(rows, DocumentOrigin::Collection);
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::Documents(records),
            skipped_rows,
        })
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<NormalizedBatch, AdapterError> {
        if payload.is_array() {
            return self.parse_rows(extract_rows(payload, &[]));
        }
        let body = match payload.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => payload,
        };
        if !body.is_object() {
            return Err(AdapterError::Shape {
                kind: self.kind().as_str(),
                expected: "an object with mvr_psp_cdl/recruiter_capture/profiler_capture arrays",
            });
        }

        let mut records = Vec::new();
        let mut skipped_rows = 0usize;
        for (key, origin) in DOCUMENT_SECTIONS {
            let rows = extract_rows(body, &[key]);
            if body.get(key).is_none() {
                debug!(section = key, "document payload section missing");
            }
            let (section, skipped) = self.explode_section(rows, origin);
            records.extend(section);
            skipped_rows += skipped;
        }
        Ok(NormalizedBatch {
            kind: self.kind(),
            records: Normalized::Documents(records),
            skipped_rows,
        })
    }
}

const MILESTONE_DATE_ALIASES: &[&str] = &["date", "arrival_date", "test_date", "day"];
const MILESTONE_STATUS_ALIASES: &[&str] = &["status", "result"];

fn parse_milestone_row(row: &JsonValue, milestone: MilestoneKind) -> Option<MilestoneRecord> {
    let date = row_day(row, MILESTONE_DATE_ALIASES)?;
    let consumed: BTreeSet<&str> = [
        RECRUITER_ALIASES,
        TEAM_ALIASES,
        COMPANY_ALIASES,
        CONTRACT_ALIASES,
        MILESTONE_DATE_ALIASES,
        MILESTONE_STATUS_ALIASES,
    ]
    .into_iter()
    .flatten()
    .copied()
    .collect();
    let extra: JsonMap<String, JsonValue> = row
        .as_object()?
        .iter()
        .filter(|(key, _)| !consumed.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Some(MilestoneRecord {
        kind: milestone,
        date,
        recruiter_name: text_field(row, RECRUITER_ALIASES),
        team_name: text_field(row, TEAM_ALIASES),
        company_name: text_field(row, COMPANY_ALIASES),
        contract_type: text_field(row, CONTRACT_ALIASES),
        status: optional_text_field(row, MILESTONE_STATUS_ALIASES),
        extra,
    })
}

impl SourceAdapter for MilestoneAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn envelope_keys(&self) -> &'static [&'static str] {
        match self.milestone {
            MilestoneKind::Arrival => &["arrivals", "data"],
            MilestoneKind::DrugTest => &["drug_tests", "drugTests", "data"],
        }
    }

    fn parse_rows(&self, rows: &[JsonValue]) -> Result<NormalizedBatch, AdapterError> {
        let milestone = self.milestone;
        let (records, skipped_rows) =
            collect_rows(self.kind, rows, |row| parse_milestone_row(row, milestone));
        Ok(NormalizedBatch {
            kind: self.kind,
            records: Normalized::Milestones(records),
            skipped_rows,
        })
    }
}

pub fn adapter_for_source(kind: SourceKind, config: &NormalizerConfig) -> Box<dyn SourceAdapter> {
    match kind {
        SourceKind::Activity => Box::new(ActivityAdapter),
        SourceKind::WorkingHours => Box::new(WorkingHoursAdapter),
        SourceKind::LeadAssignments => Box::new(LeadAssignmentAdapter),
        SourceKind::LeadLifecycle => Box::new(LeadLifecycleAdapter),
        SourceKind::DocumentCollection => Box::new(DocumentCollectionAdapter {
            config: config.clone(),
        }),
        SourceKind::Arrivals => Box::new(MilestoneAdapter {
            kind,
            milestone: MilestoneKind::Arrival,
        }),
        SourceKind::DrugTests => Box::new(MilestoneAdapter {
            kind,
            milestone: MilestoneKind::DrugTest,
        }),
    }
}

/// Normalizes one payload. Never fails: a malformed payload degrades to an
/// empty batch and a warning.
pub fn normalize_with(payload: &JsonValue, kind: SourceKind, config: &NormalizerConfig) -> NormalizedBatch {
    let adapter = adapter_for_source(kind, config);
    match adapter.parse_payload(payload) {
        Ok(batch) => {
            if batch.skipped_rows > 0 {
                warn!(
                    source = kind.as_str(),
                    skipped = batch.skipped_rows,
                    kept = batch.records.len(),
                    "dropped rows without a usable date or type"
                );
            }
            batch
        }
        Err(err) => {
            warn!(source = kind.as_str(), error = %err, "payload rejected; using empty set");
            NormalizedBatch::empty(kind)
        }
    }
}

pub fn normalize(payload: &JsonValue, kind: SourceKind) -> NormalizedBatch {
    normalize_with(payload, kind, &NormalizerConfig::default())
}
