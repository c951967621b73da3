//! Canonical record model for the recruiting-ops dashboard engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const CRATE_NAME: &str = "rodash-core";

pub const RECRUITER_NAME: &str = "recruiter_name";
pub const TEAM_NAME: &str = "team_name";
pub const COMPANY_NAME: &str = "company_name";
pub const CONTRACT_TYPE: &str = "contract_type";

/// Identity columns shared by most sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Recruiter,
    Team,
    Company,
    Contract,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Recruiter,
        Dimension::Team,
        Dimension::Company,
        Dimension::Contract,
    ];

    pub fn field(self) -> &'static str {
        match self {
            Dimension::Recruiter => RECRUITER_NAME,
            Dimension::Team => TEAM_NAME,
            Dimension::Company => COMPANY_NAME,
            Dimension::Contract => CONTRACT_TYPE,
        }
    }
}

/// Inclusive calendar-day window; an open bound imposes no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn all_time() -> Self {
        Self::default()
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            from: Some(day),
            to: Some(day),
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

/// Time-to-engage measurement. The three states never collapse into each other:
/// `Absent` means no qualifying leads, `Never` means assigned but never engaged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "minutes", rename_all = "snake_case")]
pub enum Engage {
    #[default]
    Absent,
    Never,
    Minutes(f64),
}

impl Engage {
    pub fn is_absent(&self) -> bool {
        matches!(self, Engage::Absent)
    }

    /// Ordering value: `Never` is positive infinity, `Absent` has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Engage::Absent => None,
            Engage::Never => Some(f64::INFINITY),
            Engage::Minutes(m) => Some(*m),
        }
    }
}

/// Typed value of one column in one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Absent,
    Never,
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

impl CellValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, CellValue::Absent)
    }

    /// Infinite when the cell is the never-engaged sentinel or a non-finite number.
    pub fn is_infinite(&self) -> bool {
        match self {
            CellValue::Never => true,
            CellValue::Number(n) => n.is_infinite(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if !n.is_nan() => Some(*n),
            CellValue::Never => Some(f64::INFINITY),
            _ => None,
        }
    }

    /// Finite numeric value, the only kind summary statistics accept.
    pub fn as_finite(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<Engage> for CellValue {
    fn from(value: Engage) -> Self {
        match value {
            Engage::Absent => CellValue::Absent,
            Engage::Never => CellValue::Never,
            Engage::Minutes(m) => CellValue::Number(m),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<Option<f64>> for CellValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(CellValue::Absent, CellValue::Number)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

/// Column access used by sorting, statistics and rule evaluation.
pub trait Cells {
    fn cell(&self, column: &str) -> CellValue;
}

/// A dated, attributable row the filter engine can constrain.
pub trait Row: Cells {
    fn day(&self) -> NaiveDate;

    /// Exact-match string attribute (identity columns, event type, status...).
    fn attribute(&self, field: &str) -> Option<&str>;

    fn event_kind(&self) -> Option<&EventKind> {
        None
    }
}

/// Counters of the primary activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    TotalPhoneReveals,
    UniquePhoneReveals,
    TotalCalls,
    UniqueCalls,
    CallDurationSeconds,
    TotalSms,
    UniqueSms,
    NewLeadsAssigned,
    OldLeadsAssigned,
    HotLeadsAssigned,
    ProfiledTotal,
    ProfiledUnique,
}

impl Counter {
    pub const ALL: [Counter; 12] = [
        Counter::TotalPhoneReveals,
        Counter::UniquePhoneReveals,
        Counter::TotalCalls,
        Counter::UniqueCalls,
        Counter::CallDurationSeconds,
        Counter::TotalSms,
        Counter::UniqueSms,
        Counter::NewLeadsAssigned,
        Counter::OldLeadsAssigned,
        Counter::HotLeadsAssigned,
        Counter::ProfiledTotal,
        Counter::ProfiledUnique,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Counter::TotalPhoneReveals => "total_phone_reveals",
            Counter::UniquePhoneReveals => "unique_phone_reveals",
            Counter::TotalCalls => "total_calls",
            Counter::UniqueCalls => "unique_calls",
            Counter::CallDurationSeconds => "call_duration_seconds",
            Counter::TotalSms => "total_sms",
            Counter::UniqueSms => "unique_sms",
            Counter::NewLeadsAssigned => "new_leads_assigned",
            Counter::OldLeadsAssigned => "old_leads_assigned",
            Counter::HotLeadsAssigned => "hot_leads_assigned",
            Counter::ProfiledTotal => "profiled_total",
            Counter::ProfiledUnique => "profiled_unique",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.column() == column)
    }
}

pub const DURATION_PER_REVEAL: &str = "duration_per_reveal";
pub const CALLS_PER_REVEAL: &str = "calls_per_reveal";
pub const SMS_PER_REVEAL: &str = "sms_per_reveal";

pub const DERIVED_COLUMNS: [&str; 3] = [DURATION_PER_REVEAL, CALLS_PER_REVEAL, SMS_PER_REVEAL];

/// Division that yields 0 instead of NaN or infinity.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub total_phone_reveals: f64,
    pub unique_phone_reveals: f64,
    pub total_calls: f64,
    pub unique_calls: f64,
    pub call_duration_seconds: f64,
    pub total_sms: f64,
    pub unique_sms: f64,
    pub new_leads_assigned: f64,
    pub old_leads_assigned: f64,
    pub hot_leads_assigned: f64,
    pub profiled_total: f64,
    pub profiled_unique: f64,
}

impl ActivityCounters {
    pub fn get(&self, counter: Counter) -> f64 {
        match counter {
            Counter::TotalPhoneReveals => self.total_phone_reveals,
            Counter::UniquePhoneReveals => self.unique_phone_reveals,
            Counter::TotalCalls => self.total_calls,
            Counter::UniqueCalls => self.unique_calls,
            Counter::CallDurationSeconds => self.call_duration_seconds,
            Counter::TotalSms => self.total_sms,
            Counter::UniqueSms => self.unique_sms,
            Counter::NewLeadsAssigned => self.new_leads_assigned,
            Counter::OldLeadsAssigned => self.old_leads_assigned,
            Counter::HotLeadsAssigned => self.hot_leads_assigned,
            Counter::ProfiledTotal => self.profiled_total,
            Counter::ProfiledUnique => self.profiled_unique,
        }
    }

    pub fn set(&mut self, counter: Counter, value: f64) {
        let slot = match counter {
            Counter::TotalPhoneReveals => &mut self.total_phone_reveals,
            Counter::UniquePhoneReveals => &mut self.unique_phone_reveals,
            Counter::TotalCalls => &mut self.total_calls,
            Counter::UniqueCalls => &mut self.unique_calls,
            Counter::CallDurationSeconds => &mut self.call_duration_seconds,
            Counter::TotalSms => &mut self.total_sms,
            Counter::UniqueSms => &mut self.unique_sms,
            Counter::NewLeadsAssigned => &mut self.new_leads_assigned,
            Counter::OldLeadsAssigned => &mut self.old_leads_assigned,
            Counter::HotLeadsAssigned => &mut self.hot_leads_assigned,
            Counter::ProfiledTotal => &mut self.profiled_total,
            Counter::ProfiledUnique => &mut self.profiled_unique,
        };
        *slot = value;
    }

    pub fn accumulate(&mut self, other: &ActivityCounters) {
        for counter in Counter::ALL {
            self.set(counter, self.get(counter) + other.get(counter));
        }
    }

    pub fn duration_per_reveal(&self) -> f64 {
        ratio(self.call_duration_seconds, self.unique_phone_reveals)
    }

    pub fn calls_per_reveal(&self) -> f64 {
        ratio(self.unique_calls, self.unique_phone_reveals)
    }

    pub fn sms_per_reveal(&self) -> f64 {
        ratio(self.unique_sms, self.unique_phone_reveals)
    }

    /// Counter or derived ratio by column name.
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            DURATION_PER_REVEAL => Some(self.duration_per_reveal()),
            CALLS_PER_REVEAL => Some(self.calls_per_reveal()),
            SMS_PER_REVEAL => Some(self.sms_per_reveal()),
            other => Counter::from_column(other).map(|c| self.get(c)),
        }
    }
}

fn identity_attribute<'a>(
    field: &str,
    recruiter: &'a str,
    team: &'a str,
    company: Option<&'a str>,
    contract: Option<&'a str>,
) -> Option<&'a str> {
    match field {
        RECRUITER_NAME => Some(recruiter),
        TEAM_NAME => Some(team),
        COMPANY_NAME => company,
        CONTRACT_TYPE => contract,
        _ => None,
    }
}

fn text_or_absent(value: Option<&str>) -> CellValue {
    value.map_or(CellValue::Absent, CellValue::from)
}

/// One recruiter-day of the primary activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub date: NaiveDate,
    pub recruiter_name: String,
    pub team_name: String,
    pub company_name: String,
    pub contract_type: String,
    pub counters: ActivityCounters,
}

impl Cells for ActivityRecord {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return CellValue::Date(self.date);
        }
        if let Some(text) = self.attribute(column) {
            return CellValue::from(text);
        }
        self.counters.value(column).into()
    }
}

impl Row for ActivityRecord {
    fn day(&self) -> NaiveDate {
        self.date
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        identity_attribute(
            field,
            &self.recruiter_name,
            &self.team_name,
            Some(self.company_name.as_str()),
            Some(self.contract_type.as_str()),
        )
    }
}

/// Type-specific payload of a working-hours event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    Call {
        call_type: String,
        status: String,
        duration_seconds: f64,
    },
    Sms {
        sms_type: String,
        status: String,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Call { .. } => "call",
            EventKind::Sms { .. } => "sms",
        }
    }

    pub fn status(&self) -> &str {
        match self {
            EventKind::Call { status, .. } | EventKind::Sms { status, .. } => status.as_str(),
        }
    }
}

/// One call or SMS from the working-hours feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub recruiter_name: String,
    pub team_name: String,
    pub company_name: String,
    pub kind: EventKind,
}

impl Cells for EventRecord {
    fn cell(&self, column: &str) -> CellValue {
        match column {
            "timestamp" => CellValue::Instant(self.timestamp),
            "date" => CellValue::Date(self.day()),
            "duration_seconds" => match &self.kind {
                EventKind::Call {
                    duration_seconds, ..
                } => CellValue::Number(*duration_seconds),
                EventKind::Sms { .. } => CellValue::Absent,
            },
            other => text_or_absent(self.attribute(other)),
        }
    }
}

impl Row for EventRecord {
    fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        match (field, &self.kind) {
            ("event_type", kind) => Some(kind.label()),
            ("status", kind) => Some(kind.status()),
            ("call_type", EventKind::Call { call_type, .. }) => Some(call_type.as_str()),
            ("sms_type", EventKind::Sms { sms_type, .. }) => Some(sms_type.as_str()),
            _ => identity_attribute(
                field,
                &self.recruiter_name,
                &self.team_name,
                Some(self.company_name.as_str()),
                None,
            ),
        }
    }

    fn event_kind(&self) -> Option<&EventKind> {
        Some(&self.kind)
    }
}

pub const NEW_LEADS: &str = "new_leads";
pub const OLD_LEADS: &str = "old_leads";
pub const HOT_LEADS: &str = "hot_leads";
pub const TOTAL_NEW_LEADS_HELD: &str = "total_new_leads_held";
pub const TOTAL_OLD_LEADS_HELD: &str = "total_old_leads_held";

/// One recruiter-day of lead assignments. The `*_held` portfolio snapshot
/// is only meaningful on the as-of day of the active window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadAssignmentStub {
    pub date: NaiveDate,
    pub recruiter_name: String,
    pub team_name: String,
    pub new_leads: f64,
    pub old_leads: f64,
    pub hot_leads: f64,
    pub total_new_leads_held: f64,
    pub total_old_leads_held: f64,
}

impl Cells for LeadAssignmentStub {
    fn cell(&self, column: &str) -> CellValue {
        match column {
            "date" => CellValue::Date(self.date),
            NEW_LEADS => self.new_leads.into(),
            OLD_LEADS => self.old_leads.into(),
            HOT_LEADS => self.hot_leads.into(),
            TOTAL_NEW_LEADS_HELD => self.total_new_leads_held.into(),
            TOTAL_OLD_LEADS_HELD => self.total_old_leads_held.into(),
            other => text_or_absent(self.attribute(other)),
        }
    }
}

impl Row for LeadAssignmentStub {
    fn day(&self) -> NaiveDate {
        self.date
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        identity_attribute(field, &self.recruiter_name, &self.team_name, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Percentile {
    P10,
    P20,
    P30,
    P40,
    P50,
    P60,
    P70,
    P80,
    P90,
    P100,
}

impl Percentile {
    pub const ALL: [Percentile; 10] = [
        Percentile::P10,
        Percentile::P20,
        Percentile::P30,
        Percentile::P40,
        Percentile::P50,
        Percentile::P60,
        Percentile::P70,
        Percentile::P80,
        Percentile::P90,
        Percentile::P100,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn level(self) -> u8 {
        (self.index() as u8 + 1) * 10
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadAge {
    New,
    Old,
    Total,
}

impl LeadAge {
    pub const ALL: [LeadAge; 3] = [LeadAge::New, LeadAge::Old, LeadAge::Total];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn suffix(self) -> &'static str {
        match self {
            LeadAge::New => "new",
            LeadAge::Old => "old",
            LeadAge::Total => "total",
        }
    }
}

/// One cell address of the time-to-engage grid, named like `p50_new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngageColumn {
    pub percentile: Percentile,
    pub age: LeadAge,
}

impl EngageColumn {
    pub fn all() -> impl Iterator<Item = EngageColumn> {
        Percentile::ALL.into_iter().flat_map(|percentile| {
            LeadAge::ALL
                .into_iter()
                .map(move |age| EngageColumn { percentile, age })
        })
    }

    pub fn name(self) -> String {
        format!("p{}_{}", self.percentile.level(), self.age.suffix())
    }

    pub fn parse(name: &str) -> Option<Self> {
        let (level, suffix) = name.strip_prefix('p')?.split_once('_')?;
        let level: u8 = level.parse().ok()?;
        let percentile = Percentile::ALL.into_iter().find(|p| p.level() == level)?;
        let age = LeadAge::ALL.into_iter().find(|a| a.suffix() == suffix)?;
        Some(EngageColumn { percentile, age })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngageGrid {
    pub cells: [[Engage; 3]; 10],
}

impl EngageGrid {
    pub fn get(&self, column: EngageColumn) -> Engage {
        self.cells[column.percentile.index()][column.age.index()]
    }

    pub fn set(&mut self, column: EngageColumn, value: Engage) {
        self.cells[column.percentile.index()][column.age.index()] = value;
    }
}

/// One recruiter-day of time-to-engage percentiles from the lead-lifecycle feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeToEngageRecord {
    pub date: NaiveDate,
    pub recruiter_name: String,
    pub team_name: String,
    pub grid: EngageGrid,
}

impl Cells for TimeToEngageRecord {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return CellValue::Date(self.date);
        }
        match EngageColumn::parse(column) {
            Some(col) => self.grid.get(col).into(),
            None => text_or_absent(self.attribute(column)),
        }
    }
}

impl Row for TimeToEngageRecord {
    fn day(&self) -> NaiveDate {
        self.date
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        identity_attribute(field, &self.recruiter_name, &self.team_name, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Mvr,
    Psp,
    Cdl,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Mvr, DocumentKind::Psp, DocumentKind::Cdl];

    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Mvr => "mvr",
            DocumentKind::Psp => "psp",
            DocumentKind::Cdl => "cdl",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.prefix().eq_ignore_ascii_case(prefix))
    }
}

/// Which sub-array of the document-collection payload a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
    Collection,
    RecruiterCapture,
    ProfilerCapture,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentCounts {
    pub mvr: f64,
    pub psp: f64,
    pub cdl: f64,
}

impl DocumentCounts {
    pub fn get(&self, kind: DocumentKind) -> f64 {
        match kind {
            DocumentKind::Mvr => self.mvr,
            DocumentKind::Psp => self.psp,
            DocumentKind::Cdl => self.cdl,
        }
    }

    pub fn add(&mut self, kind: DocumentKind, value: f64) {
        match kind {
            DocumentKind::Mvr => self.mvr += value,
            DocumentKind::Psp => self.psp += value,
            DocumentKind::Cdl => self.cdl += value,
        }
    }

    pub fn total(&self) -> f64 {
        self.mvr + self.psp + self.cdl
    }

    pub fn is_zero(&self) -> bool {
        DocumentKind::ALL.into_iter().all(|k| self.get(k) == 0.0)
    }
}

pub const TOTAL_DOCUMENTS: &str = "total_documents";

/// Non-zero document counts for one (date, entity, team, company, contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub date: NaiveDate,
    pub origin: DocumentOrigin,
    pub recruiter_name: String,
    pub team_name: String,
    pub company_name: String,
    pub contract_type: String,
    pub counts: DocumentCounts,
}

impl Cells for DocumentRecord {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return CellValue::Date(self.date);
        }
        if column == TOTAL_DOCUMENTS {
            return CellValue::Number(self.counts.total());
        }
        match DocumentKind::from_prefix(column) {
            Some(kind) => CellValue::Number(self.counts.get(kind)),
            None => text_or_absent(self.attribute(column)),
        }
    }
}

impl Row for DocumentRecord {
    fn day(&self) -> NaiveDate {
        self.date
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        identity_attribute(
            field,
            &self.recruiter_name,
            &self.team_name,
            Some(self.company_name.as_str()),
            Some(self.contract_type.as_str()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Arrival,
    DrugTest,
}

/// Arrival or drug-test row. `extra` holds the open-ended remainder of the source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub kind: MilestoneKind,
    pub date: NaiveDate,
    pub recruiter_name: String,
    pub team_name: String,
    pub company_name: String,
    pub contract_type: String,
    pub status: Option<String>,
    #[serde(default)]
    pub extra: JsonMap<String, JsonValue>,
}

impl Cells for MilestoneRecord {
    fn cell(&self, column: &str) -> CellValue {
        if column == "date" {
            return CellValue::Date(self.date);
        }
        if let Some(text) = self.attribute(column) {
            return CellValue::from(text);
        }
        match self.extra.get(column) {
            Some(JsonValue::Number(n)) => n.as_f64().into(),
            Some(JsonValue::String(s)) => CellValue::Text(s.clone()),
            Some(JsonValue::Bool(b)) => CellValue::Text(b.to_string()),
            _ => CellValue::Absent,
        }
    }
}

impl Row for MilestoneRecord {
    fn day(&self) -> NaiveDate {
        self.date
    }

    fn attribute(&self, field: &str) -> Option<&str> {
        if field == "status" {
            return self.status.as_deref();
        }
        identity_attribute(
            field,
            &self.recruiter_name,
            &self.team_name,
            Some(self.company_name.as_str()),
            Some(self.contract_type.as_str()),
        )
    }
}

/// Source kinds the refresh pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Activity,
    WorkingHours,
    LeadAssignments,
    LeadLifecycle,
    DocumentCollection,
    Arrivals,
    DrugTests,
}

impl SourceKind {
    pub const ALL: [SourceKind; 7] = [
        SourceKind::Activity,
        SourceKind::WorkingHours,
        SourceKind::LeadAssignments,
        SourceKind::LeadLifecycle,
        SourceKind::DocumentCollection,
        SourceKind::Arrivals,
        SourceKind::DrugTests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Activity => "activity",
            SourceKind::WorkingHours => "working_hours",
            SourceKind::LeadAssignments => "lead_assignments",
            SourceKind::LeadLifecycle => "lead_lifecycle",
            SourceKind::DocumentCollection => "document_collection",
            SourceKind::Arrivals => "arrivals",
            SourceKind::DrugTests => "drug_tests",
        }
    }
}

/// Output of normalizing one source payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Activity(Vec<ActivityRecord>),
    Events(Vec<EventRecord>),
    LeadAssignments(Vec<LeadAssignmentStub>),
    TimeToEngage(Vec<TimeToEngageRecord>),
    Documents(Vec<DocumentRecord>),
    Milestones(Vec<MilestoneRecord>),
}

impl Normalized {
    pub fn empty(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Activity => Normalized::Activity(Vec::new()),
            SourceKind::WorkingHours => Normalized::Events(Vec::new()),
            SourceKind::LeadAssignments => Normalized::LeadAssignments(Vec::new()),
            SourceKind::LeadLifecycle => Normalized::TimeToEngage(Vec::new()),
            SourceKind::DocumentCollection => Normalized::Documents(Vec::new()),
            SourceKind::Arrivals | SourceKind::DrugTests => Normalized::Milestones(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Normalized::Activity(v) => v.len(),
            Normalized::Events(v) => v.len(),
            Normalized::LeadAssignments(v) => v.len(),
            Normalized::TimeToEngage(v) => v.len(),
            Normalized::Documents(v) => v.len(),
            Normalized::Milestones(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every canonical record of one refresh. Rebuilt wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStore {
    pub activity: Vec<ActivityRecord>,
    pub events: Vec<EventRecord>,
    pub lead_assignments: Vec<LeadAssignmentStub>,
    pub time_to_engage: Vec<TimeToEngageRecord>,
    pub documents: Vec<DocumentRecord>,
    pub arrivals: Vec<MilestoneRecord>,
    pub drug_tests: Vec<MilestoneRecord>,
}

impl RecordStore {
    pub fn absorb(&mut self, batch: Normalized) {
        match batch {
            Normalized::Activity(v) => self.activity.extend(v),
            Normalized::Events(v) => self.events.extend(v),
            Normalized::LeadAssignments(v) => self.lead_assignments.extend(v),
            Normalized::TimeToEngage(v) => self.time_to_engage.extend(v),
            Normalized::Documents(v) => self.documents.extend(v),
            Normalized::Milestones(v) => {
                for record in v {
                    match record.kind {
                        MilestoneKind::Arrival => self.arrivals.push(record),
                        MilestoneKind::DrugTest => self.drug_tests.push(record),
                    }
                }
            }
        }
    }

    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("activity", self.activity.len()),
            ("events", self.events.len()),
            ("lead_assignments", self.lead_assignments.len()),
            ("time_to_engage", self.time_to_engage.len()),
            ("documents", self.documents.len()),
            ("arrivals", self.arrivals.len()),
            ("drug_tests", self.drug_tests.len()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn alice(date: &str, reveals: f64, calls: f64, seconds: f64) -> ActivityRecord {
        let mut counters = ActivityCounters::default();
        counters.unique_phone_reveals = reveals;
        counters.unique_calls = calls;
        counters.call_duration_seconds = seconds;
        ActivityRecord {
            date: day(date),
            recruiter_name: "Alice".into(),
            team_name: "Red".into(),
            company_name: "EB Infinity".into(),
            contract_type: "ALL".into(),
            counters,
        }
    }

    #[test]
    fn derived_ratios_guard_zero_denominator() {
        let first = alice("2024-01-01", 10.0, 20.0, 100.0);
        let second = alice("2024-01-02", 0.0, 0.0, 0.0);
        assert_eq!(first.cell(CALLS_PER_REVEAL), CellValue::Number(2.0));
        assert_eq!(first.cell(DURATION_PER_REVEAL), CellValue::Number(10.0));
        assert_eq!(second.cell(CALLS_PER_REVEAL), CellValue::Number(0.0));
        assert_eq!(second.cell(SMS_PER_REVEAL), CellValue::Number(0.0));
    }

    #[test]
    fn engage_states_map_to_distinct_cells() {
        assert_eq!(CellValue::from(Engage::Absent), CellValue::Absent);
        assert_eq!(CellValue::from(Engage::Never), CellValue::Never);
        assert_eq!(CellValue::from(Engage::Minutes(0.0)), CellValue::Number(0.0));
        assert!(CellValue::Never.is_infinite());
        assert_eq!(CellValue::Never.as_finite(), None);
    }

    #[test]
    fn engage_column_names_round_trip() {
        let names: Vec<String> = EngageColumn::all().map(|c| c.name()).collect();
        assert_eq!(names.len(), 30);
        assert_eq!(names[0], "p10_new");
        assert_eq!(names[29], "p100_total");
        for name in &names {
            assert_eq!(EngageColumn::parse(name).unwrap().name(), *name);
        }
        assert!(EngageColumn::parse("p55_new").is_none());
        assert!(EngageColumn::parse("recruiter_name").is_none());
    }

    #[test]
    fn event_attributes_follow_event_type() {
        let call = EventRecord {
            timestamp: "2024-01-01T15:30:00Z".parse().unwrap(),
            recruiter_name: "Bob".into(),
            team_name: "Blue".into(),
            company_name: "EB Infinity".into(),
            kind: EventKind::Call {
                call_type: "outbound".into(),
                status: "answered".into(),
                duration_seconds: 42.0,
            },
        };
        assert_eq!(call.attribute("event_type"), Some("call"));
        assert_eq!(call.attribute("call_type"), Some("outbound"));
        assert_eq!(call.attribute("sms_type"), None);
        assert_eq!(call.day(), day("2024-01-01"));
        assert_eq!(call.cell("duration_seconds"), CellValue::Number(42.0));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window = DateWindow::new(Some(day("2024-01-02")), Some(day("2024-01-04")));
        assert!(!window.contains(day("2024-01-01")));
        assert!(window.contains(day("2024-01-02")));
        assert!(window.contains(day("2024-01-04")));
        assert!(!window.contains(day("2024-01-05")));
        assert!(DateWindow::all_time().contains(day("1999-12-31")));
    }

    #[test]
    fn store_routes_milestones_by_kind() {
        let mk = |kind| MilestoneRecord {
            kind,
            date: day("2024-02-01"),
            recruiter_name: "Cy".into(),
            team_name: "Green".into(),
            company_name: "EB Infinity".into(),
            contract_type: "OO".into(),
            status: None,
            extra: JsonMap::new(),
        };
        let mut store = RecordStore::default();
        store.absorb(Normalized::Milestones(vec![
            mk(MilestoneKind::Arrival),
            mk(MilestoneKind::DrugTest),
            mk(MilestoneKind::Arrival),
        ]));
        assert_eq!(store.arrivals.len(), 2);
        assert_eq!(store.drug_tests.len(), 1);
    }
}
