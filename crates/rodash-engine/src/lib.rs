//! Filtering, aggregation, sorting, statistics and rule detection over
//! canonical records. Every entry point borrows its input and returns fresh
//! output; nothing here mutates the shared record store.

pub mod aggregate;
pub mod detector;
pub mod filter;
pub mod sort;
pub mod stats;
pub mod view;

pub use aggregate::{
    aggregate_activity, aggregate_documents, aggregate_leads, aggregate_time_to_engage,
    chart_series, daily_trend, engage_median, event_heatmap, ActivitySummary, ChartSeries,
    DocumentSummary, HeatCell, LeadSummary, TimeToEngageSummary, ViewMode,
};
pub use detector::{
    evaluate, rule_matches, tag_rows, ActivityPeers, CompareOp, Condition, DetectionContext,
    DetectorProfile, DetectorRule, Logic, Operand, PeerFilters, PeerGroup, PeerSource,
    ProfileBook, ProfileFilters, TimeContext,
};
pub use filter::{filter, EventFilters, FilterCriteria};
pub use sort::{sort_by, ColumnType, Direction, SortState};
pub use stats::{
    column_stats, heat_bucket, percentile, ColumnStats, HeatBucket, HeatScale, Statistic,
};
pub use view::{
    activity_view, document_view, lead_view, milestone_view, time_to_engage_view,
    working_hours_view, Detection, ViewOutput, ViewRequest, WorkingHoursOutput,
};

pub const CRATE_NAME: &str = "rodash-engine";
