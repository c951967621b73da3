//! Rule detector: ordered condition lists folded left with AND/OR, first match wins.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use rodash_core::{
    ActivityRecord, Cells, DateWindow, Dimension, COMPANY_NAME, CONTRACT_TYPE, RECRUITER_NAME,
    TEAM_NAME,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate_activity, ViewMode};
use crate::filter::{filter, FilterCriteria};
use crate::stats::{column_stats, finite_column, percentile, Statistic};

const EQ_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "!=")]
    Ne,
}

fn approx_eq(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= EQ_TOLERANCE
}

impl CompareOp {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Eq => approx_eq(lhs, rhs),
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ne => !approx_eq(lhs, rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Fixed { value: f64 },
    Aggregate { stat: Statistic },
    Percentile { percentile: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFilters {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub recruiter: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub contract: Option<String>,
}

impl PeerFilters {
    fn criteria(&self) -> FilterCriteria {
        let mut criteria = FilterCriteria::default();
        criteria.set_field(TEAM_NAME, self.team.clone());
        criteria.set_field(RECRUITER_NAME, self.recruiter.clone());
        criteria.set_field(COMPANY_NAME, self.company.clone());
        criteria.set_field(CONTRACT_TYPE, self.contract.clone());
        criteria
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PeerGroup {
    /// Whatever field filters the view has active when the rule runs.
    #[default]
    CurrentView,
    /// Only the filters stored on the condition.
    Specific(PeerFilters),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "window", content = "date", rename_all = "snake_case")]
pub enum TimeContext {
    #[default]
    Current,
    Yesterday,
    #[serde(rename = "previous_7_days")]
    Previous7Days,
    #[serde(rename = "previous_30_days")]
    Previous30Days,
    AllTime,
    Date(NaiveDate),
}

impl TimeContext {
    /// Named windows are relative to `today`; the previous-N windows end yesterday.
    pub fn resolve(self, view: DateWindow, today: NaiveDate) -> DateWindow {
        let days_back = |n: u64| today.checked_sub_days(Days::new(n));
        match self {
            TimeContext::Current => view,
            TimeContext::Yesterday => DateWindow::new(days_back(1), days_back(1)),
            TimeContext::Previous7Days => DateWindow::new(days_back(7), days_back(1)),
            TimeContext::Previous30Days => DateWindow::new(days_back(30), days_back(1)),
            TimeContext::AllTime => DateWindow::all_time(),
            TimeContext::Date(day) => DateWindow::single_day(day),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub rhs: Operand,
    #[serde(default)]
    pub peer: PeerGroup,
    #[serde(default)]
    pub window: TimeContext,
    /// Ignored on the first condition.
    #[serde(default)]
    pub logic: Logic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRule {
    pub tag: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFilters {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub contract: Option<String>,
}

impl ProfileFilters {
    pub fn apply_to(&self, mut criteria: FilterCriteria) -> FilterCriteria {
        let pinned = [
            (TEAM_NAME, &self.team),
            (COMPANY_NAME, &self.company),
            (CONTRACT_TYPE, &self.contract),
        ];
        for (field, value) in pinned {
            if value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
                criteria.set_field(field, value.clone());
            }
        }
        criteria
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    #[serde(default)]
    pub rules: Vec<DetectorRule>,
    #[serde(default)]
    pub filters: ProfileFilters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileBook {
    #[serde(default)]
    pub profiles: BTreeMap<String, DetectorProfile>,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub last_seen_version: Option<String>,
}

impl ProfileBook {
    pub fn profile(&self, name: &str) -> Option<&DetectorProfile> {
        self.profiles.get(name)
    }

    pub fn active(&self) -> Option<&DetectorProfile> {
        self.default_profile
            .as_deref()
            .and_then(|name| self.profiles.get(name))
    }

    pub fn upsert(&mut self, name: impl Into<String>, profile: DetectorProfile) {
        self.profiles.insert(name.into(), profile);
    }

    pub fn remove(&mut self, name: &str) -> Option<DetectorProfile> {
        if self.default_profile.as_deref() == Some(name) {
            self.default_profile = None;
        }
        self.profiles.remove(name)
    }

    pub fn set_default(&mut self, name: &str) -> bool {
        if !self.profiles.contains_key(name) {
            return false;
        }
        self.default_profile = Some(name.to_string());
        true
    }
}

pub trait PeerSource {
    fn peer_values(&self, field: &str, criteria: &FilterCriteria) -> Vec<f64>;
}

/// Activity peers at the view's granularity: one value per row in stub
/// mode, one per group otherwise.
pub struct ActivityPeers<'a> {
    pub records: &'a [ActivityRecord],
    pub mode: ViewMode,
    pub group_key: Dimension,
}

impl PeerSource for ActivityPeers<'_> {
    fn peer_values(&self, field: &str, criteria: &FilterCriteria) -> Vec<f64> {
        let rows = filter(self.records, criteria);
        let shaped = aggregate_activity(&rows, self.group_key, self.mode);
        finite_column(&shaped, field)
    }
}

pub struct DetectionContext<'a> {
    pub peers: &'a dyn PeerSource,
    pub view: &'a FilterCriteria,
    pub today: NaiveDate,
}

impl DetectionContext<'_> {
    fn peer_criteria(&self, condition: &Condition) -> FilterCriteria {
        let base = match &condition.peer {
            PeerGroup::CurrentView => FilterCriteria {
                fields: self.view.fields.clone(),
                events: self.view.events.clone(),
                ..FilterCriteria::default()
            },
            PeerGroup::Specific(filters) => filters.criteria(),
        };
        base.with_window(condition.window.resolve(self.view.window(), self.today))
    }

    /// Right-hand value of a condition; `None` when its peer group is empty.
    pub fn resolve_rhs(&self, condition: &Condition) -> Option<f64> {
        match condition.rhs {
            Operand::Fixed { value } => Some(value),
            Operand::Aggregate { stat } => {
                let values = self
                    .peers
                    .peer_values(&condition.field, &self.peer_criteria(condition));
                let stats = column_stats(&values);
                (stats.count > 0).then(|| stats.get(stat))
            }
            Operand::Percentile { percentile: p } => {
                let values = self
                    .peers
                    .peer_values(&condition.field, &self.peer_criteria(condition));
                percentile(&values, p)
            }
        }
    }
}

fn condition_holds(record: &dyn Cells, condition: &Condition, rhs: Option<f64>) -> bool {
    let Some(lhs) = record.cell(&condition.field).as_number() else {
        return false;
    };
    rhs.is_some_and(|rhs| condition.op.holds(lhs, rhs))
}

fn fold_conditions(record: &dyn Cells, rule: &DetectorRule, resolved: &[Option<f64>]) -> bool {
    let mut pairs = rule.conditions.iter().zip(resolved.iter().copied());
    let Some((first, rhs)) = pairs.next() else {
        return false;
    };
    pairs.fold(condition_holds(record, first, rhs), |acc, (condition, rhs)| {
        let current = condition_holds(record, condition, rhs);
        match condition.logic {
            Logic::And => acc && current,
            Logic::Or => acc || current,
        }
    })
}

fn resolve_rule(rule: &DetectorRule, ctx: &DetectionContext<'_>) -> Vec<Option<f64>> {
    rule.conditions.iter().map(|c| ctx.resolve_rhs(c)).collect()
}

/// Flat left-to-right fold with no precedence; a rule without conditions never matches.
pub fn rule_matches(record: &dyn Cells, rule: &DetectorRule, ctx: &DetectionContext<'_>) -> bool {
    fold_conditions(record, rule, &resolve_rule(rule, ctx))
}

pub fn evaluate<'r>(
    record: &dyn Cells,
    rules: &'r [DetectorRule],
    ctx: &DetectionContext<'_>,
) -> Option<&'r DetectorRule> {
    rules.iter().find(|rule| rule_matches(record, rule, ctx))
}

/// Tag of the first matching rule per row. Right-hand sides are resolved
/// once per condition since they do not depend on the row.
pub fn tag_rows<R: Cells>(
    rows: &[R],
    rules: &[DetectorRule],
    ctx: &DetectionContext<'_>,
) -> Vec<Option<String>> {
    let resolved: Vec<Vec<Option<f64>>> = rules.iter().map(|r| resolve_rule(r, ctx)).collect();
    rows.iter()
        .map(|row| {
            rules
                .iter()
                .zip(&resolved)
                .find(|(rule, rhs)| fold_conditions(row, rule, rhs))
                .map(|(rule, _)| rule.tag.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodash_core::ActivityCounters;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn activity(date: &str, recruiter: &str, team: &str, calls: f64) -> ActivityRecord {
        let mut counters = ActivityCounters::default();
        counters.total_calls = calls;
        ActivityRecord {
            date: day(date),
            recruiter_name: recruiter.into(),
            team_name: team.into(),
            company_name: "EB Infinity".into(),
            contract_type: "OO".into(),
            counters,
        }
    }

    fn fixed(field: &str, op: CompareOp, value: f64, logic: Logic) -> Condition {
        Condition {
            field: field.into(),
            op,
            rhs: Operand::Fixed { value },
            peer: PeerGroup::CurrentView,
            window: TimeContext::Current,
            logic,
        }
    }

    fn store() -> Vec<ActivityRecord> {
        vec![
            activity("2024-01-09", "Alice", "Red", 10.0),
            activity("2024-01-09", "Bob", "Red", 20.0),
            activity("2024-01-09", "Cy", "Blue", 60.0),
            activity("2024-01-01", "Cy", "Blue", 100.0),
        ]
    }

    struct NoPeers;

    impl PeerSource for NoPeers {
        fn peer_values(&self, _field: &str, _criteria: &FilterCriteria) -> Vec<f64> {
            Vec::new()
        }
    }

    #[test]
    fn empty_rule_never_matches() {
        let view = FilterCriteria::default();
        let ctx = DetectionContext {
            peers: &NoPeers,
            view: &view,
            today: day("2024-01-10"),
        };
        let rule = DetectorRule {
            tag: "never".into(),
            conditions: Vec::new(),
        };
        let row = activity("2024-01-09", "Alice", "Red", 10.0);
        assert!(!rule_matches(&row, &rule, &ctx));
        assert!(evaluate(&row, std::slice::from_ref(&rule), &ctx).is_none());
    }

    #[test]
    fn conditions_fold_left_without_precedence() {
        let view = FilterCriteria::default();
        let ctx = DetectionContext {
            peers: &NoPeers,
            view: &view,
            today: day("2024-01-10"),
        };
        // (true OR false) AND false
        let rule = DetectorRule {
            tag: "fold".into(),
            conditions: vec![
                fixed("total_calls", CompareOp::Gt, 5.0, Logic::And),
                fixed("total_calls", CompareOp::Gt, 50.0, Logic::Or),
                fixed("total_calls", CompareOp::Lt, 0.0, Logic::And),
            ],
        };
        let row = activity("2024-01-09", "Alice", "Red", 10.0);
        assert!(!rule_matches(&row, &rule, &ctx));
    }

    #[test]
    fn first_matching_rule_wins() {
        let view = FilterCriteria::default();
        let ctx = DetectionContext {
            peers: &NoPeers,
            view: &view,
            today: day("2024-01-10"),
        };
        let rules = vec![
            DetectorRule {
                tag: "low".into(),
                conditions: vec![fixed("total_calls", CompareOp::Le, 15.0, Logic::And)],
            },
            DetectorRule {
                tag: "any".into(),
                conditions: vec![fixed("total_calls", CompareOp::Ge, 0.0, Logic::And)],
            },
        ];
        let rows = vec![
            activity("2024-01-09", "Alice", "Red", 10.0),
            activity("2024-01-09", "Bob", "Red", 20.0),
        ];
        let tags = tag_rows(&rows, &rules, &ctx);
        assert_eq!(tags, vec![Some("low".to_string()), Some("any".to_string())]);
    }

    #[test]
    fn aggregate_rhs_uses_current_view_filters() {
        let records = store();
        let peers = ActivityPeers {
            records: &records,
            mode: ViewMode::Stub,
            group_key: Dimension::Recruiter,
        };
        let view = FilterCriteria::default()
            .with_window(DateWindow::single_day(day("2024-01-09")))
            .with_field(TEAM_NAME, "Red");
        let ctx = DetectionContext {
            peers: &peers,
            view: &view,
            today: day("2024-01-10"),
        };
        let above_average = Condition {
            rhs: Operand::Aggregate {
                stat: Statistic::Average,
            },
            ..fixed("total_calls", CompareOp::Gt, 0.0, Logic::And)
        };
        assert_eq!(ctx.resolve_rhs(&above_average), Some(15.0));
        let rule = DetectorRule {
            tag: "busy".into(),
            conditions: vec![above_average],
        };
        assert!(rule_matches(&activity("2024-01-09", "Bob", "Red", 20.0), &rule, &ctx));
        assert!(!rule_matches(&activity("2024-01-09", "Alice", "Red", 10.0), &rule, &ctx));
    }

    #[test]
    fn specific_peer_group_ignores_view_filters() {
        let records = store();
        let peers = ActivityPeers {
            records: &records,
            mode: ViewMode::Aggregated,
            group_key: Dimension::Recruiter,
        };
        let view = FilterCriteria::default().with_field(TEAM_NAME, "Red");
        let ctx = DetectionContext {
            peers: &peers,
            view: &view,
            today: day("2024-01-10"),
        };
        let condition = Condition {
            rhs: Operand::Aggregate { stat: Statistic::Max },
            peer: PeerGroup::Specific(PeerFilters {
                team: Some("Blue".into()),
                ..PeerFilters::default()
            }),
            window: TimeContext::AllTime,
            ..fixed("total_calls", CompareOp::Gt, 0.0, Logic::And)
        };
        // Cy's two days are aggregated into one peer value
        assert_eq!(ctx.resolve_rhs(&condition), Some(160.0));
    }

    #[test]
    fn empty_peer_group_makes_condition_false() {
        let records = store();
        let peers = ActivityPeers {
            records: &records,
            mode: ViewMode::Stub,
            group_key: Dimension::Recruiter,
        };
        let view = FilterCriteria::default().with_field(TEAM_NAME, "Nobody");
        let ctx = DetectionContext {
            peers: &peers,
            view: &view,
            today: day("2024-01-10"),
        };
        let rule = DetectorRule {
            tag: "never".into(),
            conditions: vec![Condition {
                op: CompareOp::Ge,
                rhs: Operand::Percentile { percentile: 0.0 },
                ..fixed("total_calls", CompareOp::Ge, 0.0, Logic::And)
            }],
        };
        assert!(!rule_matches(&activity("2024-01-09", "Alice", "Red", 10.0), &rule, &ctx));
    }

    #[test]
    fn p90_rhs_flags_only_the_top_peer() {
        let calls = [("Ann", 1.0), ("Ben", 2.0), ("Cat", 3.0), ("Dan", 4.0), ("Eve", 10.0)];
        let rows: Vec<ActivityRecord> = calls
            .into_iter()
            .map(|(name, calls)| activity("2024-01-09", name, "Red", calls))
            .collect();
        let peers = ActivityPeers {
            records: &rows,
            mode: ViewMode::Stub,
            group_key: Dimension::Recruiter,
        };
        let view = FilterCriteria::default();
        let ctx = DetectionContext {
            peers: &peers,
            view: &view,
            today: day("2024-01-10"),
        };
        let top = Condition {
            rhs: Operand::Percentile { percentile: 90.0 },
            ..fixed("total_calls", CompareOp::Gt, 0.0, Logic::And)
        };
        // rank 0.9 * 4 = 3.6, between 4 and 10
        let rhs = ctx.resolve_rhs(&top).unwrap();
        assert!((rhs - 7.6).abs() < 1e-9);

        let rules = vec![DetectorRule {
            tag: "outlier".into(),
            conditions: vec![top],
        }];
        let tags = tag_rows(&rows, &rules, &ctx);
        assert_eq!(tags, vec![None, None, None, None, Some("outlier".to_string())]);
    }

    #[test]
    fn yesterday_and_previous_windows_resolve_from_today() {
        let today = day("2024-01-10");
        let view = DateWindow::single_day(today);
        assert_eq!(
            TimeContext::Yesterday.resolve(view, today),
            DateWindow::single_day(day("2024-01-09"))
        );
        assert_eq!(
            TimeContext::Previous7Days.resolve(view, today),
            DateWindow::new(Some(day("2024-01-03")), Some(day("2024-01-09")))
        );
        assert_eq!(
            TimeContext::Previous30Days.resolve(view, today),
            DateWindow::new(Some(day("2023-12-11")), Some(day("2024-01-09")))
        );
        assert_eq!(
            TimeContext::Date(day("2023-06-01")).resolve(view, today),
            DateWindow::single_day(day("2023-06-01"))
        );
        assert_eq!(TimeContext::Current.resolve(view, today), view);
        assert_eq!(TimeContext::AllTime.resolve(view, today), DateWindow::all_time());
    }

    #[test]
    fn named_windows_cross_month_and_leap_day() {
        let today = day("2024-03-01");
        let view = DateWindow::all_time();
        assert_eq!(
            TimeContext::Yesterday.resolve(view, today),
            DateWindow::single_day(day("2024-02-29"))
        );
        assert_eq!(
            TimeContext::Previous7Days.resolve(view, today),
            DateWindow::new(Some(day("2024-02-23")), Some(day("2024-02-29")))
        );
        assert_eq!(
            TimeContext::Previous30Days.resolve(view, today),
            DateWindow::new(Some(day("2024-01-31")), Some(day("2024-02-29")))
        );
    }

    #[test]
    fn equality_tolerates_float_noise() {
        assert!(CompareOp::Eq.holds(0.1 + 0.2, 0.3));
        assert!(!CompareOp::Ne.holds(0.1 + 0.2, 0.3));
        assert!(CompareOp::Eq.holds(f64::INFINITY, f64::INFINITY));
        assert!(CompareOp::Gt.holds(f64::INFINITY, 1e12));
    }

    #[test]
    fn rules_deserialize_from_profile_json() {
        let json = r#"{
            "tag": "slow",
            "conditions": [
                {"field": "p50_new", "op": ">=", "rhs": {"type": "percentile", "percentile": 90}},
                {"field": "total_calls", "op": "<", "rhs": {"type": "fixed", "value": 3},
                 "logic": "or", "window": {"window": "date", "date": "2024-01-05"},
                 "peer": {"scope": "specific", "team": "Red"}}
            ]
        }"#;
        let rule: DetectorRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.conditions[0].op, CompareOp::Ge);
        assert_eq!(rule.conditions[0].peer, PeerGroup::CurrentView);
        assert_eq!(rule.conditions[1].logic, Logic::Or);
        assert_eq!(rule.conditions[1].window, TimeContext::Date(day("2024-01-05")));
        assert!(matches!(&rule.conditions[1].peer, PeerGroup::Specific(f) if f.team.as_deref() == Some("Red")));
    }

    #[test]
    fn profile_book_tracks_default() {
        let mut book = ProfileBook::default();
        book.upsert("ops", DetectorProfile::default());
        assert!(book.set_default("ops"));
        assert!(!book.set_default("missing"));
        assert!(book.active().is_some());
        book.remove("ops");
        assert_eq!(book.default_profile, None);
    }

    #[test]
    fn profile_filters_pin_view_fields() {
        let filters = ProfileFilters {
            team: Some("Red".into()),
            company: Some(" ".into()),
            contract: None,
        };
        let criteria =
            filters.apply_to(FilterCriteria::default().with_field(COMPANY_NAME, "EB Infinity"));
        let active: Vec<(&str, &str)> = criteria.active_fields().collect();
        assert_eq!(active, vec![(COMPANY_NAME, "EB Infinity"), (TEAM_NAME, "Red")]);
    }
}
