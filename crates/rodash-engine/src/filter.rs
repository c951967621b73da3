//! Pure, composable row predicates.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rodash_core::{DateWindow, EventKind, Row};
use serde::{Deserialize, Serialize};

fn active(constraint: &Option<String>) -> Option<&str> {
    constraint.as_deref().filter(|s| !s.trim().is_empty())
}

fn satisfies(constraint: &Option<String>, actual: &str) -> bool {
    active(constraint).map_or(true, |wanted| wanted == actual)
}

/// Call-side and SMS-side constraints of the working-hours view.
///
/// Each side only ever constrains rows of its own event type, so a row passes
/// when it matches its own side (an inactive side matches everything).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilters {
    #[serde(default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub sms_type: Option<String>,
    #[serde(default)]
    pub sms_status: Option<String>,
}

impl EventFilters {
    pub fn call_side_active(&self) -> bool {
        active(&self.call_type).is_some() || active(&self.call_status).is_some()
    }

    pub fn sms_side_active(&self) -> bool {
        active(&self.sms_type).is_some() || active(&self.sms_status).is_some()
    }

    pub fn admits(&self, kind: &EventKind) -> bool {
        match kind {
            EventKind::Call {
                call_type, status, ..
            } => satisfies(&self.call_type, call_type) && satisfies(&self.call_status, status),
            EventKind::Sms { sms_type, status } => {
                satisfies(&self.sms_type, sms_type) && satisfies(&self.sms_status, status)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub events: EventFilters,
}

impl FilterCriteria {
    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.from, self.to)
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.from = window.from;
        self.to = window.to;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), Some(value.into()));
        self
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: Option<String>) {
        self.fields.insert(field.into(), value);
    }

    pub fn active_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|(field, value)| active(value).map(|v| (field.as_str(), v)))
    }

    /// Conjunction of every active constraint. A row that does not carry a
    /// constrained field does not match it.
    pub fn admits<R: Row + ?Sized>(&self, row: &R) -> bool {
        if !self.window().contains(row.day()) {
            return false;
        }
        let fields_match = self
            .active_fields()
            .all(|(field, wanted)| row.attribute(field) == Some(wanted));
        if !fields_match {
            return false;
        }
        row.event_kind().map_or(true, |kind| self.events.admits(kind))
    }
}

pub fn filter<R: Row + Clone>(records: &[R], criteria: &FilterCriteria) -> Vec<R> {
    records
        .iter()
        .filter(|r| criteria.admits(*r))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rodash_core::{ActivityCounters, ActivityRecord, EventRecord};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn activity(date: &str, recruiter: &str, team: &str) -> ActivityRecord {
        ActivityRecord {
            date: day(date),
            recruiter_name: recruiter.into(),
            team_name: team.into(),
            company_name: "EB Infinity".into(),
            contract_type: "OO".into(),
            counters: ActivityCounters::default(),
        }
    }

    fn event(kind: EventKind) -> EventRecord {
        EventRecord {
            timestamp: "2024-01-03T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            recruiter_name: "Bo".into(),
            team_name: "Red".into(),
            company_name: "EB Infinity".into(),
            kind,
        }
    }

    fn call(call_type: &str, status: &str) -> EventRecord {
        event(EventKind::Call {
            call_type: call_type.into(),
            status: status.into(),
            duration_seconds: 30.0,
        })
    }

    fn sms(sms_type: &str, status: &str) -> EventRecord {
        event(EventKind::Sms {
            sms_type: sms_type.into(),
            status: status.into(),
        })
    }

    #[test]
    fn date_bounds_are_inclusive_on_both_ends() {
        let rows = vec![
            activity("2024-01-01", "A", "Red"),
            activity("2024-01-02", "A", "Red"),
            activity("2024-01-04", "A", "Red"),
            activity("2024-01-05", "A", "Red"),
        ];
        let criteria = FilterCriteria {
            from: Some(day("2024-01-02")),
            to: Some(day("2024-01-04")),
            ..Default::default()
        };
        let kept: Vec<NaiveDate> = filter(&rows, &criteria).iter().map(|r| r.date).collect();
        assert_eq!(kept, vec![day("2024-01-02"), day("2024-01-04")]);
    }

    #[test]
    fn unset_and_blank_criteria_impose_nothing() {
        let rows = vec![activity("2024-01-01", "A", "Red"), activity("2024-01-01", "B", "Blue")];
        let mut criteria = FilterCriteria::default();
        criteria.set_field("team_name", None);
        criteria.set_field("recruiter_name", Some("  ".into()));
        assert_eq!(filter(&rows, &criteria).len(), 2);
    }

    #[test]
    fn field_constraints_are_a_conjunction() {
        let rows = vec![
            activity("2024-01-01", "A", "Red"),
            activity("2024-01-01", "B", "Red"),
            activity("2024-01-01", "A", "Blue"),
        ];
        let criteria = FilterCriteria::default()
            .with_field("team_name", "Red")
            .with_field("recruiter_name", "A");
        let kept = filter(&rows, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].team_name, "Red");
        assert_eq!(kept[0].recruiter_name, "A");
    }

    #[test]
    fn call_side_filters_leave_sms_rows_untouched() {
        let rows = vec![call("outbound", "answered"), call("inbound", "missed"), sms("outbound", "sent")];
        let criteria = FilterCriteria {
            events: EventFilters {
                call_type: Some("outbound".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let kept = filter(&rows, &criteria);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], rows[0]);
        assert_eq!(kept[1], rows[2]);
    }

    #[test]
    fn sms_side_filters_leave_call_rows_untouched() {
        let rows = vec![call("inbound", "missed"), sms("outbound", "sent"), sms("outbound", "failed")];
        let criteria = FilterCriteria {
            events: EventFilters {
                sms_status: Some("sent".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let kept = filter(&rows, &criteria);
        assert_eq!(kept, vec![rows[0].clone(), rows[1].clone()]);
    }

    #[test]
    fn both_sides_active_rows_match_their_own_side() {
        let rows = vec![
            call("outbound", "answered"),
            call("inbound", "answered"),
            sms("inbound", "delivered"),
            sms("outbound", "delivered"),
        ];
        let criteria = FilterCriteria {
            events: EventFilters {
                call_type: Some("outbound".into()),
                sms_type: Some("inbound".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(criteria.events.call_side_active() && criteria.events.sms_side_active());
        let kept = filter(&rows, &criteria);
        assert_eq!(kept, vec![rows[0].clone(), rows[2].clone()]);
    }

    #[test]
    fn filtering_returns_fresh_copies() {
        let rows = vec![activity("2024-01-01", "A", "Red")];
        let mut kept = filter(&rows, &FilterCriteria::default());
        kept[0].recruiter_name.push_str("-edited");
        assert_eq!(rows[0].recruiter_name, "A");
    }
}
