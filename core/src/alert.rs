//! Fraud alerts and their review lifecycle.
//!
//! RULE: An alert leaves the open queue only through `resolve`.
//! Resolving twice is an error.

use crate::{
    error::{DeskError, DeskResult},
    types::{EntityId, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Fragmentation,
    Velocity,
    AmountAnomaly,
    OffHours,
}

impl AlertCategory {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Fragmentation => "Possible operation fragmentation",
            Self::Velocity => "Unusual operation velocity",
            Self::AmountAnomaly => "Amount outside the client's usual pattern",
            Self::OffHours => "Operation at an atypical hour",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn recommended_action(&self) -> &'static str {
        match self {
            Self::Low => "Monitor the client's future operations",
            Self::Medium => "Request additional documentation and verify identity",
            Self::High => "Escalate to the compliance officer. Consider suspending the client's operations",
            Self::Critical => "STOP OPERATIONS. Report to the CNBV within 24 hours. Possible notice to authorities",
        }
    }
}

/// One heuristic that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub category: AlertCategory,
    /// Contribution in `0.0..=1.0`.
    pub weight: f64,
    pub description: String,
    /// What was observed.
    pub evidence: String,
    pub expected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: EntityId,
    pub category: AlertCategory,
    pub severity: Severity,
    pub score: u8,
    /// Folio of the operation, or the quotation id when execution was refused.
    pub operation_ref: String,
    pub client_id: Option<EntityId>,
    pub title: String,
    pub description: String,
    pub factors: Vec<RiskFactor>,
    pub recommended_action: String,
    pub requires_review: bool,
    pub blocked: bool,
    pub resolved: bool,
    pub false_positive: bool,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub category: Option<AlertCategory>,
    pub resolved: Option<bool>,
    pub client_id: Option<EntityId>,
}

impl AlertFilter {
    fn matches(&self, a: &Alert) -> bool {
        self.severity.is_none_or(|s| a.severity == s)
            && self.category.is_none_or(|c| a.category == c)
            && self.resolved.is_none_or(|r| a.resolved == r)
            && self
                .client_id
                .as_deref()
                .is_none_or(|id| a.client_id.as_deref() == Some(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub false_positives: usize,
    pub open_by_severity: BTreeMap<Severity, usize>,
    pub open_by_category: BTreeMap<AlertCategory, usize>,
    pub clients_with_alerts: usize,
}

#[derive(Default)]
pub struct AlertStore {
    alerts: RwLock<HashMap<EntityId, Alert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, alert: Alert) -> DeskResult<()> {
        self.alerts
            .write()
            .map_err(|_| DeskError::LockPoisoned("alert store"))?
            .insert(alert.id.clone(), alert);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.read().ok()?.get(id).cloned()
    }

    /// Critical first, newest first within a severity.
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let Ok(alerts) = self.alerts.read() else {
            return Vec::new();
        };
        let mut hits: Vec<Alert> = alerts.values().filter(|a| filter.matches(a)).cloned().collect();
        hits.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    pub fn resolve(
        &self,
        id: &str,
        resolution: &str,
        by: &str,
        false_positive: bool,
        now: Timestamp,
    ) -> DeskResult<Alert> {
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| DeskError::LockPoisoned("alert store"))?;
        let alert = alerts
            .get_mut(id)
            .ok_or_else(|| DeskError::AlertNotFound(id.to_string()))?;
        if alert.resolved {
            return Err(DeskError::AlertAlreadyResolved(id.to_string()));
        }
        alert.resolved = true;
        alert.resolution = Some(resolution.to_string());
        alert.resolved_by = Some(by.to_string());
        alert.false_positive = false_positive;
        alert.resolved_at = Some(now);
        log::info!("alert {id} resolved by {by} (false positive: {false_positive})");
        Ok(alert.clone())
    }

    pub fn stats(&self) -> AlertStats {
        let Ok(alerts) = self.alerts.read() else {
            return AlertStats::default();
        };
        let mut stats = AlertStats {
            total: alerts.len(),
            ..AlertStats::default()
        };
        let mut clients = BTreeSet::new();
        for a in alerts.values() {
            if let Some(client) = &a.client_id {
                clients.insert(client.as_str());
            }
            if a.resolved {
                stats.resolved += 1;
                if a.false_positive {
                    stats.false_positives += 1;
                }
            } else {
                stats.open += 1;
                *stats.open_by_severity.entry(a.severity).or_default() += 1;
                *stats.open_by_category.entry(a.category).or_default() += 1;
            }
        }
        stats.clients_with_alerts = clients.len();
        stats
    }
}
