//! Rule-based fraud and AML scoring.
//!
//! RULE: `analyze` never mutates the rolling windows. Only `record`, called
//! after an operation commits, appends to them. Scoring the same probe twice
//! gives the same answer.
//!
//! Score = round(100 × Σ weights / number of factors that fired), so the
//! score is the mean weight of the triggered heuristics, not their sum.
//! Missing history never errors: heuristics without data simply do not fire.

use crate::{
    alert::{Alert, AlertCategory, RiskFactor, Severity},
    config::FraudRules,
    error::{DeskError, DeskResult},
    profile::ProfileBook,
    types::{new_id, EntityId, Timestamp},
};
use chrono::{Duration, FixedOffset, NaiveDate, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// What the engine needs to know about one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationProbe {
    /// Folio, or the quotation id before a folio exists.
    pub reference: String,
    pub client_id: Option<EntityId>,
    /// Walk-in name; keys the window when there is no client id.
    pub client_name: String,
    pub amount_usd: Decimal,
    pub at: Timestamp,
}

impl OperationProbe {
    pub fn window_key(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.client_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysis {
    pub score: u8,
    pub severity: Severity,
    pub factors: Vec<RiskFactor>,
    /// Present when the score reaches the alert threshold. Not yet stored.
    pub alert: Option<Alert>,
    pub requires_review: bool,
    pub approved: bool,
    pub recommendations: Vec<String>,
}

impl FraudAnalysis {
    pub fn factor_names(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.name.clone()).collect()
    }

    pub fn has_category(&self, category: AlertCategory) -> bool {
        self.factors.iter().any(|f| f.category == category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowEntry {
    at: Timestamp,
    local_date: NaiveDate,
    amount_usd: Decimal,
}

#[derive(Default)]
struct Windows {
    per_client: HashMap<String, VecDeque<WindowEntry>>,
    system: VecDeque<Timestamp>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub client_entries: usize,
    pub clients_dropped: usize,
    pub system_entries: usize,
}

pub struct FraudDetectionEngine {
    rules: FraudRules,
    offset: FixedOffset,
    profiles: Arc<ProfileBook>,
    windows: RwLock<Windows>,
}

impl FraudDetectionEngine {
    pub fn new(rules: FraudRules, offset: FixedOffset, profiles: Arc<ProfileBook>) -> Self {
        Self {
            rules,
            offset,
            profiles,
            windows: RwLock::new(Windows::default()),
        }
    }

    pub fn rules(&self) -> &FraudRules {
        &self.rules
    }

    pub fn analyze(&self, probe: &OperationProbe, now: Timestamp) -> DeskResult<FraudAnalysis> {
        let windows = self
            .windows
            .read()
            .map_err(|_| DeskError::LockPoisoned("fraud windows"))?;
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();

        let max_age = Duration::hours(self.rules.window.max_age_hours);
        let recent: Vec<WindowEntry> = windows
            .per_client
            .get(probe.window_key())
            .map(|w| w.iter().filter(|e| now - e.at <= max_age).copied().collect())
            .unwrap_or_default();
        let system_last_hour = windows
            .system
            .iter()
            .filter(|at| now - **at <= Duration::hours(1))
            .count();
        drop(windows);

        let mut factors = Vec::new();
        self.fragmentation(probe, &recent, today, now, &mut factors);
        self.velocity(system_last_hour, &mut factors);
        self.amount_anomaly(probe, &mut factors);
        self.off_hours(local.hour(), local.minute(), &mut factors);

        Ok(self.assess(probe, factors, now))
    }

    /// Append a committed operation to the client and system windows.
    pub fn record(&self, probe: &OperationProbe) -> DeskResult<()> {
        let mut windows = self
            .windows
            .write()
            .map_err(|_| DeskError::LockPoisoned("fraud windows"))?;
        let entry = WindowEntry {
            at: probe.at,
            local_date: probe.at.with_timezone(&self.offset).date_naive(),
            amount_usd: probe.amount_usd,
        };
        let max_age = Duration::hours(self.rules.window.max_age_hours);
        let capacity = self.rules.window.per_client_capacity.max(1);
        let client = windows
            .per_client
            .entry(probe.window_key().to_string())
            .or_default();
        while client.front().is_some_and(|e| probe.at - e.at > max_age) {
            client.pop_front();
        }
        while client.len() >= capacity {
            client.pop_front();
        }
        client.push_back(entry);

        let system_capacity = self.rules.window.system_capacity.max(1);
        while windows.system.front().is_some_and(|at| probe.at - *at > Duration::hours(1)) {
            windows.system.pop_front();
        }
        while windows.system.len() >= system_capacity {
            windows.system.pop_front();
        }
        windows.system.push_back(probe.at);
        Ok(())
    }

    /// Evict entries older than the window age (clients) or one hour (system).
    pub fn prune(&self, now: Timestamp) -> DeskResult<PruneReport> {
        let mut windows = self
            .windows
            .write()
            .map_err(|_| DeskError::LockPoisoned("fraud windows"))?;
        let max_age = Duration::hours(self.rules.window.max_age_hours);
        let mut report = PruneReport::default();
        for deque in windows.per_client.values_mut() {
            while deque.front().is_some_and(|e| now - e.at > max_age) {
                deque.pop_front();
                report.client_entries += 1;
            }
        }
        let before = windows.per_client.len();
        windows.per_client.retain(|_, d| !d.is_empty());
        report.clients_dropped = before - windows.per_client.len();
        while windows.system.front().is_some_and(|at| now - *at > Duration::hours(1)) {
            windows.system.pop_front();
            report.system_entries += 1;
        }
        log::debug!(
            "fraud windows pruned: {} client entries, {} clients, {} system entries",
            report.client_entries, report.clients_dropped, report.system_entries
        );
        Ok(report)
    }

    pub fn client_window_len(&self, key: &str) -> usize {
        self.windows
            .read()
            .ok()
            .and_then(|w| w.per_client.get(key).map(VecDeque::len))
            .unwrap_or(0)
    }

    pub fn system_window_len(&self) -> usize {
        self.windows.read().map(|w| w.system.len()).unwrap_or(0)
    }

    // ── Heuristics ─────────────────────────────────────────────────

    fn fragmentation(
        &self,
        probe: &OperationProbe,
        recent: &[WindowEntry],
        today: NaiveDate,
        now: Timestamp,
        factors: &mut Vec<RiskFactor>,
    ) {
        let rules = &self.rules.fragmentation;
        let today_ops: Vec<&WindowEntry> = recent.iter().filter(|e| e.local_date == today).collect();

        if today_ops.len() >= rules.max_operations_per_day {
            factors.push(RiskFactor {
                name: "Multiple daily operations".into(),
                category: AlertCategory::Fragmentation,
                weight: rules.daily_count_weight,
                description: "The client has made too many operations today".into(),
                evidence: format!("{} operations", today_ops.len()),
                expected: Some(format!("< {} operations", rules.max_operations_per_day)),
            });
        }

        let cumulative: Decimal =
            today_ops.iter().map(|e| e.amount_usd).sum::<Decimal>() + probe.amount_usd;
        let small_ceiling = rules.cumulative_threshold_usd * rules.small_operation_ratio;
        if cumulative >= rules.cumulative_threshold_usd
            && probe.amount_usd < small_ceiling
            && today_ops.iter().all(|e| e.amount_usd < small_ceiling)
        {
            factors.push(RiskFactor {
                name: "Possible structuring".into(),
                category: AlertCategory::Fragmentation,
                weight: rules.structuring_weight,
                description: "Several small operations adding up to a large amount".into(),
                evidence: format!(
                    "${} USD accumulated in {} operations",
                    cumulative.round_dp(2),
                    today_ops.len() + 1
                ),
                expected: Some("Fewer operations of larger individual amount".into()),
            });
        }

        let burst_window = Duration::minutes(rules.burst_window_minutes);
        let in_burst = recent
            .iter()
            .filter(|e| e.at <= now && now - e.at <= burst_window)
            .count();
        if in_burst >= rules.burst_min_prior_operations {
            factors.push(RiskFactor {
                name: "Operation burst".into(),
                category: AlertCategory::Velocity,
                weight: rules.burst_weight,
                description: "Several operations in a very short period".into(),
                evidence: format!(
                    "{} operations in {} minutes",
                    in_burst + 1,
                    rules.burst_window_minutes
                ),
                expected: Some(format!(
                    "< {} operations per {} minutes",
                    rules.burst_min_prior_operations, rules.burst_window_minutes
                )),
            });
        }
    }

    fn velocity(&self, system_last_hour: usize, factors: &mut Vec<RiskFactor>) {
        let rules = &self.rules.velocity;
        if system_last_hour >= rules.max_operations_per_hour {
            factors.push(RiskFactor {
                name: "High desk-wide volume".into(),
                category: AlertCategory::Velocity,
                weight: rules.weight,
                description: "Unusually many operations across the desk in the last hour".into(),
                evidence: format!("{system_last_hour} operations"),
                expected: Some(format!("< {} operations per hour", rules.max_operations_per_hour)),
            });
        }
    }

    fn amount_anomaly(&self, probe: &OperationProbe, factors: &mut Vec<RiskFactor>) {
        let rules = &self.rules.amount_anomaly;
        let Some(client_id) = probe.client_id.as_deref() else {
            return;
        };
        let Some(profile) = self.profiles.get(client_id) else {
            return;
        };
        let amount = probe.amount_usd.to_f64().unwrap_or(0.0);
        let Some(z) = profile.z_score(amount, rules.min_samples) else {
            return;
        };
        if z.abs() >= rules.z_threshold {
            let direction = if z > 0.0 { "larger" } else { "smaller" };
            factors.push(RiskFactor {
                name: "Anomalous amount".into(),
                category: AlertCategory::AmountAnomaly,
                weight: rules.weight,
                description: format!(
                    "The amount is significantly {direction} than the client's usual pattern"
                ),
                evidence: format!("${:.2} USD ({:.1} standard deviations)", amount, z.abs()),
                expected: Some(format!(
                    "${:.2} USD ± ${:.2}",
                    profile.mean,
                    profile.std_dev() * 2.0
                )),
            });
        }
    }

    fn off_hours(&self, hour: u32, minute: u32, factors: &mut Vec<RiskFactor>) {
        let rules = &self.rules.off_hours;
        if hour < rules.start_hour || hour >= rules.end_hour {
            factors.push(RiskFactor {
                name: "Off-hours operation".into(),
                category: AlertCategory::OffHours,
                weight: rules.weight,
                description: "Operation outside standard business hours".into(),
                evidence: format!("{hour:02}:{minute:02}"),
                expected: Some(format!("{}:00 - {}:00", rules.start_hour, rules.end_hour)),
            });
        }
    }

    // ── Scoring ────────────────────────────────────────────────────

    pub fn score(factors: &[RiskFactor]) -> u8 {
        if factors.is_empty() {
            return 0;
        }
        let sum: f64 = factors.iter().map(|f| f.weight).sum();
        let mean = 100.0 * sum / factors.len() as f64;
        mean.round().clamp(0.0, 100.0) as u8
    }

    pub fn severity(&self, score: u8) -> Severity {
        let t = &self.rules.thresholds;
        if score >= t.critical {
            Severity::Critical
        } else if score >= t.high {
            Severity::High
        } else if score >= t.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn recommendations(&self, score: u8) -> Vec<String> {
        let t = &self.rules.thresholds;
        let mut out = Vec::new();
        if score >= t.low {
            out.push("Verify the client's identity".to_string());
        }
        if score >= t.medium {
            out.push("Request additional documentation".to_string());
            out.push("Consult the compliance officer".to_string());
        }
        if score >= t.high {
            out.push("Consider suspending the operation".to_string());
            out.push("Report to the CNBV within 24 hours".to_string());
        }
        if score >= t.critical {
            out.push("STOP THE OPERATION".to_string());
            out.push("Contact the authorities if necessary".to_string());
        }
        out
    }

    fn assess(&self, probe: &OperationProbe, factors: Vec<RiskFactor>, now: Timestamp) -> FraudAnalysis {
        let t = &self.rules.thresholds;
        let score = Self::score(&factors);
        let severity = self.severity(score);
        let requires_review = score >= t.medium;
        let approved = score < t.block;

        let alert = (score >= t.low).then(|| {
            let category = [
                AlertCategory::Fragmentation,
                AlertCategory::Velocity,
                AlertCategory::AmountAnomaly,
                AlertCategory::OffHours,
            ]
            .into_iter()
            .find(|c| factors.iter().any(|f| f.category == *c))
            .unwrap_or(AlertCategory::Fragmentation);
            Alert {
                id: new_id("alr"),
                category,
                severity,
                score,
                operation_ref: probe.reference.clone(),
                client_id: probe.client_id.clone(),
                title: format!("{}: {}", severity.label(), category.title()),
                description: factors
                    .iter()
                    .map(|f| f.description.as_str())
                    .collect::<Vec<_>>()
                    .join(". "),
                factors: factors.clone(),
                recommended_action: severity.recommended_action().to_string(),
                requires_review,
                blocked: !approved,
                resolved: false,
                false_positive: false,
                resolved_by: None,
                resolution: None,
                created_at: now,
                resolved_at: None,
            }
        });

        FraudAnalysis {
            score,
            severity,
            recommendations: self.recommendations(score),
            factors,
            alert,
            requires_review,
            approved,
        }
    }
}
